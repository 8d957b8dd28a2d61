//! Board presence: who is active on a board right now.
//!
//! A thin layer over [`PersistenceGateway`]: memberships are stored, never
//! deleted, and every call returns the refreshed member list used as the
//! payload of presence broadcasts.
//!
//! ```text
//!   join ──► active=true, abandoned=false
//!   leave ──► active=false, lastActive=now
//!   abandon ──► active=false, abandoned=true (hidden from snapshots)
//! ```

use std::sync::Arc;
use storyboard_core::PresenceEntry;
use uuid::Uuid;

use crate::gateway::{GatewayError, PersistenceGateway};
use crate::protocol::{OutboundEvent, ProtocolError, TAG_USER_JOINED, TAG_USER_RETREATED};

#[derive(Clone)]
pub struct PresenceTracker {
    gateway: Arc<dyn PersistenceGateway>,
}

impl PresenceTracker {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    /// Idempotent: rejoining an active user just refreshes the row.
    pub fn join(&self, board_id: Uuid, user_id: Uuid) -> Result<Vec<PresenceEntry>, GatewayError> {
        let users = self.gateway.join_board(board_id, user_id)?;
        log::info!("Presence: {user_id} joined board {board_id}");
        Ok(users)
    }

    pub fn leave(&self, board_id: Uuid, user_id: Uuid) -> Result<Vec<PresenceEntry>, GatewayError> {
        let users = self.gateway.leave_board(board_id, user_id)?;
        log::info!("Presence: {user_id} left board {board_id}");
        Ok(users)
    }

    pub fn abandon(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<PresenceEntry>, GatewayError> {
        let users = self.gateway.abandon_board(board_id, user_id)?;
        log::info!("Presence: {user_id} abandoned board {board_id}");
        Ok(users)
    }

    pub fn snapshot(&self, board_id: Uuid) -> Result<Vec<PresenceEntry>, GatewayError> {
        self.gateway.presence(board_id)
    }
}

pub fn joined_event(user_id: Uuid, users: &[PresenceEntry]) -> Result<OutboundEvent, ProtocolError> {
    OutboundEvent::with_value(TAG_USER_JOINED, &users, Some(user_id))
}

pub fn retreated_event(
    user_id: Uuid,
    users: &[PresenceEntry],
) -> Result<OutboundEvent, ProtocolError> {
    OutboundEvent::with_value(TAG_USER_RETREATED, &users, Some(user_id))
}
