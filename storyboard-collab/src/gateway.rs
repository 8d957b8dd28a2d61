//! Persistence boundary consumed by the hub, router and presence tracker.
//!
//! Calls are synchronous and may block on storage; the core calls them
//! inline from its tasks. Every read returns fresh state: nothing above
//! this trait caches board data between requests.

use storyboard_core::{
    BoardError, ColumnMutation, Goal, GoalMutation, LegendColor, Membership, Persona,
    PersonaMutation, PresenceEntry, StoryMutation, Storyboard, UserProfile,
};
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Board not found: {0}")]
    BoardNotFound(Uuid),
    #[error("User not found: {0}")]
    UserNotFound(Uuid),
    #[error("Unknown credential")]
    Unauthenticated,
    #[error("User {user_id} does not own board {board_id}")]
    NotOwner { board_id: Uuid, user_id: Uuid },
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub trait PersistenceGateway: Send + Sync + 'static {
    /// Resolve a session credential to its user.
    fn resolve_user(&self, credential: &str) -> Result<UserProfile, GatewayError>;

    fn confirm_owner(&self, board_id: Uuid, user_id: Uuid) -> Result<(), GatewayError>;

    fn board_snapshot(&self, board_id: Uuid) -> Result<Storyboard, GatewayError>;
    fn goal_tree(&self, board_id: Uuid) -> Result<Vec<Goal>, GatewayError>;
    fn personas(&self, board_id: Uuid) -> Result<Vec<Persona>, GatewayError>;
    fn presence(&self, board_id: Uuid) -> Result<Vec<PresenceEntry>, GatewayError>;

    fn mutate_goal(&self, board_id: Uuid, mutation: GoalMutation) -> Result<(), GatewayError>;
    fn mutate_column(&self, board_id: Uuid, mutation: ColumnMutation) -> Result<(), GatewayError>;
    /// `user_id` is the acting user, recorded on comments.
    fn mutate_story(
        &self,
        board_id: Uuid,
        user_id: Uuid,
        mutation: StoryMutation,
    ) -> Result<(), GatewayError>;
    fn mutate_persona(&self, board_id: Uuid, mutation: PersonaMutation)
        -> Result<(), GatewayError>;
    fn set_owner(&self, board_id: Uuid, owner_id: Uuid) -> Result<(), GatewayError>;
    fn revise_color_legend(
        &self,
        board_id: Uuid,
        legend: Vec<LegendColor>,
    ) -> Result<(), GatewayError>;

    /// Upsert the user as an active member; returns the presence list.
    fn join_board(&self, board_id: Uuid, user_id: Uuid) -> Result<Vec<PresenceEntry>, GatewayError>;
    /// Mark the user inactive and stamp last-active.
    fn leave_board(&self, board_id: Uuid, user_id: Uuid)
        -> Result<Vec<PresenceEntry>, GatewayError>;
    /// Mark the user inactive and abandoned.
    fn abandon_board(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<PresenceEntry>, GatewayError>;

    fn delete_board(&self, board_id: Uuid, user_id: Uuid) -> Result<(), GatewayError>;

    /// Stored membership of the user, if they ever joined.
    fn member(&self, board_id: Uuid, user_id: Uuid) -> Result<Option<Membership>, GatewayError>;
}
