//! Board registry and fan-out.
//!
//! The hub is the only owner of the board → sessions map. Delivery writes to
//! each session's private bounded queue with `try_send`, so a slow consumer
//! never stalls a broadcast: a full queue gets its session torn down and
//! dropped from the registry instead.
//!
//! ```text
//!            broadcast(board, env)
//!                    │
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!   queue(A) ok  queue(B) ok  queue(C) full ──► teardown(Saturated), remove
//! ```
//!
//! `register`/`unregister` take the write lock and `broadcast` the read lock,
//! so a session sees every broadcast issued after its `register` returned
//! and none issued before.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::Envelope;
use crate::session::{TeardownReason, TeardownSignal};

/// The hub's reference to one live session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    outbound: mpsc::Sender<Arc<Envelope>>,
    teardown: TeardownSignal,
}

impl SessionHandle {
    pub fn new(
        conn_id: Uuid,
        user_id: Uuid,
        outbound: mpsc::Sender<Arc<Envelope>>,
        teardown: TeardownSignal,
    ) -> Self {
        Self {
            conn_id,
            user_id,
            outbound,
            teardown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub saturated_drops: u64,
    pub active_sessions: usize,
    pub active_boards: usize,
}

#[derive(Default)]
struct AtomicHubStats {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    saturated_drops: AtomicU64,
}

#[derive(Default)]
pub struct Hub {
    boards: RwLock<HashMap<Uuid, HashMap<Uuid, SessionHandle>>>,
    stats: AtomicHubStats,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to its board. Returns `false` if it was already there.
    pub async fn register(&self, board_id: Uuid, handle: SessionHandle) -> bool {
        let mut boards = self.boards.write().await;
        let sessions = boards.entry(board_id).or_default();
        if sessions.contains_key(&handle.conn_id) {
            log::warn!(
                "Session {} registered twice on board {board_id}",
                handle.conn_id
            );
            return false;
        }
        log::debug!("Registered session {} on board {board_id}", handle.conn_id);
        sessions.insert(handle.conn_id, handle);
        true
    }

    /// Remove a session. Removing an absent session is a no-op.
    pub async fn unregister(&self, board_id: Uuid, conn_id: Uuid) -> bool {
        let mut boards = self.boards.write().await;
        Self::remove_locked(&mut boards, board_id, conn_id)
    }

    fn remove_locked(
        boards: &mut HashMap<Uuid, HashMap<Uuid, SessionHandle>>,
        board_id: Uuid,
        conn_id: Uuid,
    ) -> bool {
        let Some(sessions) = boards.get_mut(&board_id) else {
            return false;
        };
        let removed = sessions.remove(&conn_id).is_some();
        if sessions.is_empty() {
            boards.remove(&board_id);
        }
        removed
    }

    /// Deliver `envelope` to every session registered on `board_id`.
    ///
    /// Returns the number of sessions that accepted it.
    pub async fn broadcast(&self, board_id: Uuid, envelope: Arc<Envelope>) -> usize {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut evicted = Vec::new();
        {
            let boards = self.boards.read().await;
            let Some(sessions) = boards.get(&board_id) else {
                return 0;
            };
            for handle in sessions.values() {
                match handle.outbound.try_send(envelope.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        log::warn!(
                            "Outbound queue full for session {} (user {}), dropping it",
                            handle.conn_id,
                            handle.user_id
                        );
                        handle.teardown.trigger(TeardownReason::Saturated);
                        self.stats.saturated_drops.fetch_add(1, Ordering::Relaxed);
                        evicted.push(handle.conn_id);
                    }
                    Err(TrySendError::Closed(_)) => evicted.push(handle.conn_id),
                }
            }
        }
        self.stats
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);

        if !evicted.is_empty() {
            let mut boards = self.boards.write().await;
            for conn_id in evicted {
                Self::remove_locked(&mut boards, board_id, conn_id);
            }
        }
        delivered
    }

    pub async fn is_registered(&self, board_id: Uuid, conn_id: Uuid) -> bool {
        self.boards
            .read()
            .await
            .get(&board_id)
            .is_some_and(|sessions| sessions.contains_key(&conn_id))
    }

    pub async fn session_count(&self, board_id: Uuid) -> usize {
        self.boards
            .read()
            .await
            .get(&board_id)
            .map_or(0, HashMap::len)
    }

    pub async fn active_boards(&self) -> Vec<Uuid> {
        self.boards.read().await.keys().copied().collect()
    }

    pub async fn stats(&self) -> HubStats {
        let boards = self.boards.read().await;
        HubStats {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            saturated_drops: self.stats.saturated_drops.load(Ordering::Relaxed),
            active_sessions: boards.values().map(HashMap::len).sum(),
            active_boards: boards.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(capacity: usize) -> (SessionHandle, mpsc::Receiver<Arc<Envelope>>, TeardownSignal) {
        let (tx, rx) = mpsc::channel(capacity);
        let teardown = TeardownSignal::new();
        let handle = SessionHandle::new(Uuid::new_v4(), Uuid::new_v4(), tx, teardown.clone());
        (handle, rx, teardown)
    }

    fn envelope(board_id: Uuid, text: &str) -> Arc<Envelope> {
        Arc::new(Envelope {
            board_id,
            payload: text.to_string(),
        })
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let hub = Hub::new();
        let board = Uuid::new_v4();
        let (handle, mut rx, _) = session(8);
        let conn = handle.conn_id;

        assert!(hub.register(board, handle.clone()).await);
        assert!(!hub.register(board, handle).await);
        assert_eq!(hub.session_count(board).await, 1);

        // No duplicate fan-out target.
        assert_eq!(hub.broadcast(board, envelope(board, "x")).await, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
        assert!(hub.is_registered(board, conn).await);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_prunes() {
        let hub = Hub::new();
        let board = Uuid::new_v4();
        let (handle, _rx, _) = session(8);
        let conn = handle.conn_id;

        hub.register(board, handle).await;
        assert!(hub.unregister(board, conn).await);
        assert!(!hub.unregister(board, conn).await);
        assert!(!hub.unregister(Uuid::new_v4(), conn).await);
        assert!(hub.active_boards().await.is_empty());
    }

    #[tokio::test]
    async fn test_registry_follows_last_operation() {
        let hub = Hub::new();
        let board = Uuid::new_v4();
        let (handle, _rx, _) = session(8);
        let conn = handle.conn_id;

        hub.register(board, handle.clone()).await;
        hub.unregister(board, conn).await;
        hub.register(board, handle.clone()).await;
        assert!(hub.is_registered(board, conn).await);
        hub.unregister(board, conn).await;
        hub.unregister(board, conn).await;
        assert!(!hub.is_registered(board, conn).await);
    }

    #[tokio::test]
    async fn test_broadcast_isolated_per_board() {
        let hub = Hub::new();
        let board_a = Uuid::new_v4();
        let board_b = Uuid::new_v4();
        let (a, mut rx_a, _) = session(8);
        let (b, mut rx_b, _) = session(8);
        hub.register(board_a, a).await;
        hub.register(board_b, b).await;

        assert_eq!(hub.broadcast(board_a, envelope(board_a, "only-a")).await, 1);

        assert_eq!(rx_a.recv().await.unwrap().payload, "only-a");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_before_register_not_seen() {
        let hub = Hub::new();
        let board = Uuid::new_v4();
        let (handle, mut rx, _) = session(8);

        hub.broadcast(board, envelope(board, "early")).await;
        hub.register(board, handle).await;
        hub.broadcast(board, envelope(board, "late")).await;

        assert_eq!(rx.recv().await.unwrap().payload, "late");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_saturated_session_dropped_without_blocking_others() {
        let hub = Hub::new();
        let board = Uuid::new_v4();
        let (slow, _slow_rx, slow_teardown) = session(1);
        let slow_conn = slow.conn_id;
        let (fast, mut fast_rx, _) = session(64);
        hub.register(board, slow).await;
        hub.register(board, fast).await;

        for i in 0..10 {
            hub.broadcast(board, envelope(board, &i.to_string())).await;
            assert_eq!(fast_rx.recv().await.unwrap().payload, i.to_string());
        }

        assert_eq!(slow_teardown.reason(), Some(TeardownReason::Saturated));
        assert!(!hub.is_registered(board, slow_conn).await);
        let stats = hub.stats().await;
        assert_eq!(stats.saturated_drops, 1);
        assert_eq!(stats.active_sessions, 1);
    }

    #[tokio::test]
    async fn test_closed_queue_is_pruned() {
        let hub = Hub::new();
        let board = Uuid::new_v4();
        let (handle, rx, _) = session(4);
        hub.register(board, handle).await;
        drop(rx);

        assert_eq!(hub.broadcast(board, envelope(board, "x")).await, 0);
        assert_eq!(hub.session_count(board).await, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let hub = Hub::new();
        let board = Uuid::new_v4();
        let (a, _rx_a, _) = session(8);
        let (b, _rx_b, _) = session(8);
        hub.register(board, a).await;
        hub.register(board, b).await;

        hub.broadcast(board, envelope(board, "1")).await;
        hub.broadcast(board, envelope(board, "2")).await;

        let stats = hub.stats().await;
        assert_eq!(stats.broadcasts, 2);
        assert_eq!(stats.deliveries, 4);
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.active_boards, 1);
    }
}
