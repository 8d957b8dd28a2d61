//! # storyboard-collab: Real-time storyboard collaboration hub
//!
//! Clients open a WebSocket per board, send commands as JSON frames, and every
//! accepted mutation is re-read from storage and broadcast to all sessions on
//! that board.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   {"type","value"}   ┌──────────────────────┐
//! │ BoardClient │ ───────────────────► │ ConnectionSession    │
//! │ (per user)  │ ◄─────────────────── │  inbound │ outbound  │
//! └─────────────┘ {"type","value",     └────┬─────┴────▲──────┘
//!                  "userId"}                │          │ bounded queue
//!                                           ▼          │
//!                                    ┌────────────┐  ┌─┴────┐
//!                                    │EventRouter │─►│ Hub  │ board → sessions
//!                                    └─────┬──────┘  └──────┘
//!                                          ▼
//!                                 ┌──────────────────┐
//!                                 │PersistenceGateway│ BoardStore (+RocksDB)
//!                                 └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON frames, board commands, close codes
//! - [`hub`]: board-scoped session registry with non-blocking fan-out
//! - [`session`]: per-connection pumps, keepalive and single cleanup
//! - [`router`]: command dispatch: authorise, apply, re-read, reply
//! - [`presence`]: join/leave/abandon bookkeeping and presence events
//! - [`gateway`]: the storage seam the hub talks through
//! - [`storage`]: in-memory board store with optional RocksDB write-through
//! - [`server`]: handshake, admission and the accept loop
//! - [`client`]: WebSocket client used by tools and tests

pub mod client;
pub mod gateway;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use client::{BoardClient, ClientError, ClientEvent};
pub use gateway::{GatewayError, PersistenceGateway};
pub use hub::{Hub, HubStats, SessionHandle};
pub use presence::PresenceTracker;
pub use protocol::{
    BoardCommand, Envelope, InboundFrame, OutboundEvent, ProtocolError, Refetch,
    CLOSE_ABANDONED, CLOSE_DUPLICATE_SESSION, CLOSE_NOT_FOUND, CLOSE_UNAUTHORIZED,
};
pub use router::{Dispatch, EventRouter};
pub use server::{CollabServer, ServerConfig, ServerError, ServerStats};
pub use session::{ConnectionSession, SessionConfig, TeardownReason, TeardownSignal};
pub use storage::{BoardDb, BoardStore, StoreConfig, StoreError};
