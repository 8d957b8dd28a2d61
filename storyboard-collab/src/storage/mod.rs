//! Board persistence.
//!
//! ```text
//! ┌──────────────┐  write-through  ┌──────────────────────────────┐
//! │ BoardStore   │ ──────────────► │ BoardDb (RocksDB)            │
//! │ (in-memory,  │                 │  CF "boards"      LZ4+bincode│
//! │  gateway)    │ ◄────────────── │  CF "users"                  │
//! └──────────────┘   on open       │  CF "credentials"            │
//!                                  └──────────────────────────────┘
//! ```

pub mod memory;
pub mod rocks;

pub use memory::BoardStore;
pub use rocks::{BoardDb, StoreConfig, StoreError};
