//! Weft relay library
//!
//! Per-document rooms that forward replicated updates between replicas,
//! keep presence for late joiners, and persist debounced snapshots.

pub mod config;
pub mod constants;
pub mod listener;
pub mod registry;
pub mod room;
pub mod sqlite;
pub mod store;
pub mod timer;

pub use config::{ConfigError, RelayConfig};
pub use listener::{RelayError, RelayServer};
pub use registry::RoomRegistry;
pub use room::{ConnectionId, PersistOutcome, RoomError, RoomHandle, RoomMembership, RoomSettings, spawn_room};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, SharedStore, SnapshotRecord, SnapshotStore, StoreError, StoreResult};
pub use timer::DebounceTimer;
