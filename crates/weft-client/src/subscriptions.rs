//! Events a replica actor publishes to the application.
//!
//! Subscribe via [`ReplicaHandle::subscribe`](crate::ReplicaHandle::subscribe).
//! Events are notifications; read the current state through the handle.

use std::time::Duration;

use crate::presence::AwarenessChange;
use crate::sync::SyncResult;

/// Pushed from the actor to the app via broadcast.
#[derive(Clone, Debug)]
pub enum ReplicaEvent {
    /// Remote changes reached the document; the rendered lists were
    /// refreshed, seeded or deliberately left alone.
    ViewChanged(SyncResult),
    /// Other replicas edited these text fields.
    TextChanged(Vec<String>),
    /// Presence entries were added, updated or removed.
    PresenceChanged(AwarenessChange),
    Status(ConnectionStatus),
}

/// Connection lifecycle status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    /// Socket open, handshake in progress.
    Connected,
    /// Initial (or re-)sync with the relay completed.
    Synced,
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    Error(String),
}

impl ConnectionStatus {
    pub fn is_synced(&self) -> bool {
        matches!(self, ConnectionStatus::Synced)
    }
}
