//! Relay wire frames.
//!
//! Every frame travels inside a length-delimited envelope and is encoded with
//! postcard. Update payloads and state vectors are opaque here; `weft-crdt`
//! defines their contents.
//!
//! Handshake:
//!
//! ```text
//! client                                relay
//!   │── Hello {room, replica, sv} ──────▶│
//!   │◀──────── Update {origin: RELAY} ───│  ops the client lacks
//!   │◀──────── Presence [..] ────────────│  current table
//!   │◀──────── SyncComplete {sv} ────────│
//!   │── Update {ops relay lacks} ───────▶│
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ReplicaId, RoomName};
use crate::presence::PresenceUpdate;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame encode/decode failed: {0}")]
    Codec(#[from] postcard::Error),
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
}

/// Client → relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// First frame on every connection.
    Hello {
        room: RoomName,
        replica: ReplicaId,
        state_vector: Vec<u8>,
    },
    /// An encoded document update produced by this replica.
    Update { update: Vec<u8> },
    /// This replica's presence entry, replaced wholesale.
    Presence(PresenceUpdate),
}

/// Relay → client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// A document update, tagged with the replica that produced it.
    Update { origin: ReplicaId, update: Vec<u8> },
    /// Presence changes. Entries with `state: None` are departures.
    Presence(Vec<PresenceUpdate>),
    /// Initial exchange finished; carries the relay's state vector.
    SyncComplete { state_vector: Vec<u8> },
    /// The relay refused something. The connection closes after this.
    Error { message: String },
}

fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, WireError> {
    let bytes = postcard::to_stdvec(frame)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(WireError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

impl ClientFrame {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

impl ServerFrame {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
