//! Typed identifiers for replicas, documents, records, users and rooms.
//!
//! `ReplicaId` is numeric: it is the origin tag carried by every replicated
//! mutation and the key of the presence table. Record ids (`NodeId`,
//! `EdgeId`) are strings assigned by the creating client and never change
//! after creation. `DocumentId` is the hosting application's project id;
//! the relay room for a document is derived from it deterministically.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix shared by every relay room name.
pub const ROOM_PREFIX: &str = "weft-project-";

/// Numeric identity of one replica (one connected client's copy of the document).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(u64);

impl ReplicaId {
    /// The relay's own replica id. Clients never pick it.
    pub const RELAY: ReplicaId = ReplicaId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// A fresh random replica id (32 significant bits, never [`ReplicaId::RELAY`]).
    pub fn random() -> Self {
        let raw: u32 = rand::random();
        Self(u64::from(raw.max(1)))
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaId({})", self.0)
    }
}

impl From<u64> for ReplicaId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// ── String identifiers ──────────────────────────────────────────────────────

macro_rules! impl_string_id {
    ($T:ident, $name:literal) => {
        #[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $T(String);

        impl $T {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Generate a fresh random id (32 hex chars, no hyphens).
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Borrow<str> for $T {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_id!(DocumentId, "DocumentId");
impl_string_id!(NodeId, "NodeId");
impl_string_id!(EdgeId, "EdgeId");
impl_string_id!(UserId, "UserId");

// ── Rooms ───────────────────────────────────────────────────────────────────

/// Relay room name. One room per document.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    /// Derive the room for a document. Same input always produces the same room.
    pub fn for_document(document: &DocumentId) -> Self {
        Self(format!("{ROOM_PREFIX}{}", document.as_str()))
    }

    /// Accept a raw room name as sent by a client.
    pub fn parse(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Recover the document id. Names without the room prefix map to themselves.
    pub fn document_id(&self) -> DocumentId {
        let raw = self.0.strip_prefix(ROOM_PREFIX).unwrap_or(&self.0);
        DocumentId::new(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomName({})", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_replica_is_never_relay() {
        for _ in 0..1000 {
            assert_ne!(ReplicaId::random(), ReplicaId::RELAY);
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_room_name_is_deterministic() {
        let doc = DocumentId::new("abc123");
        assert_eq!(RoomName::for_document(&doc), RoomName::for_document(&doc));
        assert_eq!(RoomName::for_document(&doc).as_str(), "weft-project-abc123");
    }

    #[test]
    fn test_room_name_recovers_document() {
        let doc = DocumentId::new("f00d");
        let room = RoomName::for_document(&doc);
        assert_eq!(room.document_id(), doc);

        let bare = RoomName::parse("no-prefix");
        assert_eq!(bare.document_id(), DocumentId::new("no-prefix"));
    }

    #[test]
    fn test_string_id_serializes_transparently() {
        let id = NodeId::new("n1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"n1\"");
    }
}
