//! Document operations and the update envelope that carries them.
//!
//! All mutations to a [`CanvasDocument`](crate::CanvasDocument) are expressed
//! as operations. Operations are:
//! - Self-identifying: `id` orders them, `seq` makes per-replica delivery contiguous
//! - Idempotent: re-applying a known op is a no-op
//! - Commutative: concurrent ops converge regardless of arrival order

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::clock::OpId;
use crate::error::CrdtError;
use crate::register::RecordInit;
use crate::text::TextAttrs;
use crate::value::FieldValue;

/// Which record sequence an op targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Nodes,
    Edges,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Nodes => "nodes",
            Collection::Edges => "edges",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Insert a record after `after` (None = head). The new element's id is the op id.
    Insert {
        collection: Collection,
        after: Option<OpId>,
        record: RecordInit,
    },
    /// Tombstone a record.
    Delete { collection: Collection, target: OpId },
    /// Write (or unset) a top-level field.
    SetField {
        collection: Collection,
        target: OpId,
        key: String,
        value: Option<FieldValue>,
    },
    /// Write (or unset) one key of a nested map field.
    SetKey {
        collection: Collection,
        target: OpId,
        map: String,
        key: String,
        value: Option<FieldValue>,
    },
    /// Insert a run of characters. Character `i` gets id `op.id.nth(i)` and
    /// is anchored after character `i - 1`.
    TextInsert {
        field: String,
        after: Option<OpId>,
        text: String,
        attrs: Option<TextAttrs>,
    },
    /// Tombstone characters.
    TextDelete { field: String, targets: Vec<OpId> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub id: OpId,
    /// Per-replica sequence number, starting at 1.
    pub seq: u64,
    pub kind: OpKind,
}

impl Op {
    /// Number of Lamport ticks this op consumes.
    pub fn span(&self) -> u64 {
        match &self.kind {
            OpKind::TextInsert { text, .. } => (text.chars().count() as u64).max(1),
            _ => 1,
        }
    }

    /// Highest Lamport time used by this op, `None` if its range overflows.
    pub fn last_lamport(&self) -> Option<u64> {
        self.id.lamport.checked_add(self.span() - 1)
    }

    /// Elements that must exist before this op can be integrated.
    pub fn dependencies(&self) -> Vec<OpId> {
        match &self.kind {
            OpKind::Insert { after, .. } => after.iter().copied().collect(),
            OpKind::Delete { target, .. }
            | OpKind::SetField { target, .. }
            | OpKind::SetKey { target, .. } => vec![*target],
            OpKind::TextInsert { after, .. } => after.iter().copied().collect(),
            OpKind::TextDelete { targets, .. } => targets.clone(),
        }
    }
}

/// A batch of ops, as exchanged between replicas.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub ops: Vec<Op>,
}

impl Update {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Append another update's ops.
    pub fn extend(&mut self, other: Update) {
        self.ops.extend(other.ops);
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_stdvec(self).map_err(|e| CrdtError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
