//! Operation identity and causal bookkeeping.
//!
//! Every op is identified by `(lamport, replica)`. The derived ordering on
//! [`OpId`] compares the Lamport time first and breaks ties by replica id, so
//! it is a total order that respects causality: an op is always greater than
//! every op its author had seen when creating it.
//!
//! A [`VersionVector`] records, per replica, the highest *contiguous*
//! sequence number applied. Two documents with equal vectors hold the same
//! set of ops.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use weft_types::ReplicaId;

use crate::Result;

/// Unique, totally ordered op identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub lamport: u64,
    pub replica: ReplicaId,
}

impl OpId {
    pub const fn new(lamport: u64, replica: ReplicaId) -> Self {
        Self { lamport, replica }
    }

    /// The id `n` Lamport ticks later from the same replica.
    ///
    /// Multi-character text inserts allocate a contiguous id range this way.
    /// `None` if the Lamport time would overflow.
    pub const fn nth(self, n: u64) -> Option<Self> {
        match self.lamport.checked_add(n) {
            Some(lamport) => Some(Self {
                lamport,
                replica: self.replica,
            }),
            None => None,
        }
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.lamport, self.replica)
    }
}

/// Per-replica high-water marks of contiguously applied ops.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    seen: BTreeMap<ReplicaId, u64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest contiguous sequence number applied from `replica` (0 = none).
    pub fn get(&self, replica: ReplicaId) -> u64 {
        self.seen.get(&replica).copied().unwrap_or(0)
    }

    /// Whether op `seq` from `replica` is already included.
    pub fn contains(&self, replica: ReplicaId, seq: u64) -> bool {
        seq <= self.get(replica)
    }

    /// Sequence number the next op from `replica` must carry.
    pub fn next_expected(&self, replica: ReplicaId) -> u64 {
        self.get(replica) + 1
    }

    /// Record op `seq` from `replica`. Only contiguous advances are accepted.
    pub fn advance(&mut self, replica: ReplicaId, seq: u64) -> bool {
        if seq != self.next_expected(replica) {
            return false;
        }
        self.seen.insert(replica, seq);
        true
    }

    /// Whether this vector has seen everything `other` has.
    pub fn dominates(&self, other: &VersionVector) -> bool {
        other
            .seen
            .iter()
            .all(|(replica, seq)| self.get(*replica) >= *seq)
    }

    /// Total number of ops covered.
    pub fn total(&self) -> u64 {
        self.seen.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReplicaId, u64)> + '_ {
        self.seen.iter().map(|(r, s)| (*r, *s))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_stdvec(self).map_err(|e| crate::CrdtError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
