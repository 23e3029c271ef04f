//! View-side sync decisions, independent of any transport or UI framework.
//!
//! The replicated document always merges whatever it receives. What the
//! *view* does with the result is decided here:
//!
//! - Changes attributed to our own replica are never re-applied (the view
//!   already holds them from the local edit).
//! - A remote change that leaves a collection empty after the view has
//!   rendered content for it, once initial sync has completed, is treated
//!   as a partial or out-of-order resync and discarded.
//! - The first completed sync seeds an empty document from the cold-start
//!   snapshot exactly once.
//!
//! # State Machine
//!
//! ```text
//! +----------------+
//! | Connecting     | has_initialized=false: every remote change applies,
//! |                | even an empty one
//! +-------+--------+
//!         | on_synced(): seed if document empty and never seeded
//!         v
//! +----------------+
//! |  Initialized   | empty-after-content remote changes are discarded
//! |                | local deletes still update last-known lengths
//! +----------------+
//! ```

use thiserror::Error;
use tracing::{debug, info, warn};
use weft_crdt::Collection;
use weft_types::ReplicaId;

/// Result of offering a document change to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// The view was refreshed from the document.
    Applied { nodes: usize, edges: usize },
    /// The empty document was seeded from the cold-start snapshot.
    Seeded { nodes: usize, edges: usize },
    /// Nothing was done (see reason).
    Skipped { reason: SkipReason },
}

/// Reason why a view update was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Change came from this replica.
    OwnOrigin,
    /// Collection dropped to zero after content was rendered.
    SuspectedEmptyRegression {
        collection: Collection,
        last_known: usize,
    },
    /// Nothing in the event touched the view.
    NoViewChange,
}

/// Errors while driving sync.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Update bytes from the relay could not be decoded or applied.
    #[error("failed to apply remote update: {0}")]
    Apply(#[from] weft_crdt::CrdtError),
    /// Relay state vector could not be decoded.
    #[error("invalid state vector: {0}")]
    StateVector(String),
}

/// Tracks what the view has seen, for the regression guard and seed-once.
#[derive(Debug, Clone)]
pub struct SyncManager {
    replica: ReplicaId,
    /// Set after the first completed sync; never cleared.
    has_initialized: bool,
    /// Set once the document has been seeded from the cold-start snapshot.
    seeded: bool,
    last_known_nodes: usize,
    last_known_edges: usize,
    /// Bumped on every view refresh.
    version: u64,
}

impl SyncManager {
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            has_initialized: false,
            seeded: false,
            last_known_nodes: 0,
            last_known_edges: 0,
            version: 0,
        }
    }

    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    pub fn has_initialized(&self) -> bool {
        self.has_initialized
    }

    pub fn seeded(&self) -> bool {
        self.seeded
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_known(&self, collection: Collection) -> usize {
        match collection {
            Collection::Nodes => self.last_known_nodes,
            Collection::Edges => self.last_known_edges,
        }
    }

    fn set_last_known(&mut self, collection: Collection, len: usize) {
        match collection {
            Collection::Nodes => self.last_known_nodes = len,
            Collection::Edges => self.last_known_edges = len,
        }
    }

    /// Whether a change with this origin must be ignored by the view.
    pub fn is_own_origin(&self, origin: ReplicaId) -> bool {
        origin == self.replica
    }

    /// Decide whether a remote change that leaves `collection` with `new_len`
    /// records may replace the rendered list.
    pub fn check_remote(&self, collection: Collection, new_len: usize) -> Result<(), SkipReason> {
        let last_known = self.last_known(collection);
        if new_len == 0 && last_known > 0 && self.has_initialized {
            warn!(
                %collection,
                last_known,
                "remote change would empty the {} list after initial sync, ignoring",
                collection
            );
            return Err(SkipReason::SuspectedEmptyRegression {
                collection,
                last_known,
            });
        }
        Ok(())
    }

    /// Record that the view now renders `len` records of `collection`.
    pub fn record_rendered(&mut self, collection: Collection, len: usize) {
        self.set_last_known(collection, len);
        self.version += 1;
    }

    /// Record the collection length after a local edit. Local deletes are
    /// deliberate, so this may legitimately go to zero.
    pub fn record_local(&mut self, collection: Collection, len: usize) {
        self.set_last_known(collection, len);
    }

    /// Whether the first completed sync should seed the document.
    pub fn should_seed(&self, document_empty: bool) -> bool {
        document_empty && !self.has_initialized && !self.seeded
    }

    pub fn mark_seeded(&mut self) {
        self.seeded = true;
    }

    /// Mark initial sync complete. Idempotent.
    pub fn mark_initialized(&mut self) {
        if !self.has_initialized {
            info!(replica = %self.replica, "initial sync complete");
        } else {
            debug!(replica = %self.replica, "resync complete");
        }
        self.has_initialized = true;
    }
}

// ============================================================================
// Tests
// ============================================================================
