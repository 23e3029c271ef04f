//! Durable snapshot storage.
//!
//! The relay is the only writer. A room hands the store the converged
//! canvas of its document; the store overwrites the document's row.
//!
//! | Implementation    | Use                                       |
//! |-------------------|-------------------------------------------|
//! | [`MemoryStore`]   | Tests: counts writes, can inject failures |
//! | [`SqliteStore`]   | Production: `projects` table in SQLite    |
//!
//! [`SqliteStore`]: crate::sqlite::SqliteStore

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use weft_types::{CanvasSnapshot, DocumentId};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The document has no row to update.
    #[error("no project with id {0}")]
    NotFound(DocumentId),

    #[error("project {0} already exists")]
    AlreadyExists(DocumentId),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Injected by [`MemoryStore::fail_writes`].
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("blocking task failed: {0}")]
    Join(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One persisted row: the canvas plus when it was written (Unix ms).
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotRecord {
    pub content: CanvasSnapshot,
    pub updated_at: u64,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Overwrite the stored snapshot of an existing document.
    async fn update(&self, document: &DocumentId, record: SnapshotRecord) -> StoreResult<()>;

    /// Latest stored snapshot, `None` if the document exists but was never written.
    async fn load(&self, document: &DocumentId) -> StoreResult<Option<SnapshotRecord>>;
}

pub type SharedStore = Arc<dyn SnapshotStore>;

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store. Unknown documents are created on first write unless
/// the store is strict.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<DocumentId, SnapshotRecord>>,
    writes: AtomicUsize,
    failing: AtomicBool,
    strict: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes for documents it was not told about.
    pub fn strict(documents: impl IntoIterator<Item = DocumentId>) -> Self {
        let store = Self {
            strict: true,
            ..Self::default()
        };
        {
            let mut records = store.records.lock();
            for document in documents {
                records.insert(
                    document,
                    SnapshotRecord {
                        content: CanvasSnapshot::default(),
                        updated_at: 0,
                    },
                );
            }
        }
        store
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every following write fail until turned off again.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, document: &DocumentId) -> Option<SnapshotRecord> {
        self.records.lock().get(document).cloned()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn update(&self, document: &DocumentId, record: SnapshotRecord) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        let mut records = self.records.lock();
        if self.strict && !records.contains_key(document) {
            return Err(StoreError::NotFound(document.clone()));
        }
        records.insert(document.clone(), record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, document: &DocumentId) -> StoreResult<Option<SnapshotRecord>> {
        Ok(self.records.lock().get(document).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{Node, NodeId, NodeKind, Position};

    fn record(n: usize) -> SnapshotRecord {
        let nodes = (0..n)
            .map(|i| Node::new(NodeId::new(format!("n{i}")), NodeKind::Text, Position::default()))
            .collect();
        SnapshotRecord {
            content: CanvasSnapshot::new(nodes, vec![]),
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_memory_store_counts_writes() {
        let store = MemoryStore::new();
        let doc = DocumentId::new("p1");
        store.update(&doc, record(1)).await.unwrap();
        store.update(&doc, record(2)).await.unwrap();
        assert_eq!(store.writes(), 2);
        assert_eq!(store.load(&doc).await.unwrap(), Some(record(2)));
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_counted() {
        let store = MemoryStore::new();
        let doc = DocumentId::new("p1");
        store.fail_writes(true);
        assert!(matches!(
            store.update(&doc, record(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.writes(), 0);
        assert_eq!(store.get(&doc), None);
    }

    #[tokio::test]
    async fn test_strict_store_rejects_unknown_document() {
        let store = MemoryStore::strict([DocumentId::new("known")]);
        assert!(matches!(
            store.update(&DocumentId::new("other"), record(1)).await,
            Err(StoreError::NotFound(_))
        ));
        store.update(&DocumentId::new("known"), record(1)).await.unwrap();
        assert_eq!(store.writes(), 1);
    }
}
