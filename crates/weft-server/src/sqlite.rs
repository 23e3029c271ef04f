//! SQLite snapshot store.
//!
//! One row per project. Rooms only ever update existing rows; rows are
//! created by the hosting application (or `weft-server create-project`).
//! Queries run on the blocking pool so a slow disk never stalls a room.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use weft_types::{CanvasSnapshot, DocumentId, now_millis};

use crate::store::{SnapshotRecord, SnapshotStore, StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    content TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Database handle for project snapshots. Cheap to clone.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an empty project row.
    pub fn create_project(&self, document: &DocumentId) -> StoreResult<()> {
        let now = now_millis() as i64;
        let inserted = self.conn.lock().execute(
            "INSERT OR IGNORE INTO projects (id, content, created_at, updated_at) VALUES (?1, NULL, ?2, ?2)",
            params![document.as_str(), now],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(document.clone()));
        }
        Ok(())
    }

    fn update_blocking(conn: &Connection, document: &DocumentId, record: &SnapshotRecord) -> StoreResult<()> {
        let content = serde_json::to_string(&record.content)?;
        let updated = conn.execute(
            "UPDATE projects SET content = ?1, updated_at = ?2 WHERE id = ?3",
            params![content, record.updated_at as i64, document.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(document.clone()));
        }
        Ok(())
    }

    /// Read a project row synchronously.
    pub fn get(&self, document: &DocumentId) -> StoreResult<Option<SnapshotRecord>> {
        Self::load_blocking(&self.conn.lock(), document)
    }

    fn load_blocking(conn: &Connection, document: &DocumentId) -> StoreResult<Option<SnapshotRecord>> {
        let row: Option<(Option<String>, i64)> = conn
            .query_row(
                "SELECT content, updated_at FROM projects WHERE id = ?1",
                params![document.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((content, updated_at)) = row else {
            return Err(StoreError::NotFound(document.clone()));
        };
        let Some(content) = content else {
            return Ok(None);
        };
        let content: CanvasSnapshot = serde_json::from_str(&content)?;
        Ok(Some(SnapshotRecord {
            content,
            updated_at: updated_at.max(0) as u64,
        }))
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn update(&self, document: &DocumentId, record: SnapshotRecord) -> StoreResult<()> {
        let conn = Arc::clone(&self.conn);
        let document = document.clone();
        tokio::task::spawn_blocking(move || Self::update_blocking(&conn.lock(), &document, &record))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn load(&self, document: &DocumentId) -> StoreResult<Option<SnapshotRecord>> {
        let conn = Arc::clone(&self.conn);
        let document = document.clone();
        tokio::task::spawn_blocking(move || Self::load_blocking(&conn.lock(), &document))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}
