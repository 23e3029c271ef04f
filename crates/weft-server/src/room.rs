//! Per-document relay room.
//!
//! Each room is an actor task that owns the relay's copy of one document,
//! the presence table of its members, a debounce timer and the
//! last-persisted snapshot. Rooms share no mutable state with each other.
//!
//! ```text
//!   connection tasks           mpsc             Room (tokio task)
//!   ┌──────────────┐  Join/Update/Presence  ┌──────────────────────────┐
//!   │ RoomHandle   │ ─────────────────────▶ │ CanvasDocument (RELAY)   │
//!   └──────────────┘                        │ PresenceTable            │
//!          ▲        bounded ServerFrame     │ DebounceTimer → store    │
//!          └─────────────────────────────── │ members: conn → sender   │
//!                                           └──────────────────────────┘
//! ```
//!
//! Persistence: every update re-arms the timer. When it fires the room
//! projects the document and writes it only if it differs from the last
//! snapshot that was written successfully. A failed write leaves that
//! marker alone so the next cycle writes the then-current state.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use weft_crdt::{CanvasDocument, CrdtError, Update, VersionVector};
use weft_types::{
    CanvasSnapshot, DocumentId, PresenceTable, PresenceUpdate, ReplicaId, RoomName, ServerFrame,
    now_millis,
};

use crate::config::RelayConfig;
use crate::constants::{DEFAULT_DEBOUNCE, DEFAULT_OUTBOUND_CAPACITY, ROOM_COMMAND_CAPACITY};
use crate::registry::RoomRegistry;
use crate::store::{SharedStore, SnapshotRecord, StoreError};
use crate::timer::DebounceTimer;

/// Room-local id of one connection. Never reused within a room.
pub type ConnectionId = u64;

/// Frames queued on join before the first broadcast can arrive.
const HANDSHAKE_FRAMES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room shut down (or is shutting down). Join a fresh one.
    #[error("room closed")]
    Closed,
    #[error("document error: {0}")]
    Crdt(#[from] CrdtError),
    #[error("handshake frames did not fit the outbound buffer")]
    Backpressure,
}

/// Tunables shared by every room of a relay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoomSettings {
    pub debounce: Duration,
    pub outbound_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl From<&RelayConfig> for RoomSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            debounce: config.debounce,
            outbound_capacity: config.outbound_capacity,
        }
    }
}

/// What one persistence attempt did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Written,
    /// Equal to the last written snapshot.
    Unchanged,
    /// Empty, and the room never held content.
    Empty,
    Failed,
}

/// A connection's seat in a room. Dropping `frames` is how the room
/// notices a dead connection at its next broadcast.
#[derive(Debug)]
pub struct RoomMembership {
    pub conn: ConnectionId,
    pub frames: mpsc::Receiver<ServerFrame>,
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum RoomCommand {
    Join {
        replica: ReplicaId,
        state_vector: Vec<u8>,
        reply: oneshot::Sender<Result<RoomMembership, RoomError>>,
    },
    Update {
        conn: ConnectionId,
        update: Vec<u8>,
    },
    Presence {
        conn: ConnectionId,
        update: PresenceUpdate,
    },
    Leave {
        conn: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<CanvasSnapshot>,
    },
    Members {
        reply: oneshot::Sender<usize>,
    },
    Flush {
        reply: oneshot::Sender<PersistOutcome>,
    },
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoomCommand::Join { .. } => "Join",
            RoomCommand::Update { .. } => "Update",
            RoomCommand::Presence { .. } => "Presence",
            RoomCommand::Leave { .. } => "Leave",
            RoomCommand::Snapshot { .. } => "Snapshot",
            RoomCommand::Members { .. } => "Members",
            RoomCommand::Flush { .. } => "Flush",
        };
        f.write_str(name)
    }
}

// ============================================================================
// RoomHandle
// ============================================================================

/// Handle to a room actor. Cheap to clone.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    name: RoomName,
    generation: u64,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn name(&self) -> &RoomName {
        &self.name
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.tx.send(cmd).await.map_err(|_| RoomError::Closed)
    }

    /// Admit a replica. The returned receiver already holds the handshake:
    /// the ops `state_vector` lacks, the presence table, `SyncComplete`.
    pub async fn join(&self, replica: ReplicaId, state_vector: Vec<u8>) -> Result<RoomMembership, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Join {
            replica,
            state_vector,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    pub async fn update(&self, conn: ConnectionId, update: Vec<u8>) -> Result<(), RoomError> {
        self.send(RoomCommand::Update { conn, update }).await
    }

    pub async fn presence(&self, conn: ConnectionId, update: PresenceUpdate) -> Result<(), RoomError> {
        self.send(RoomCommand::Presence { conn, update }).await
    }

    pub async fn leave(&self, conn: ConnectionId) -> Result<(), RoomError> {
        self.send(RoomCommand::Leave { conn }).await
    }

    /// The relay's current projection of the document.
    pub async fn snapshot(&self) -> Result<CanvasSnapshot, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    pub async fn members(&self) -> Result<usize, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Members { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    /// Persist now instead of waiting for the timer.
    pub async fn flush(&self) -> Result<PersistOutcome, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Flush { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }
}

// ============================================================================
// Room actor (internal)
// ============================================================================

struct Member {
    replica: ReplicaId,
    tx: mpsc::Sender<ServerFrame>,
}

struct Room {
    name: RoomName,
    generation: u64,
    document: DocumentId,
    doc: CanvasDocument,
    members: HashMap<ConnectionId, Member>,
    next_conn: ConnectionId,
    presence: PresenceTable,
    timer: DebounceTimer,
    /// Snapshot of the last successful write.
    last_persisted: Option<CanvasSnapshot>,
    /// Set once the document (or the stored row) was non-empty, so a later
    /// delete-all is still written.
    seen_content: bool,
    store: SharedStore,
    settings: RoomSettings,
    registry: Option<RoomRegistry>,
}

impl Room {
    async fn load_marker(&mut self) {
        match self.store.load(&self.document).await {
            Ok(Some(record)) => {
                self.seen_content = !record.content.is_empty();
                self.last_persisted = Some(record.content);
            }
            Ok(None) => {}
            Err(StoreError::NotFound(_)) => {
                debug!(document = %self.document, "no stored project for room");
            }
            Err(e) => {
                warn!(document = %self.document, error = %e, "failed to load stored snapshot");
            }
        }
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        trace!(room = %self.name, ?cmd, "room command");
        match cmd {
            RoomCommand::Join {
                replica,
                state_vector,
                reply,
            } => {
                let result = self.join(replica, &state_vector);
                // The joiner gave up while queued.
                if let Err(Ok(membership)) = reply.send(result) {
                    self.remove_member(membership.conn);
                }
            }
            RoomCommand::Update { conn, update } => self.on_update(conn, update),
            RoomCommand::Presence { conn, update } => self.on_presence(conn, update),
            RoomCommand::Leave { conn } => self.remove_member(conn),
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.doc.to_snapshot());
            }
            RoomCommand::Members { reply } => {
                let _ = reply.send(self.members.len());
            }
            RoomCommand::Flush { reply } => {
                self.timer.cancel();
                let outcome = self.persist().await;
                let _ = reply.send(outcome);
            }
        }
    }

    fn join(&mut self, replica: ReplicaId, state_vector: &[u8]) -> Result<RoomMembership, RoomError> {
        let since = VersionVector::decode(state_vector)?;
        let missing = self.doc.ops_since(&since);
        let relay_has = self.doc.encode_state_vector()?;

        let (tx, frames) = mpsc::channel(self.settings.outbound_capacity.max(HANDSHAKE_FRAMES));
        if !missing.is_empty() {
            let update = missing.encode()?;
            tx.try_send(ServerFrame::Update {
                origin: ReplicaId::RELAY,
                update,
            })
            .map_err(|_| RoomError::Backpressure)?;
        }
        if !self.presence.is_empty() {
            tx.try_send(ServerFrame::Presence(self.presence.to_updates()))
                .map_err(|_| RoomError::Backpressure)?;
        }
        tx.try_send(ServerFrame::SyncComplete {
            state_vector: relay_has,
        })
        .map_err(|_| RoomError::Backpressure)?;

        let conn = self.next_conn;
        self.next_conn += 1;
        self.members.insert(conn, Member { replica, tx });
        info!(
            room = %self.name,
            %replica,
            conn,
            catch_up_ops = missing.len(),
            members = self.members.len(),
            "member joined"
        );
        Ok(RoomMembership { conn, frames })
    }

    fn on_update(&mut self, conn: ConnectionId, bytes: Vec<u8>) {
        let Some(origin) = self.members.get(&conn).map(|m| m.replica) else {
            debug!(room = %self.name, conn, "update from departed connection dropped");
            return;
        };
        let update = match Update::decode(&bytes) {
            Ok(update) => update,
            Err(e) => {
                warn!(room = %self.name, %origin, error = %e, "dropping undecodable update");
                return;
            }
        };
        match self.doc.apply_remote(&update, origin) {
            Ok(outcome) => trace!(
                room = %self.name,
                %origin,
                applied = outcome.applied,
                duplicates = outcome.duplicates,
                buffered = outcome.buffered,
                rejected = outcome.rejected,
                "update applied"
            ),
            Err(e) => {
                warn!(room = %self.name, %origin, error = %e, "dropping update that failed to apply");
                return;
            }
        }
        if !self.doc.is_empty() {
            self.seen_content = true;
        }

        self.broadcast(Some(conn), ServerFrame::Update { origin, update: bytes });
        self.timer.reset(self.settings.debounce);
    }

    fn on_presence(&mut self, conn: ConnectionId, update: PresenceUpdate) {
        let Some(replica) = self.members.get(&conn).map(|m| m.replica) else {
            return;
        };
        if update.replica != replica {
            warn!(
                room = %self.name,
                %replica,
                claimed = %update.replica,
                "presence for another replica dropped"
            );
            return;
        }
        if self.presence.apply(&update) {
            self.broadcast(Some(conn), ServerFrame::Presence(vec![update]));
        }
    }

    /// Queue `frame` for every member but `except`. Members whose buffer is
    /// full (or whose connection is gone) are dropped.
    fn broadcast(&mut self, except: Option<ConnectionId>, frame: ServerFrame) {
        let mut dropped = Vec::new();
        for (conn, member) in &self.members {
            if Some(*conn) == except {
                continue;
            }
            match member.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        room = %self.name,
                        replica = %member.replica,
                        conn,
                        "outbound buffer full, disconnecting slow consumer"
                    );
                    dropped.push(*conn);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*conn),
            }
        }
        for conn in dropped {
            self.remove_member(conn);
        }
    }

    fn remove_member(&mut self, conn: ConnectionId) {
        let Some(member) = self.members.remove(&conn) else {
            return;
        };
        info!(
            room = %self.name,
            replica = %member.replica,
            conn,
            members = self.members.len(),
            "member left"
        );
        let still_connected = self.members.values().any(|m| m.replica == member.replica);
        if !still_connected && self.presence.remove(member.replica) {
            self.broadcast(
                None,
                ServerFrame::Presence(vec![PresenceUpdate::removed(member.replica)]),
            );
        }
    }

    async fn persist(&mut self) -> PersistOutcome {
        let snapshot = self.doc.to_snapshot();
        let nodes = snapshot.nodes.len();
        let edges = snapshot.edges.len();

        if self.last_persisted.as_ref() == Some(&snapshot) {
            debug!(document = %self.document, nodes, edges, "snapshot unchanged, skipping write");
            return PersistOutcome::Unchanged;
        }
        if snapshot.is_empty() && !self.seen_content {
            debug!(document = %self.document, "room never held content, not writing empty snapshot");
            return PersistOutcome::Empty;
        }

        let record = SnapshotRecord {
            content: snapshot.clone(),
            updated_at: now_millis(),
        };
        match self.store.update(&self.document, record).await {
            Ok(()) => {
                info!(document = %self.document, nodes, edges, "snapshot persisted");
                self.last_persisted = Some(snapshot);
                PersistOutcome::Written
            }
            Err(e) => {
                warn!(
                    document = %self.document,
                    nodes,
                    edges,
                    error = %e,
                    "snapshot write failed, next cycle retries"
                );
                PersistOutcome::Failed
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        self.load_marker().await;
        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    let had_members = !self.members.is_empty();
                    self.handle(cmd).await;
                    // Only a departure closes the room, not a failed first join.
                    if had_members && self.members.is_empty() {
                        break;
                    }
                }
                _ = self.timer.fired() => {
                    self.persist().await;
                }
            }
        }
        self.close(rx).await;
    }

    /// Last member gone: write pending state, leave the registry, then turn
    /// away anything that raced in.
    async fn close(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        if self.timer.is_armed() {
            self.timer.cancel();
            self.persist().await;
        }
        if let Some(registry) = &self.registry {
            registry.deregister(&self.name, self.generation);
        }
        rx.close();
        while let Some(cmd) = rx.recv().await {
            match cmd {
                RoomCommand::Join { reply, .. } => {
                    let _ = reply.send(Err(RoomError::Closed));
                }
                RoomCommand::Snapshot { reply } => {
                    let _ = reply.send(self.doc.to_snapshot());
                }
                RoomCommand::Members { reply } => {
                    let _ = reply.send(0);
                }
                RoomCommand::Flush { reply } => {
                    let _ = reply.send(self.persist().await);
                }
                RoomCommand::Update { .. } | RoomCommand::Presence { .. } | RoomCommand::Leave { .. } => {}
            }
        }
        info!(room = %self.name, "room closed");
    }
}

/// Spawn a room actor for `name`. Must be called within a tokio runtime.
///
/// With a registry, the room removes its own entry when it closes.
pub fn spawn_room(
    name: RoomName,
    generation: u64,
    store: SharedStore,
    settings: RoomSettings,
    registry: Option<RoomRegistry>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(ROOM_COMMAND_CAPACITY);
    let room = Room {
        document: name.document_id(),
        name: name.clone(),
        generation,
        doc: CanvasDocument::new(ReplicaId::RELAY),
        members: HashMap::new(),
        next_conn: 1,
        presence: PresenceTable::new(),
        timer: DebounceTimer::new(),
        last_persisted: None,
        seen_content: false,
        store,
        settings,
        registry,
    };
    info!(room = %name, document = %room.document, "room opened");
    tokio::spawn(room.run(rx));
    RoomHandle {
        name,
        generation,
        tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use weft_crdt::{Collection, RecordInit};
    use weft_types::{Cursor, Node, NodeId, NodeKind, Position, PresenceState};

    use crate::store::MemoryStore;

    const DEBOUNCE: Duration = Duration::from_secs(2);

    fn empty_sv() -> Vec<u8> {
        VersionVector::new().encode().unwrap()
    }

    fn room_with(store: Arc<MemoryStore>) -> RoomHandle {
        let name = RoomName::for_document(&DocumentId::new("p1"));
        spawn_room(
            name,
            1,
            store,
            RoomSettings {
                debounce: DEBOUNCE,
                outbound_capacity: 64,
            },
            None,
        )
    }

    /// A client-side document producing encoded updates.
    struct Writer {
        doc: CanvasDocument,
    }

    impl Writer {
        fn new(replica: u64) -> Self {
            Self {
                doc: CanvasDocument::new(ReplicaId::new(replica)),
            }
        }

        fn replica(&self) -> ReplicaId {
            self.doc.replica()
        }

        fn add_node(&mut self, id: &str) -> Vec<u8> {
            let node = Node::new(NodeId::new(id), NodeKind::Text, Position::new(1.0, 1.0));
            let init = RecordInit::from_serialize(&node).unwrap();
            let replica = self.replica();
            let (result, update) = self
                .doc
                .transact(replica, |tx| tx.push_record(Collection::Nodes, init));
            result.unwrap();
            update.encode().unwrap()
        }

        fn move_node(&mut self, id: &str, x: f64) -> Vec<u8> {
            let replica = self.replica();
            let (result, update) = self.doc.transact(replica, |tx| {
                let found = tx.doc().find_record(Collection::Nodes, id).unwrap();
                tx.set_key(Collection::Nodes, found.element, "position", "x", Some(x.into()))
            });
            result.unwrap();
            update.encode().unwrap()
        }

        fn clear(&mut self) -> Vec<u8> {
            let replica = self.replica();
            let (result, update) = self.doc.transact(replica, |tx| tx.clear(Collection::Nodes));
            result.unwrap();
            update.encode().unwrap()
        }
    }

    fn drain(frames: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = frames.try_recv() {
            out.push(frame);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifty_updates_coalesce_into_one_write() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store.clone());
        let mut writer = Writer::new(7);
        let member = room.join(writer.replica(), empty_sv()).await.unwrap();

        room.update(member.conn, writer.add_node("n1")).await.unwrap();
        for i in 1..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            room.update(member.conn, writer.move_node("n1", i as f64)).await.unwrap();
        }
        room.members().await.unwrap();
        assert_eq!(store.writes(), 0);

        tokio::time::sleep(DEBOUNCE + Duration::from_millis(100)).await;
        room.members().await.unwrap();
        assert_eq!(store.writes(), 1);
        let stored = store.get(&DocumentId::new("p1")).unwrap();
        assert_eq!(stored.content, writer.doc.to_snapshot());
        assert_eq!(stored.content.nodes[0].position.x, 49.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_snapshot_is_not_rewritten() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store.clone());
        let mut writer = Writer::new(7);
        let member = room.join(writer.replica(), empty_sv()).await.unwrap();

        room.update(member.conn, writer.add_node("n1")).await.unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;
        room.members().await.unwrap();
        assert_eq!(store.writes(), 1);

        // Two edits that cancel out.
        room.update(member.conn, writer.move_node("n1", 50.0)).await.unwrap();
        room.update(member.conn, writer.move_node("n1", 1.0)).await.unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;
        room.members().await.unwrap();
        assert_eq!(store.writes(), 1);
        assert_eq!(room.flush().await.unwrap(), PersistOutcome::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_retried_next_cycle() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store.clone());
        let mut writer = Writer::new(7);
        let member = room.join(writer.replica(), empty_sv()).await.unwrap();

        store.fail_writes(true);
        room.update(member.conn, writer.add_node("n1")).await.unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;
        room.members().await.unwrap();
        assert_eq!(store.writes(), 0);

        store.fail_writes(false);
        room.update(member.conn, writer.add_node("n2")).await.unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;
        room.members().await.unwrap();
        assert_eq!(store.writes(), 1);
        let stored = store.get(&DocumentId::new("p1")).unwrap();
        assert_eq!(stored.content.nodes.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_canvas_written_only_after_content() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store.clone());
        let member = room.join(ReplicaId::new(7), empty_sv()).await.unwrap();
        assert_eq!(room.flush().await.unwrap(), PersistOutcome::Empty);

        let mut writer = Writer::new(7);
        room.update(member.conn, writer.add_node("n1")).await.unwrap();
        assert_eq!(room.flush().await.unwrap(), PersistOutcome::Written);

        room.update(member.conn, writer.clear()).await.unwrap();
        assert_eq!(room.flush().await.unwrap(), PersistOutcome::Written);
        let stored = store.get(&DocumentId::new("p1")).unwrap();
        assert!(stored.content.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_forwarded_to_others_with_origin() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store);
        let mut a = Writer::new(1);
        let mut member_a = room.join(a.replica(), empty_sv()).await.unwrap();
        let mut member_b = room.join(ReplicaId::new(2), empty_sv()).await.unwrap();
        drain(&mut member_a.frames);
        drain(&mut member_b.frames);

        let bytes = a.add_node("n1");
        room.update(member_a.conn, bytes.clone()).await.unwrap();
        room.members().await.unwrap();

        assert!(drain(&mut member_a.frames).is_empty());
        let frames = drain(&mut member_b.frames);
        assert_eq!(
            frames,
            vec![ServerFrame::Update {
                origin: ReplicaId::new(1),
                update: bytes
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_catches_up() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store);
        let mut a = Writer::new(1);
        let member_a = room.join(a.replica(), empty_sv()).await.unwrap();
        room.update(member_a.conn, a.add_node("n1")).await.unwrap();
        room.presence(
            member_a.conn,
            PresenceUpdate {
                replica: a.replica(),
                clock: 1,
                state: Some(PresenceState {
                    user: None,
                    cursor: Some(Cursor { x: 1.0, y: 2.0 }),
                }),
            },
        )
        .await
        .unwrap();

        let mut b = Writer::new(2);
        let mut member_b = room.join(b.replica(), empty_sv()).await.unwrap();
        let frames = drain(&mut member_b.frames);
        assert_eq!(frames.len(), 3);

        let ServerFrame::Update { origin, update } = &frames[0] else {
            panic!("expected catch-up update, got {:?}", frames[0]);
        };
        assert_eq!(*origin, ReplicaId::RELAY);
        b.doc.apply_remote_bytes(update, *origin).unwrap();
        assert_eq!(b.doc.to_snapshot(), a.doc.to_snapshot());

        let ServerFrame::Presence(table) = &frames[1] else {
            panic!("expected presence table");
        };
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].replica, a.replica());
        assert!(matches!(frames[2], ServerFrame::SyncComplete { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_broadcasts_presence_removal() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store);
        let member_a = room.join(ReplicaId::new(1), empty_sv()).await.unwrap();
        let mut member_b = room.join(ReplicaId::new(2), empty_sv()).await.unwrap();
        room.presence(
            member_a.conn,
            PresenceUpdate {
                replica: ReplicaId::new(1),
                clock: 1,
                state: Some(PresenceState::default()),
            },
        )
        .await
        .unwrap();
        room.leave(member_a.conn).await.unwrap();
        room.members().await.unwrap();

        let frames = drain(&mut member_b.frames);
        assert_eq!(
            frames.last(),
            Some(&ServerFrame::Presence(vec![PresenceUpdate::removed(ReplicaId::new(1))]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spoofed_presence_dropped() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store);
        let member_a = room.join(ReplicaId::new(1), empty_sv()).await.unwrap();
        let mut member_b = room.join(ReplicaId::new(2), empty_sv()).await.unwrap();
        drain(&mut member_b.frames);
        room.presence(
            member_a.conn,
            PresenceUpdate {
                replica: ReplicaId::new(2),
                clock: 9,
                state: Some(PresenceState::default()),
            },
        )
        .await
        .unwrap();
        room.members().await.unwrap();
        assert!(drain(&mut member_b.frames).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_is_disconnected() {
        let store = Arc::new(MemoryStore::new());
        let name = RoomName::for_document(&DocumentId::new("p1"));
        let room = spawn_room(
            name,
            1,
            store,
            RoomSettings {
                debounce: DEBOUNCE,
                outbound_capacity: 4,
            },
            None,
        );
        let mut writer = Writer::new(1);
        let fast = room.join(writer.replica(), empty_sv()).await.unwrap();
        // Never reads its frames.
        let _slow = room.join(ReplicaId::new(2), empty_sv()).await.unwrap();
        assert_eq!(room.members().await.unwrap(), 2);

        room.update(fast.conn, writer.add_node("n0")).await.unwrap();
        for i in 1..8 {
            room.update(fast.conn, writer.move_node("n0", i as f64)).await.unwrap();
        }
        assert_eq!(room.members().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_leave_flushes_and_closes() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store.clone());
        let mut writer = Writer::new(1);
        let member = room.join(writer.replica(), empty_sv()).await.unwrap();
        room.update(member.conn, writer.add_node("n1")).await.unwrap();
        room.leave(member.conn).await.unwrap();

        // Closed rooms turn joins away.
        let rejoin = room.join(ReplicaId::new(3), empty_sv()).await;
        assert!(matches!(rejoin, Err(RoomError::Closed)));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_state_vector_rejected() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store);
        let _keep = room.join(ReplicaId::new(1), empty_sv()).await.unwrap();
        let result = room.join(ReplicaId::new(2), vec![0xff; 4]).await;
        assert!(matches!(result, Err(RoomError::Crdt(_))));
        assert_eq!(room.members().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_first_join_keeps_room_open() {
        let store = Arc::new(MemoryStore::new());
        let room = room_with(store);
        let result = room.join(ReplicaId::new(1), vec![0xff; 4]).await;
        assert!(matches!(result, Err(RoomError::Crdt(_))));
        assert_eq!(room.members().await.unwrap(), 0);
        assert!(!room.is_closed());

        let member = room.join(ReplicaId::new(2), empty_sv()).await.unwrap();
        assert_eq!(member.conn, 1);
        assert_eq!(room.members().await.unwrap(), 1);
    }
}
