//! Replica actor: owns a [`SyncedCanvas`] and its relay connection.
//!
//! Provides a `Send + Sync` [`ReplicaHandle`]. The actor runs as a tokio
//! task, processing commands sequentially from an mpsc channel while keeping
//! a TCP connection to the relay with auto-reconnect. Local edits keep
//! working while disconnected; they reach the relay in the next handshake.
//!
//! ```text
//!   ReplicaHandle (Clone)        mpsc       ReplicaActor (tokio task)
//!   ┌─────────────────────┐  ────────▶  ┌──────────────────────────────┐
//!   │ .apply_node_changes │             │ SyncedCanvas + Awareness     │
//!   │ .set_cursor()       │  ◀────────  │ framed TCP to the relay      │
//!   │ .snapshot()         │   oneshot   │ reconnect with backoff       │
//!   └─────────────────────┘             └──────────────────────────────┘
//! ```
//!
//! Handshake per connection: `Hello{state_vector}` → relay sends the ops we
//! lack and its presence table → `SyncComplete{state_vector}` → we send the
//! ops the relay lacks and run the initial-sync policy.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, trace, warn};
use weft_crdt::VersionVector;
use weft_types::{
    CanvasSnapshot, ClientFrame, Connection, Cursor, EdgeId, MAX_FRAME_LEN, NodeId,
    PresenceField, PresenceUpdate, ReplicaId, ServerFrame, UserInfo, WireError,
};

use crate::canvas::{AdapterError, RemoteChange, SyncedCanvas};
use crate::changes::{EdgeChange, NodeChange};
use crate::config::ReplicaConfig;
use crate::constants::{CONNECT_TIMEOUT, EVENT_CAPACITY};
use crate::cursor::CursorThrottle;
use crate::presence::{Awareness, Collaborator, RemoteCursor};
use crate::subscriptions::{ConnectionStatus, ReplicaEvent};
use crate::sync::SyncResult;

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

// ============================================================================
// Error Type
// ============================================================================

/// Errors from the actor system.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("relay refused: {0}")]
    Relay(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("actor shut down")]
    Shutdown,
}

// ============================================================================
// Commands (internal)
// ============================================================================

type CanvasJob = Box<dyn FnOnce(&mut SyncedCanvas) + Send>;

/// Internal command sent from ReplicaHandle → ReplicaActor via mpsc.
enum ReplicaCommand {
    WithCanvas(CanvasJob),
    SetCursor { cursor: Option<Cursor> },
    SetUser { user: UserInfo },
    Collaborators {
        reply: oneshot::Sender<Vec<Collaborator>>,
    },
    RemoteCursors {
        reply: oneshot::Sender<Vec<RemoteCursor>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Flow {
    Continue,
    Shutdown,
}

// ============================================================================
// ReplicaHandle (Send + Sync public API)
// ============================================================================

/// Handle to a replica actor. Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct ReplicaHandle {
    replica: ReplicaId,
    tx: mpsc::UnboundedSender<ReplicaCommand>,
    events: broadcast::Sender<ReplicaEvent>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ReplicaHandle {
    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Wait until the actor has completed a sync round with the relay.
    pub async fn wait_synced(&self) -> Result<(), ActorError> {
        let mut status = self.status.clone();
        status
            .wait_for(ConnectionStatus::is_synced)
            .await
            .map(|_| ())
            .map_err(|_| ActorError::Shutdown)
    }

    /// Run `f` against the canvas inside the actor.
    pub async fn with_canvas<R, F>(&self, f: F) -> Result<R, ActorError>
    where
        R: Send + 'static,
        F: FnOnce(&mut SyncedCanvas) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: CanvasJob = Box::new(move |canvas| {
            let _ = reply.send(f(canvas));
        });
        self.tx
            .send(ReplicaCommand::WithCanvas(job))
            .map_err(|_| ActorError::Shutdown)?;
        rx.await.map_err(|_| ActorError::Shutdown)
    }

    // ── Canvas ───────────────────────────────────────────────────────────

    pub async fn apply_node_changes(&self, changes: Vec<NodeChange>) -> Result<(), ActorError> {
        Ok(self
            .with_canvas(move |canvas| canvas.apply_node_changes(changes))
            .await??)
    }

    pub async fn apply_edge_changes(&self, changes: Vec<EdgeChange>) -> Result<(), ActorError> {
        Ok(self
            .with_canvas(move |canvas| canvas.apply_edge_changes(changes))
            .await??)
    }

    pub async fn connect(&self, connection: Connection) -> Result<EdgeId, ActorError> {
        Ok(self
            .with_canvas(move |canvas| canvas.connect(connection))
            .await??)
    }

    pub async fn edit_text(
        &self,
        node: NodeId,
        index: usize,
        delete: usize,
        insert: String,
    ) -> Result<String, ActorError> {
        Ok(self
            .with_canvas(move |canvas| canvas.edit_text(&node, index, delete, &insert, None))
            .await??)
    }

    /// The rendered node and edge lists.
    pub async fn snapshot(&self) -> Result<CanvasSnapshot, ActorError> {
        self.with_canvas(|canvas| canvas.view_snapshot()).await
    }

    // ── Presence ─────────────────────────────────────────────────────────

    /// Move (or hide, with `None`) the local cursor. Samples are throttled.
    pub fn set_cursor(&self, cursor: Option<Cursor>) -> Result<(), ActorError> {
        self.tx
            .send(ReplicaCommand::SetCursor { cursor })
            .map_err(|_| ActorError::Shutdown)
    }

    pub fn set_user(&self, user: UserInfo) -> Result<(), ActorError> {
        self.tx
            .send(ReplicaCommand::SetUser { user })
            .map_err(|_| ActorError::Shutdown)
    }

    pub async fn collaborators(&self) -> Result<Vec<Collaborator>, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ReplicaCommand::Collaborators { reply })
            .map_err(|_| ActorError::Shutdown)?;
        rx.await.map_err(|_| ActorError::Shutdown)
    }

    pub async fn remote_cursors(&self) -> Result<Vec<RemoteCursor>, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ReplicaCommand::RemoteCursors { reply })
            .map_err(|_| ActorError::Shutdown)?;
        rx.await.map_err(|_| ActorError::Shutdown)
    }

    /// Stop the actor. Pending local edits that never reached the relay are lost.
    pub async fn shutdown(&self) -> Result<(), ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ReplicaCommand::Shutdown { reply })
            .map_err(|_| ActorError::Shutdown)?;
        rx.await.map_err(|_| ActorError::Shutdown)
    }
}

// ============================================================================
// ReplicaActor (internal)
// ============================================================================

struct ReplicaActor {
    config: ReplicaConfig,
    canvas: SyncedCanvas,
    awareness: Awareness,
    cursor: CursorThrottle,
    /// Latest local presence not yet sent. Each update carries the full
    /// local state, so only the newest matters.
    pending_presence: Option<PresenceUpdate>,
    events: broadcast::Sender<ReplicaEvent>,
    status: watch::Sender<ConnectionStatus>,
}

async fn send_frame(transport: &mut Transport, frame: &ClientFrame) -> Result<(), ActorError> {
    let bytes = frame.encode()?;
    transport
        .send(Bytes::from(bytes))
        .await
        .map_err(|e| ActorError::ConnectionLost(e.to_string()))
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl ReplicaActor {
    fn publish(&self, event: ReplicaEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status.clone());
        self.publish(ReplicaEvent::Status(status));
    }

    fn publish_remote(&self, change: RemoteChange) {
        if !change.texts.is_empty() {
            self.publish(ReplicaEvent::TextChanged(change.texts));
        }
        if !matches!(change.result, SyncResult::Skipped { .. }) {
            self.publish(ReplicaEvent::ViewChanged(change.result));
        }
    }

    fn set_local_presence(&mut self, field: PresenceField) {
        let update = self.awareness.set_local(field);
        self.pending_presence = Some(update);
    }

    fn handle_command(&mut self, cmd: ReplicaCommand) -> Flow {
        match cmd {
            ReplicaCommand::WithCanvas(job) => job(&mut self.canvas),
            ReplicaCommand::SetCursor { cursor: None } => {
                self.cursor.reset();
                self.set_local_presence(PresenceField::Cursor(None));
            }
            ReplicaCommand::SetCursor {
                cursor: Some(cursor),
            } => {
                if let Some(sample) = self.cursor.offer(cursor, Instant::now()) {
                    self.set_local_presence(PresenceField::Cursor(Some(sample)));
                }
            }
            ReplicaCommand::SetUser { user } => {
                self.set_local_presence(PresenceField::User(user));
            }
            ReplicaCommand::Collaborators { reply } => {
                let _ = reply.send(self.awareness.collaborators());
            }
            ReplicaCommand::RemoteCursors { reply } => {
                let _ = reply.send(self.awareness.remote_cursors());
            }
            ReplicaCommand::Shutdown { reply } => {
                let _ = reply.send(());
                return Flow::Shutdown;
            }
        }
        Flow::Continue
    }

    /// Timer work shared by the online and offline loops.
    fn on_timers(&mut self, now: Instant) {
        if let Err(e) = self.canvas.flush_drags(now) {
            warn!(error = %e, "failed to commit drag positions");
        }
        if let Some(sample) = self.cursor.poll(now) {
            self.set_local_presence(PresenceField::Cursor(Some(sample)));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.canvas.drag_deadline(), self.cursor.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ── Connection ───────────────────────────────────────────────────────

    async fn connect(&mut self) -> Result<Transport, ActorError> {
        let stream = TcpStream::connect(self.config.relay_addr.as_str())
            .await
            .map_err(|e| ActorError::ConnectionLost(format!("connect {}: {e}", self.config.relay_addr)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ActorError::ConnectionLost(e.to_string()))?;
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec();
        let mut transport = Framed::new(stream, codec);

        let state_vector = self
            .canvas
            .document()
            .encode_state_vector()
            .map_err(AdapterError::from)?;
        send_frame(
            &mut transport,
            &ClientFrame::Hello {
                room: self.config.room(),
                replica: self.canvas.replica(),
                state_vector,
            },
        )
        .await?;
        let presence = self.awareness.current_update();
        send_frame(&mut transport, &ClientFrame::Presence(presence)).await?;
        self.pending_presence = None;
        Ok(transport)
    }

    /// Serve one connection until it drops or the actor shuts down.
    async fn session(
        &mut self,
        transport: &mut Transport,
        rx: &mut mpsc::UnboundedReceiver<ReplicaCommand>,
    ) -> Result<Flow, ActorError> {
        let mut synced = false;
        loop {
            if synced {
                self.flush_outgoing(transport).await?;
            }

            tokio::select! {
                frame = transport.next() => {
                    let bytes = match frame {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => return Err(ActorError::ConnectionLost(e.to_string())),
                        None => return Err(ActorError::ConnectionLost("relay closed the connection".into())),
                    };
                    let frame = match ServerFrame::decode(&bytes) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "dropping undecodable frame");
                            continue;
                        }
                    };
                    if self.on_frame(transport, frame).await? {
                        synced = true;
                    }
                }
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { return Ok(Flow::Shutdown) };
                    if let Flow::Shutdown = self.handle_command(cmd) {
                        return Ok(Flow::Shutdown);
                    }
                }
                _ = wait_until(self.next_deadline()) => {
                    self.on_timers(Instant::now());
                }
            }
        }
    }

    /// Handle one relay frame. Returns true when a sync round completed.
    async fn on_frame(&mut self, transport: &mut Transport, frame: ServerFrame) -> Result<bool, ActorError> {
        match frame {
            ServerFrame::Update { origin, update } => {
                match self.canvas.apply_remote_bytes(&update, origin) {
                    Ok(change) => self.publish_remote(change),
                    Err(e) => warn!(%origin, error = %e, "dropping remote update"),
                }
                Ok(false)
            }
            ServerFrame::Presence(updates) => {
                let change = self.awareness.apply_remote(&updates);
                if !change.is_empty() {
                    self.publish(ReplicaEvent::PresenceChanged(change));
                }
                Ok(false)
            }
            ServerFrame::SyncComplete { state_vector } => {
                let relay_has = VersionVector::decode(&state_vector).map_err(AdapterError::from)?;
                let result = self.canvas.on_synced()?;
                // Everything the relay lacks, including edits made while
                // offline, goes out in one update.
                self.canvas.take_outgoing();
                let missing = self.canvas.document().ops_since(&relay_has);
                if !missing.is_empty() {
                    debug!(ops = missing.len(), "sending ops the relay lacks");
                    let update = missing.encode().map_err(AdapterError::from)?;
                    send_frame(transport, &ClientFrame::Update { update }).await?;
                }
                info!(
                    replica = %self.canvas.replica(),
                    document = %self.config.document,
                    ?result,
                    "synced with relay"
                );
                self.publish(ReplicaEvent::ViewChanged(result));
                self.set_status(ConnectionStatus::Synced);
                Ok(true)
            }
            ServerFrame::Error { message } => Err(ActorError::Relay(message)),
        }
    }

    async fn flush_outgoing(&mut self, transport: &mut Transport) -> Result<(), ActorError> {
        for update in self.canvas.take_outgoing() {
            let update = update.encode().map_err(AdapterError::from)?;
            trace!(bytes = update.len(), "sending local update");
            send_frame(transport, &ClientFrame::Update { update }).await?;
        }
        if let Some(presence) = self.pending_presence.take() {
            send_frame(transport, &ClientFrame::Presence(presence)).await?;
        }
        Ok(())
    }

    /// Keep serving commands while waiting to reconnect.
    async fn wait_offline(
        &mut self,
        delay: std::time::Duration,
        rx: &mut mpsc::UnboundedReceiver<ReplicaCommand>,
    ) -> Flow {
        let backoff = sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => return Flow::Continue,
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { return Flow::Shutdown };
                    if let Flow::Shutdown = self.handle_command(cmd) {
                        return Flow::Shutdown;
                    }
                }
                _ = wait_until(self.next_deadline()) => {
                    self.on_timers(Instant::now());
                }
            }
        }
    }

    /// Connect, serve, reconnect, until shut down.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ReplicaCommand>) {
        let mut attempt: u32 = 0;
        loop {
            self.set_status(ConnectionStatus::Connecting);
            let outcome = match timeout(CONNECT_TIMEOUT, self.connect()).await {
                Ok(Ok(mut transport)) => {
                    attempt = 0;
                    self.set_status(ConnectionStatus::Connected);
                    info!(relay = %self.config.relay_addr, room = %self.config.room(), "connected");
                    self.session(&mut transport, &mut rx).await
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ActorError::ConnectionLost("connect timed out".into())),
            };

            match outcome {
                Ok(Flow::Shutdown) => break,
                Ok(Flow::Continue) => {}
                Err(e) => {
                    warn!(error = %e, attempt, "connection to relay lost");
                    self.set_status(ConnectionStatus::Error(e.to_string()));
                }
            }

            // Remote presence is only valid while connected.
            let change = self.awareness.clear_remote();
            if !change.is_empty() {
                self.publish(ReplicaEvent::PresenceChanged(change));
            }
            self.set_status(ConnectionStatus::Disconnected);

            let delay = self.config.backoff(attempt);
            attempt = attempt.saturating_add(1);
            self.set_status(ConnectionStatus::Reconnecting { attempt, delay });
            if let Flow::Shutdown = self.wait_offline(delay, &mut rx).await {
                break;
            }
        }
        debug!(replica = %self.canvas.replica(), "replica actor shutting down");
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Spawn a replica for `config.document`, showing `seed` until the first
/// sync. Must be called within a tokio runtime.
pub fn spawn_replica(config: ReplicaConfig, seed: CanvasSnapshot) -> ReplicaHandle {
    spawn_replica_with(config, SyncedCanvas::new(ReplicaId::random(), seed))
}

/// Spawn a replica around an existing canvas (custom policy, fixed replica id).
pub fn spawn_replica_with(config: ReplicaConfig, canvas: SyncedCanvas) -> ReplicaHandle {
    let replica = canvas.replica();
    let canvas = canvas.with_drag_interval(config.drag_interval);
    let (tx, rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let (status, status_rx) = watch::channel(ConnectionStatus::Connecting);

    let mut awareness = Awareness::new(replica);
    awareness.set_local(PresenceField::User(config.user.clone()));

    let actor = ReplicaActor {
        cursor: CursorThrottle::new(config.cursor_interval),
        config,
        canvas,
        awareness,
        pending_presence: None,
        events: events.clone(),
        status,
    };
    tokio::spawn(actor.run(rx));
    ReplicaHandle {
        replica,
        tx,
        events,
        status: status_rx,
    }
}
