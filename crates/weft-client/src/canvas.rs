//! The local view adapter: a rendered canvas kept in step with the
//! replicated document.
//!
//! ```text
//!   UI change sets ──▶ view lists (immediately)
//!                 └──▶ document transaction (own origin) ──▶ outbox ──▶ relay
//!
//!   relay update ──▶ document ──▶ change event ──▶ origin check
//!                                                 └─▶ regression guard ──▶ view lists
//! ```
//!
//! The view lists are what the UI renders. Local edits land there first and
//! are mirrored into the document under this replica's origin; the
//! resulting [`Update`]s queue in an outbox for the transport. Remote
//! changes rebuild the affected list from the document, subject to
//! [`SyncManager`]'s guard.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use weft_crdt::{
    ApplyOutcome, CanvasDocument, ChangeEvent, Collection, CrdtError, FieldValue, OpId, RecordInit,
    TextAttrs, TextRun, Transaction, Update,
};
use weft_types::{
    CanvasSnapshot, Connection, Edge, EdgeId, EdgeKind, JsonMap, Node, NodeId, NodeKind, Position,
    ReplicaId, text_field_name,
};

use crate::changes::{self, EdgeChange, NodeChange};
use crate::constants::{CLONE_OFFSET, DRAG_COMMIT_INTERVAL};
use crate::drag::DragCoalescer;
use crate::graph::{AllowAll, ConnectionPolicy, Rejection, validate_connection};
use crate::sync::{SkipReason, SyncError, SyncManager, SyncResult};

// ============================================================================
// Errors
// ============================================================================

/// A local edit the adapter refused. Nothing was written when this is returned.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("connection rejected: {0}")]
    Rejected(Rejection),
    #[error("invalid node {id}: {reason}")]
    InvalidNode { id: NodeId, reason: String },
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error(transparent)]
    Crdt(#[from] CrdtError),
}

impl From<Rejection> for AdapterError {
    fn from(rejection: Rejection) -> Self {
        AdapterError::Rejected(rejection)
    }
}

/// What processing pending document events did to the view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteChange {
    pub result: SyncResult,
    /// Text fields changed by other replicas.
    pub texts: Vec<String>,
}

// ============================================================================
// Node validation
// ============================================================================

fn expect_string(data: &JsonMap, key: &str) -> Result<(), String> {
    match data.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(format!("data.{key} must be a string")),
    }
}

/// Check the per-kind shape of `data`. The document itself accepts anything.
fn validate_data(kind: NodeKind, data: &JsonMap) -> Result<(), String> {
    match kind {
        NodeKind::Text | NodeKind::Code => {
            expect_string(data, "text")?;
            match data.get("content") {
                None | Some(Value::Null | Value::String(_) | Value::Object(_)) => Ok(()),
                Some(_) => Err("data.content must be a string or a document".into()),
            }
        }
        NodeKind::Image | NodeKind::Audio | NodeKind::Video | NodeKind::File => {
            expect_string(data, "url")?;
            expect_string(data, "name")
        }
        NodeKind::Drop => match data.get("isSource") {
            None | Some(Value::Bool(_)) => Ok(()),
            Some(_) => Err("data.isSource must be a boolean".into()),
        },
    }
}

pub fn validate_node(node: &Node) -> Result<NodeKind, AdapterError> {
    let invalid = |reason: String| AdapterError::InvalidNode {
        id: node.id.clone(),
        reason,
    };
    let kind = node
        .kind()
        .ok_or_else(|| invalid(format!("unknown node type {:?}", node.node_type)))?;
    if !node.position.x.is_finite() || !node.position.y.is_finite() {
        return Err(invalid("position must be finite".into()));
    }
    validate_data(kind, &node.data).map_err(invalid)?;
    Ok(kind)
}

// ============================================================================
// Document writes
// ============================================================================

type CrdtResult<T> = weft_crdt::Result<T>;

fn find_element(tx: &Transaction<'_>, collection: Collection, id: &str) -> Option<OpId> {
    let found = tx.doc().find_record(collection, id).map(|r| r.element);
    if found.is_none() {
        debug!(%collection, id, "record not in document, skipping write");
    }
    found
}

fn edges_touching(tx: &Transaction<'_>, nodes: &HashSet<&str>) -> Vec<OpId> {
    tx.doc()
        .records(Collection::Edges)
        .filter(|(_, record)| {
            ["source", "target"].iter().any(|end| {
                record
                    .field(end)
                    .and_then(FieldValue::as_str)
                    .is_some_and(|id| nodes.contains(id))
            })
        })
        .map(|(element, _)| element)
        .collect()
}

fn write_position(
    tx: &mut Transaction<'_>,
    id: &NodeId,
    position: Position,
    dragging: Option<bool>,
) -> CrdtResult<()> {
    let Some(element) = find_element(tx, Collection::Nodes, id.as_str()) else {
        return Ok(());
    };
    tx.set_key(Collection::Nodes, element, "position", "x", Some(position.x.into()))?;
    tx.set_key(Collection::Nodes, element, "position", "y", Some(position.y.into()))?;
    if let Some(dragging) = dragging {
        tx.set_field(Collection::Nodes, element, "dragging", Some(dragging.into()))?;
    }
    Ok(())
}

fn write_selected(
    tx: &mut Transaction<'_>,
    collection: Collection,
    id: &str,
    selected: bool,
) -> CrdtResult<()> {
    if let Some(element) = find_element(tx, collection, id) {
        tx.set_field(collection, element, "selected", Some(selected.into()))?;
    }
    Ok(())
}

fn write_node_change(tx: &mut Transaction<'_>, change: &NodeChange) -> CrdtResult<()> {
    match change {
        NodeChange::Add(node) => {
            tx.push_record(Collection::Nodes, RecordInit::from_serialize(node)?)?;
        }
        NodeChange::Remove(id) => {
            if let Some(element) = find_element(tx, Collection::Nodes, id.as_str()) {
                tx.delete_record(Collection::Nodes, element)?;
            }
            let removed = HashSet::from([id.as_str()]);
            for edge in edges_touching(tx, &removed) {
                tx.delete_record(Collection::Edges, edge)?;
            }
        }
        NodeChange::Position {
            id,
            position,
            dragging,
        } => write_position(tx, id, *position, *dragging)?,
        NodeChange::Select { id, selected } => {
            write_selected(tx, Collection::Nodes, id.as_str(), *selected)?
        }
        NodeChange::Replace(node) => {
            if let Some(found) = tx.doc().find_record(Collection::Nodes, node.id.as_str()) {
                tx.delete_record(Collection::Nodes, found.element)?;
                tx.insert_record(
                    Collection::Nodes,
                    found.index,
                    RecordInit::from_serialize(node)?,
                )?;
            }
        }
    }
    Ok(())
}

fn write_edge_change(tx: &mut Transaction<'_>, change: &EdgeChange) -> CrdtResult<()> {
    match change {
        EdgeChange::Add(edge) => {
            tx.push_record(Collection::Edges, RecordInit::from_serialize(edge)?)?;
        }
        EdgeChange::Remove(id) => {
            if let Some(element) = find_element(tx, Collection::Edges, id.as_str()) {
                tx.delete_record(Collection::Edges, element)?;
            }
        }
        EdgeChange::Select { id, selected } => {
            write_selected(tx, Collection::Edges, id.as_str(), *selected)?
        }
    }
    Ok(())
}

// ============================================================================
// SyncedCanvas
// ============================================================================

pub struct SyncedCanvas {
    doc: CanvasDocument,
    events: broadcast::Receiver<ChangeEvent>,
    sync: SyncManager,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    /// Cold-start content, written into an empty document on first sync.
    seed: CanvasSnapshot,
    outbox: VecDeque<Update>,
    clipboard: Vec<Node>,
    drags: DragCoalescer,
    policy: Box<dyn ConnectionPolicy>,
}

impl SyncedCanvas {
    /// A canvas rendering `seed` until the first sync completes.
    pub fn new(replica: ReplicaId, seed: CanvasSnapshot) -> Self {
        let doc = CanvasDocument::new(replica);
        let events = doc.subscribe();
        Self {
            doc,
            events,
            sync: SyncManager::new(replica),
            nodes: seed.nodes.clone(),
            edges: seed.edges.clone(),
            seed,
            outbox: VecDeque::new(),
            clipboard: Vec::new(),
            drags: DragCoalescer::new(DRAG_COMMIT_INTERVAL),
            policy: Box::new(AllowAll),
        }
    }

    pub fn with_policy(mut self, policy: impl ConnectionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_drag_interval(mut self, interval: std::time::Duration) -> Self {
        self.drags = DragCoalescer::new(interval);
        self
    }

    pub fn replica(&self) -> ReplicaId {
        self.doc.replica()
    }

    pub fn document(&self) -> &CanvasDocument {
        &self.doc
    }

    pub fn sync_state(&self) -> &SyncManager {
        &self.sync
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// The rendered lists as a snapshot.
    pub fn view_snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot::new(self.nodes.clone(), self.edges.clone())
    }

    // ── Outbox ───────────────────────────────────────────────────────────

    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Updates produced by local edits, oldest first.
    pub fn take_outgoing(&mut self) -> Vec<Update> {
        self.outbox.drain(..).collect()
    }

    /// Run a transaction under this replica's origin and queue its update.
    fn commit<R>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> CrdtResult<R>,
    ) -> Result<R, AdapterError> {
        let origin = self.doc.replica();
        let (result, update) = self.doc.transact(origin, f);
        if !update.is_empty() {
            trace!(replica = %origin, ops = update.len(), "local update queued");
            self.outbox.push_back(update);
        }
        self.sync
            .record_local(Collection::Nodes, self.doc.len(Collection::Nodes));
        self.sync
            .record_local(Collection::Edges, self.doc.len(Collection::Edges));
        if let Err(e) = &result {
            // Ops before the failure are committed and queued; the view
            // has to show exactly those.
            debug!(error = %e, "local edit failed partway, realigning view");
            self.realign_view();
        }
        Ok(result?)
    }

    /// Rebuild both lists from the document, bypassing the remote guard.
    fn realign_view(&mut self) {
        self.nodes = self.doc.nodes();
        self.overlay_drags();
        self.edges = self.doc.edges();
        self.sync
            .record_rendered(Collection::Nodes, self.doc.len(Collection::Nodes));
        self.sync
            .record_rendered(Collection::Edges, self.doc.len(Collection::Edges));
    }

    /// Uncommitted drag positions stay where the pointer is.
    fn overlay_drags(&mut self) {
        for (id, position) in self.drags.pending() {
            if let Some(node) = self.nodes.iter_mut().find(|n| &n.id == id) {
                node.position = *position;
            }
        }
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Apply UI node changes to the view and the document.
    ///
    /// Position changes with `dragging == Some(true)` update the view at
    /// once but reach the document through the drag coalescer.
    pub fn apply_node_changes(&mut self, changes: Vec<NodeChange>) -> Result<(), AdapterError> {
        for change in &changes {
            if let NodeChange::Add(node) | NodeChange::Replace(node) = change {
                validate_node(node)?;
            }
        }

        changes::apply_node_changes(&changes, &mut self.nodes);
        let removed: HashSet<&NodeId> = changes
            .iter()
            .filter_map(|c| match c {
                NodeChange::Remove(id) => Some(id),
                _ => None,
            })
            .collect();
        if !removed.is_empty() {
            self.edges
                .retain(|e| !removed.contains(&e.source) && !removed.contains(&e.target));
        }

        let mut writes = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                NodeChange::Position {
                    id,
                    position,
                    dragging: Some(true),
                } => self.drags.record(id, position),
                NodeChange::Position {
                    id,
                    position,
                    dragging,
                } => {
                    self.drags.forget(&id);
                    writes.push(NodeChange::Position {
                        id,
                        position,
                        dragging,
                    });
                }
                NodeChange::Remove(id) => {
                    self.drags.forget(&id);
                    writes.push(NodeChange::Remove(id));
                }
                other => writes.push(other),
            }
        }
        if !writes.is_empty() {
            self.commit(|tx| writes.iter().try_for_each(|c| write_node_change(tx, c)))?;
        }
        self.flush_drags(Instant::now())?;
        Ok(())
    }

    /// Apply UI edge changes to the view and the document. Added edges are
    /// validated in order; one rejection refuses the whole batch.
    pub fn apply_edge_changes(&mut self, changes: Vec<EdgeChange>) -> Result<(), AdapterError> {
        let mut proposed = self.edges.clone();
        for change in &changes {
            match change {
                EdgeChange::Add(edge) => {
                    let connection = Connection::new(edge.source.clone(), edge.target.clone());
                    validate_connection(&self.nodes, &proposed, &connection, self.policy.as_ref())?;
                    proposed.push(edge.clone());
                }
                EdgeChange::Remove(id) => proposed.retain(|e| &e.id != id),
                EdgeChange::Select { .. } => {}
            }
        }

        changes::apply_edge_changes(&changes, &mut self.edges);
        self.commit(|tx| changes.iter().try_for_each(|c| write_edge_change(tx, c)))
    }

    /// Whether `connection` may become an edge. Evaluated fresh each call.
    pub fn is_valid_connection(&self, connection: &Connection) -> bool {
        self.check_connection(connection).is_ok()
    }

    pub fn check_connection(&self, connection: &Connection) -> Result<(), Rejection> {
        validate_connection(&self.nodes, &self.edges, connection, self.policy.as_ref())
    }

    /// Validate and create an animated edge.
    pub fn connect(&mut self, connection: Connection) -> Result<EdgeId, AdapterError> {
        self.check_connection(&connection)?;
        let edge = Edge::new(
            EdgeId::generate(),
            connection.source,
            connection.target,
            EdgeKind::Animated,
        );
        let id = edge.id.clone();
        self.edges.push(edge.clone());
        self.commit(|tx| write_edge_change(tx, &EdgeChange::Add(edge)))?;
        Ok(id)
    }

    /// Create a node of `kind`. Position defaults to the origin.
    pub fn add_node(
        &mut self,
        kind: NodeKind,
        data: JsonMap,
        position: Option<Position>,
    ) -> Result<NodeId, AdapterError> {
        let node = Node::new(NodeId::generate(), kind, position.unwrap_or(Position::ORIGIN))
            .with_data(data);
        let id = node.id.clone();
        self.apply_node_changes(vec![NodeChange::Add(node)])?;
        Ok(id)
    }

    /// Merge `partial` into a node's `data`, key by key.
    pub fn update_node_data(&mut self, id: &NodeId, partial: JsonMap) -> Result<(), AdapterError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| AdapterError::UnknownNode(id.clone()))?;
        if let Some(kind) = node.kind() {
            let mut merged = node.data.clone();
            merged.extend(partial.clone());
            validate_data(kind, &merged).map_err(|reason| AdapterError::InvalidNode {
                id: id.clone(),
                reason,
            })?;
        }
        node.data.extend(partial.clone());

        self.commit(|tx| {
            let Some(element) = find_element(tx, Collection::Nodes, id.as_str()) else {
                return Ok(());
            };
            for (key, value) in &partial {
                tx.set_key(Collection::Nodes, element, "data", key, Some(value.into()))?;
            }
            Ok(())
        })
    }

    fn set_view_selected(&mut self, id: &NodeId, selected: bool) {
        if let Some(node) = self.nodes.iter_mut().find(|n| &n.id == id) {
            node.selected = Some(selected);
        }
    }

    /// Clone a node with a fresh id, offset and selected, linked from the
    /// original by a temporary edge. The original is deselected.
    pub fn duplicate_node(&mut self, id: &NodeId) -> Result<NodeId, AdapterError> {
        let original = self
            .node(id)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownNode(id.clone()))?;
        let mut clone = original.clone();
        clone.id = NodeId::generate();
        clone.position = original.position.offset(CLONE_OFFSET, CLONE_OFFSET);
        clone.selected = Some(true);
        clone.dragging = None;
        validate_node(&clone)?;

        let link = Edge::new(
            EdgeId::generate(),
            original.id.clone(),
            clone.id.clone(),
            EdgeKind::Temporary,
        );
        let new_id = clone.id.clone();

        self.nodes.push(clone.clone());
        self.set_view_selected(id, false);
        self.edges.push(link.clone());

        self.commit(|tx| {
            write_node_change(tx, &NodeChange::Add(clone))?;
            write_selected(tx, Collection::Nodes, original.id.as_str(), false)?;
            write_edge_change(tx, &EdgeChange::Add(link))
        })?;
        debug!(from = %id, to = %new_id, "duplicated node");
        Ok(new_id)
    }

    /// Duplicate every selected node.
    pub fn duplicate_selection(&mut self) -> Result<Vec<NodeId>, AdapterError> {
        let selected: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.is_selected())
            .map(|n| n.id.clone())
            .collect();
        selected.iter().map(|id| self.duplicate_node(id)).collect()
    }

    pub fn select_all(&mut self) -> Result<(), AdapterError> {
        for node in &mut self.nodes {
            node.selected = Some(true);
        }
        self.commit(|tx| {
            let elements: Vec<OpId> = tx.doc().records(Collection::Nodes).map(|(e, _)| e).collect();
            for element in elements {
                tx.set_field(Collection::Nodes, element, "selected", Some(true.into()))?;
            }
            Ok(())
        })
    }

    /// Capture the selected nodes. An empty selection keeps the previous
    /// clipboard. Returns how many nodes were captured.
    pub fn copy_selection(&mut self) -> usize {
        let selected: Vec<Node> = self.nodes.iter().filter(|n| n.is_selected()).cloned().collect();
        if !selected.is_empty() {
            self.clipboard = selected;
        }
        self.clipboard.len()
    }

    /// Insert clones of the clipboard with fresh ids and an offset. The clones
    /// become the selection.
    pub fn paste(&mut self) -> Result<Vec<NodeId>, AdapterError> {
        if self.clipboard.is_empty() {
            return Ok(Vec::new());
        }
        let clones: Vec<Node> = self
            .clipboard
            .iter()
            .map(|node| {
                let mut clone = node.clone();
                clone.id = NodeId::generate();
                clone.position = node.position.offset(CLONE_OFFSET, CLONE_OFFSET);
                clone.selected = Some(true);
                clone.dragging = None;
                clone
            })
            .collect();

        let deselected: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.is_selected())
            .map(|n| n.id.clone())
            .collect();
        for node in &mut self.nodes {
            node.selected = Some(false);
        }
        self.nodes.extend(clones.iter().cloned());
        let ids = clones.iter().map(|n| n.id.clone()).collect();

        self.commit(|tx| {
            for id in &deselected {
                write_selected(tx, Collection::Nodes, id.as_str(), false)?;
            }
            for clone in clones {
                write_node_change(tx, &NodeChange::Add(clone))?;
            }
            Ok(())
        })?;
        Ok(ids)
    }

    /// Start of a connection gesture: drop placeholder nodes and temporary
    /// edges, locally and in the document. Returns how many records went.
    pub fn connect_start(&mut self) -> Result<usize, AdapterError> {
        let before = self.nodes.len() + self.edges.len();
        self.nodes.retain(|n| n.kind() != Some(NodeKind::Drop));
        self.edges.retain(|e| e.kind != EdgeKind::Temporary);
        let live: HashSet<&NodeId> = self.nodes.iter().map(|n| &n.id).collect();
        self.edges
            .retain(|e| live.contains(&e.source) && live.contains(&e.target));
        let removed = before - self.nodes.len() - self.edges.len();

        self.commit(|tx| {
            let drops: Vec<(OpId, String)> = tx
                .doc()
                .records(Collection::Nodes)
                .filter(|(_, r)| r.field("type").and_then(FieldValue::as_str) == Some(NodeKind::Drop.as_str()))
                .map(|(e, r)| (e, r.id().unwrap_or_default().to_string()))
                .collect();
            let temporary: Vec<OpId> = tx
                .doc()
                .records(Collection::Edges)
                .filter(|(_, r)| {
                    r.field("type").and_then(FieldValue::as_str) == Some(EdgeKind::Temporary.as_str())
                })
                .map(|(e, _)| e)
                .collect();

            for (element, _) in &drops {
                tx.delete_record(Collection::Nodes, *element)?;
            }
            for element in temporary {
                tx.delete_record(Collection::Edges, element)?;
            }
            let drop_ids: HashSet<&str> = drops.iter().map(|(_, id)| id.as_str()).collect();
            for edge in edges_touching(tx, &drop_ids) {
                tx.delete_record(Collection::Edges, edge)?;
            }
            Ok(())
        })?;
        if removed > 0 {
            debug!(removed, "cleared connection scaffolding");
        }
        Ok(removed)
    }

    /// A connection dropped on empty canvas: place a drop node there and link
    /// it to `from` with a temporary edge. The edge points away from `from`
    /// when the gesture started on a source handle, towards it otherwise.
    pub fn connect_end(
        &mut self,
        from: &NodeId,
        from_is_source_handle: bool,
        drop_position: Position,
    ) -> Result<(NodeId, EdgeId), AdapterError> {
        if self.node(from).is_none() {
            return Err(AdapterError::UnknownNode(from.clone()));
        }
        let mut data = JsonMap::new();
        data.insert("isSource".into(), Value::Bool(!from_is_source_handle));
        let node = Node::new(NodeId::generate(), NodeKind::Drop, drop_position).with_data(data);
        validate_node(&node)?;

        let (source, target) = if from_is_source_handle {
            (from.clone(), node.id.clone())
        } else {
            (node.id.clone(), from.clone())
        };
        let edge = Edge::new(EdgeId::generate(), source, target, EdgeKind::Temporary);
        let ids = (node.id.clone(), edge.id.clone());

        self.nodes.push(node.clone());
        self.edges.push(edge.clone());
        self.commit(|tx| {
            write_node_change(tx, &NodeChange::Add(node))?;
            write_edge_change(tx, &EdgeChange::Add(edge))
        })?;
        Ok(ids)
    }

    /// Remove edges whose endpoints no longer exist in the view.
    pub fn prune_dangling_edges(&mut self) -> Result<usize, AdapterError> {
        let live: HashSet<&NodeId> = self.nodes.iter().map(|n| &n.id).collect();
        let dangling: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|e| !live.contains(&e.source) || !live.contains(&e.target))
            .map(|e| e.id.clone())
            .collect();
        if dangling.is_empty() {
            return Ok(0);
        }
        debug!(count = dangling.len(), "pruning dangling edges");
        let changes: Vec<EdgeChange> = dangling.into_iter().map(EdgeChange::Remove).collect();
        changes::apply_edge_changes(&changes, &mut self.edges);
        self.commit(|tx| changes.iter().try_for_each(|c| write_edge_change(tx, c)))?;
        Ok(changes.len())
    }

    // ── Drag ─────────────────────────────────────────────────────────────

    /// When pending drag positions may next be committed.
    pub fn drag_deadline(&self) -> Option<Instant> {
        self.drags.deadline()
    }

    /// Commit coalesced drag positions if the interval has elapsed.
    pub fn flush_drags(&mut self, now: Instant) -> Result<usize, AdapterError> {
        if !self.drags.is_due(now) {
            return Ok(0);
        }
        let positions = self.drags.drain(now);
        let count = positions.len();
        self.commit(|tx| {
            for (id, position) in &positions {
                write_position(tx, id, *position, Some(true))?;
            }
            Ok(())
        })?;
        trace!(count, "committed drag positions");
        Ok(count)
    }

    // =========================================================================
    // Text fields
    // =========================================================================

    fn text_node(&self, id: &NodeId) -> Result<&Node, AdapterError> {
        let node = self
            .node(id)
            .ok_or_else(|| AdapterError::UnknownNode(id.clone()))?;
        match node.kind() {
            Some(kind) if kind.has_text_field() => Ok(node),
            _ => Err(AdapterError::InvalidNode {
                id: id.clone(),
                reason: format!("{} nodes have no text field", node.node_type),
            }),
        }
    }

    /// A text node came on screen. Seeds its text field from `data.content`
    /// if the field has never been written. Returns whether it seeded.
    pub fn mount_text(&mut self, id: &NodeId) -> Result<bool, AdapterError> {
        let node = self.text_node(id)?;
        let field = text_field_name(id);
        if self.doc.text(&field).is_some() {
            return Ok(false);
        }
        let Some(content) = node
            .data
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
        else {
            return Ok(false);
        };

        self.set_view_text(id, &content);
        self.commit(|tx| {
            tx.text_insert(&field, 0, &content, None)?;
            write_plain_text(tx, id, &field)
        })?;
        debug!(node = %id, chars = content.chars().count(), "seeded text field");
        Ok(true)
    }

    /// Replace `delete` characters at `index` with `insert`. The node's
    /// `data.text` is updated with the resulting plain text in the same
    /// transaction. Returns the plain text.
    pub fn edit_text(
        &mut self,
        id: &NodeId,
        index: usize,
        delete: usize,
        insert: &str,
        attrs: Option<TextAttrs>,
    ) -> Result<String, AdapterError> {
        self.text_node(id)?;
        let field = text_field_name(id);
        let len = self.doc.text(&field).map(|t| t.len()).unwrap_or(0);
        if index > len || delete > len - index {
            return Err(CrdtError::IndexOutOfBounds {
                what: "text",
                index: index + delete,
                len,
            }
            .into());
        }

        let text = self.commit(|tx| {
            tx.text_delete(&field, index, delete)?;
            tx.text_insert(&field, index, insert, attrs)?;
            write_plain_text(tx, id, &field)?;
            Ok(tx.doc().plain_text(&field))
        })?;
        self.set_view_text(id, &text);
        Ok(text)
    }

    fn set_view_text(&mut self, id: &NodeId, text: &str) {
        if let Some(node) = self.nodes.iter_mut().find(|n| &n.id == id) {
            node.data.insert("text".into(), Value::String(text.to_string()));
        }
    }

    pub fn text(&self, id: &NodeId) -> String {
        self.doc.plain_text(&text_field_name(id))
    }

    pub fn text_runs(&self, id: &NodeId) -> Vec<TextRun> {
        self.doc
            .text(&text_field_name(id))
            .map(|t| t.runs())
            .unwrap_or_default()
    }

    // =========================================================================
    // Remote updates
    // =========================================================================

    /// Merge a remote update and bring the view up to date.
    pub fn apply_remote(&mut self, update: &Update, origin: ReplicaId) -> Result<RemoteChange, SyncError> {
        let outcome: ApplyOutcome = self.doc.apply_remote(update, origin)?;
        trace!(
            %origin,
            applied = outcome.applied,
            duplicates = outcome.duplicates,
            buffered = outcome.buffered,
            rejected = outcome.rejected,
            "remote update merged"
        );
        Ok(self.process_events())
    }

    pub fn apply_remote_bytes(&mut self, bytes: &[u8], origin: ReplicaId) -> Result<RemoteChange, SyncError> {
        let update = Update::decode(bytes)?;
        self.apply_remote(&update, origin)
    }

    /// Drain document change events and refresh the view for the ones
    /// other replicas caused.
    pub fn process_events(&mut self) -> RemoteChange {
        let mut nodes = false;
        let mut edges = false;
        let mut own = false;
        let mut texts = BTreeSet::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if self.sync.is_own_origin(event.origin) {
                        own = true;
                        continue;
                    }
                    nodes |= event.nodes;
                    edges |= event.edges;
                    texts.extend(event.texts);
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "document events lagged, refreshing whole view");
                    nodes = true;
                    edges = true;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        let result = if nodes || edges {
            self.refresh_view(nodes, edges)
        } else if own {
            SyncResult::Skipped {
                reason: SkipReason::OwnOrigin,
            }
        } else {
            SyncResult::Skipped {
                reason: SkipReason::NoViewChange,
            }
        };
        RemoteChange {
            result,
            texts: texts.into_iter().collect(),
        }
    }

    /// Rebuild the selected lists from the document, guarded.
    fn refresh_view(&mut self, nodes: bool, edges: bool) -> SyncResult {
        let mut applied = false;
        let mut skipped = None;

        if nodes {
            let len = self.doc.len(Collection::Nodes);
            match self.sync.check_remote(Collection::Nodes, len) {
                Ok(()) => {
                    self.nodes = self.doc.nodes();
                    self.overlay_drags();
                    self.sync.record_rendered(Collection::Nodes, len);
                    applied = true;
                }
                Err(reason) => skipped = Some(reason),
            }
        }
        if edges {
            let len = self.doc.len(Collection::Edges);
            match self.sync.check_remote(Collection::Edges, len) {
                Ok(()) => {
                    self.edges = self.doc.edges();
                    self.sync.record_rendered(Collection::Edges, len);
                    applied = true;
                }
                Err(reason) => skipped = skipped.or(Some(reason)),
            }
        }

        match (applied, skipped) {
            (false, Some(reason)) => SyncResult::Skipped { reason },
            (false, None) => SyncResult::Skipped {
                reason: SkipReason::NoViewChange,
            },
            (true, _) => SyncResult::Applied {
                nodes: self.nodes.len(),
                edges: self.edges.len(),
            },
        }
    }

    /// A sync round with the relay completed.
    ///
    /// The first time, an empty document is seeded from the cold-start
    /// content. Every time, the view is rebuilt from the document under the
    /// regression guard.
    pub fn on_synced(&mut self) -> Result<SyncResult, AdapterError> {
        let result = if self.sync.should_seed(self.doc.is_empty()) && !self.seed.is_empty() {
            let seed = self.seed.clone();
            let (nodes, edges) = (seed.nodes.len(), seed.edges.len());
            self.commit(|tx| {
                for node in &seed.nodes {
                    tx.push_record(Collection::Nodes, RecordInit::from_serialize(node)?)?;
                }
                for edge in &seed.edges {
                    tx.push_record(Collection::Edges, RecordInit::from_serialize(edge)?)?;
                }
                Ok(())
            })?;
            self.sync.mark_seeded();
            self.process_events();
            self.refresh_view(true, true);
            debug!(nodes, edges, "seeded empty document");
            SyncResult::Seeded { nodes, edges }
        } else {
            self.process_events();
            self.refresh_view(true, true)
        };
        self.sync.mark_initialized();
        Ok(result)
    }
}

fn write_plain_text(tx: &mut Transaction<'_>, id: &NodeId, field: &str) -> CrdtResult<()> {
    let text = tx.doc().plain_text(field);
    if let Some(element) = find_element(tx, Collection::Nodes, id.as_str()) {
        tx.set_key(Collection::Nodes, element, "data", "text", Some(text.into()))?;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, x: f64) -> Node {
        Node::new(NodeId::new(id), NodeKind::Text, Position::new(x, 0.0))
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge::new(
            EdgeId::new(id),
            NodeId::new(source),
            NodeId::new(target),
            EdgeKind::Animated,
        )
    }

    fn seed() -> CanvasSnapshot {
        CanvasSnapshot::new(vec![node("a", 0.0), node("b", 100.0)], vec![edge("e1", "a", "b")])
    }

    /// A canvas that has completed initial sync with the given seed.
    fn synced(replica: u64, seed: CanvasSnapshot) -> SyncedCanvas {
        let mut canvas = SyncedCanvas::new(ReplicaId::new(replica), seed);
        canvas.on_synced().unwrap();
        canvas
    }

    /// Deliver everything `from` has queued to `to`.
    fn deliver(from: &mut SyncedCanvas, to: &mut SyncedCanvas) -> Vec<RemoteChange> {
        let origin = from.replica();
        from.take_outgoing()
            .iter()
            .map(|u| to.apply_remote(u, origin).unwrap())
            .collect()
    }

    fn data(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_seed_once() {
        let mut canvas = SyncedCanvas::new(ReplicaId::new(1), seed());
        assert_eq!(
            canvas.on_synced().unwrap(),
            SyncResult::Seeded { nodes: 2, edges: 1 }
        );
        assert_eq!(canvas.document().len(Collection::Nodes), 2);

        // A second sync round, e.g. after reconnecting, never reseeds.
        canvas.on_synced().unwrap();
        assert_eq!(canvas.document().len(Collection::Nodes), 2);
        assert_eq!(canvas.document().len(Collection::Edges), 1);
        assert_eq!(canvas.nodes().len(), 2);
    }

    #[test]
    fn test_empty_resync_after_remote_delete_all_does_not_reseed() {
        let mut first = synced(1, seed());
        let mut second = SyncedCanvas::new(ReplicaId::new(2), CanvasSnapshot::default());
        deliver(&mut first, &mut second);
        second.on_synced().unwrap();

        second
            .apply_node_changes(vec![
                NodeChange::Remove(NodeId::new("a")),
                NodeChange::Remove(NodeId::new("b")),
            ])
            .unwrap();
        deliver(&mut second, &mut first);
        assert!(first.document().is_empty());

        // Reconnecting to a relay that now holds an empty document.
        first.on_synced().unwrap();
        assert!(first.document().is_empty());
        assert!(first.take_outgoing().is_empty());
    }

    #[test]
    fn test_edit_failing_partway_keeps_view_on_document() {
        let mut canvas = synced(1, seed());
        canvas.take_outgoing();

        // A peer's op leaves room for exactly one more local Lamport tick.
        let late = weft_crdt::Op {
            id: OpId::new(u64::MAX - 1, ReplicaId::new(9)),
            seq: 1,
            kind: weft_crdt::OpKind::Insert {
                collection: Collection::Nodes,
                after: None,
                record: RecordInit::from_serialize(&node("late", 0.0)).unwrap(),
            },
        };
        canvas
            .apply_remote(&Update::new(vec![late]), ReplicaId::new(9))
            .unwrap();

        let result = canvas.apply_node_changes(vec![
            NodeChange::Add(node("c", 10.0)),
            NodeChange::Add(node("d", 20.0)),
        ]);
        assert!(matches!(result, Err(AdapterError::Crdt(CrdtError::ClockOverflow(_)))));

        let view: Vec<&str> = canvas.nodes().iter().map(|n| n.id.as_str()).collect();
        let doc: Vec<String> = canvas
            .document()
            .nodes()
            .into_iter()
            .map(|n| n.id.into_inner())
            .collect();
        assert_eq!(view, doc);
        assert!(view.contains(&"c"));
        assert!(!view.contains(&"d"));

        // The committed half still goes out to peers.
        let queued = canvas.take_outgoing();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].len(), 1);
    }

    #[test]
    fn test_no_seed_when_relay_has_content() {
        let mut first = synced(1, seed());
        let mut second = SyncedCanvas::new(ReplicaId::new(2), seed());
        deliver(&mut first, &mut second);
        assert!(matches!(
            second.on_synced().unwrap(),
            SyncResult::Applied { nodes: 2, edges: 1 }
        ));
        assert!(second.take_outgoing().is_empty());
    }

    #[test]
    fn test_own_echo_is_not_reapplied() {
        let mut canvas = synced(1, seed());
        let updates = canvas.take_outgoing();
        canvas.apply_node_changes(vec![NodeChange::Select {
            id: NodeId::new("a"),
            selected: true,
        }]).unwrap();
        let own = canvas.replica();
        for update in &updates {
            let change = canvas.apply_remote(update, own).unwrap();
            assert!(matches!(change.result, SyncResult::Skipped { .. }));
        }
        assert_eq!(canvas.nodes().len(), 2);
        assert!(canvas.node(&NodeId::new("a")).unwrap().is_selected());
    }

    #[test]
    fn test_remote_edit_refreshes_view() {
        let mut alice = synced(1, seed());
        let mut bob = SyncedCanvas::new(ReplicaId::new(2), CanvasSnapshot::default());
        deliver(&mut alice, &mut bob);
        bob.on_synced().unwrap();

        alice
            .apply_node_changes(vec![NodeChange::Position {
                id: NodeId::new("b"),
                position: Position::new(7.0, 8.0),
                dragging: None,
            }])
            .unwrap();
        let changes = deliver(&mut alice, &mut bob);
        assert!(matches!(changes[0].result, SyncResult::Applied { .. }));
        assert_eq!(
            bob.node(&NodeId::new("b")).unwrap().position,
            Position::new(7.0, 8.0)
        );
    }

    #[test]
    fn test_remote_empty_after_sync_is_discarded() {
        let mut alice = synced(1, seed());
        let mut bob = SyncedCanvas::new(ReplicaId::new(2), CanvasSnapshot::default());
        deliver(&mut alice, &mut bob);
        bob.on_synced().unwrap();
        assert_eq!(bob.nodes().len(), 2);

        alice
            .apply_node_changes(vec![
                NodeChange::Remove(NodeId::new("a")),
                NodeChange::Remove(NodeId::new("b")),
            ])
            .unwrap();
        assert!(alice.nodes().is_empty(), "local delete-all applies");

        let changes = deliver(&mut alice, &mut bob);
        assert!(changes.iter().any(|c| matches!(
            c.result,
            SyncResult::Skipped {
                reason: SkipReason::SuspectedEmptyRegression { .. }
            }
        )));
        assert_eq!(bob.nodes().len(), 2);
        assert_eq!(bob.document().len(Collection::Nodes), 0);
    }

    #[test]
    fn test_empty_before_sync_applies() {
        let mut alice = synced(1, seed());
        let mut bob = SyncedCanvas::new(ReplicaId::new(2), CanvasSnapshot::default());
        deliver(&mut alice, &mut bob);
        assert_eq!(bob.nodes().len(), 2);

        alice
            .apply_node_changes(vec![
                NodeChange::Remove(NodeId::new("a")),
                NodeChange::Remove(NodeId::new("b")),
            ])
            .unwrap();
        deliver(&mut alice, &mut bob);
        // Bob has not finished initial sync, so the empty list is trusted.
        assert!(bob.nodes().is_empty());
        assert!(bob.edges().is_empty());
    }

    #[test]
    fn test_connect_rejects_cycle() {
        let mut canvas = synced(
            1,
            CanvasSnapshot::new(
                vec![node("A", 0.0), node("B", 0.0), node("C", 0.0), node("D", 0.0)],
                vec![edge("ab", "A", "B"), edge("bc", "B", "C")],
            ),
        );
        canvas.take_outgoing();

        let err = canvas.connect(Connection::new("C", "A")).unwrap_err();
        assert!(matches!(err, AdapterError::Rejected(Rejection::Cycle)));
        assert!(!canvas.has_outgoing(), "rejected edits write nothing");

        canvas.connect(Connection::new("D", "A")).unwrap();
        assert_eq!(canvas.edges().len(), 3);
        assert_eq!(canvas.document().len(Collection::Edges), 3);
        assert_eq!(canvas.edges()[2].kind, EdgeKind::Animated);
    }

    #[test]
    fn test_edge_batch_rejected_as_a_whole() {
        let mut canvas = synced(1, seed());
        canvas.take_outgoing();
        let err = canvas
            .apply_edge_changes(vec![
                EdgeChange::Remove(EdgeId::new("e1")),
                EdgeChange::Add(edge("loop", "a", "a")),
            ])
            .unwrap_err();
        assert!(matches!(err, AdapterError::Rejected(Rejection::SelfLoop)));
        assert_eq!(canvas.edges().len(), 1);
        assert!(!canvas.has_outgoing());
    }

    #[test]
    fn test_policy_rejects_incompatible() {
        let mut canvas = SyncedCanvas::new(ReplicaId::new(1), seed())
            .with_policy(|source: &Node, _: &Node| source.id.as_str() != "b");
        canvas.on_synced().unwrap();
        assert!(canvas.is_valid_connection(&Connection::new("a", "b")));
        assert!(!canvas.is_valid_connection(&Connection::new("b", "a")));
    }

    #[test]
    fn test_remove_node_prunes_incident_edges() {
        let mut canvas = synced(1, seed());
        canvas
            .apply_node_changes(vec![NodeChange::Remove(NodeId::new("a"))])
            .unwrap();
        assert!(canvas.edges().is_empty());
        assert_eq!(canvas.document().len(Collection::Edges), 0);
    }

    #[test]
    fn test_invalid_node_is_refused() {
        let mut canvas = synced(1, CanvasSnapshot::default());
        let mut bad = node("x", 0.0);
        bad.node_type = "hologram".into();
        assert!(matches!(
            canvas.apply_node_changes(vec![NodeChange::Add(bad)]),
            Err(AdapterError::InvalidNode { .. })
        ));
        let err = canvas
            .add_node(NodeKind::Drop, data(json!({"isSource": "yes"})), None)
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidNode { .. }));
        assert!(canvas.nodes().is_empty());
    }

    #[test]
    fn test_add_node_and_update_data() {
        let mut canvas = synced(1, CanvasSnapshot::default());
        let id = canvas
            .add_node(NodeKind::Image, data(json!({"url": "a.png"})), None)
            .unwrap();
        canvas
            .update_node_data(&id, data(json!({"name": "cat", "width": 3})))
            .unwrap();

        let projected = canvas.document().nodes();
        assert_eq!(projected[0].position, Position::ORIGIN);
        assert_eq!(projected[0].data.get("url"), Some(&json!("a.png")));
        assert_eq!(projected[0].data.get("name"), Some(&json!("cat")));
        assert_eq!(canvas.nodes()[0].data, projected[0].data);
    }

    #[test]
    fn test_duplicate_node() {
        let mut canvas = synced(1, seed());
        canvas
            .apply_node_changes(vec![NodeChange::Select {
                id: NodeId::new("a"),
                selected: true,
            }])
            .unwrap();
        let copies = canvas.duplicate_selection().unwrap();
        assert_eq!(copies.len(), 1);

        let copy = canvas.node(&copies[0]).unwrap();
        assert_eq!(copy.position, Position::new(200.0, 200.0));
        assert!(copy.is_selected());
        assert!(!canvas.node(&NodeId::new("a")).unwrap().is_selected());

        let link = canvas.edges().last().unwrap();
        assert_eq!(link.kind, EdgeKind::Temporary);
        assert_eq!(link.source, NodeId::new("a"));
        assert_eq!(link.target, copies[0]);
        assert_eq!(canvas.document().to_snapshot(), canvas.view_snapshot());
    }

    #[test]
    fn test_copy_paste() {
        let mut canvas = synced(1, seed());
        assert_eq!(canvas.copy_selection(), 0);
        canvas.select_all().unwrap();
        assert_eq!(canvas.copy_selection(), 2);

        let pasted = canvas.paste().unwrap();
        assert_eq!(pasted.len(), 2);
        assert_eq!(canvas.nodes().len(), 4);
        let selected: Vec<&NodeId> = canvas
            .nodes()
            .iter()
            .filter(|n| n.is_selected())
            .map(|n| &n.id)
            .collect();
        assert_eq!(selected, pasted.iter().collect::<Vec<_>>());
        assert_eq!(canvas.node(&pasted[1]).unwrap().position, Position::new(300.0, 200.0));
        assert_eq!(canvas.document().to_snapshot(), canvas.view_snapshot());
    }

    #[test]
    fn test_connection_scaffolding_cleanup() {
        let mut alice = synced(1, seed());
        let (drop, temp) = alice
            .connect_end(&NodeId::new("a"), true, Position::new(5.0, 5.0))
            .unwrap();
        let drop_node = alice.node(&drop).unwrap();
        assert_eq!(drop_node.data.get("isSource"), Some(&json!(false)));
        let link = alice.edges().iter().find(|e| e.id == temp).unwrap();
        assert_eq!((&link.source, &link.target), (&NodeId::new("a"), &drop));

        let (other, _) = alice
            .connect_end(&NodeId::new("b"), false, Position::ORIGIN)
            .unwrap();
        let back = alice.edges().last().unwrap();
        assert_eq!((&back.source, &back.target), (&other, &NodeId::new("b")));

        let mut bob = SyncedCanvas::new(ReplicaId::new(2), CanvasSnapshot::default());
        deliver(&mut alice, &mut bob);
        bob.on_synced().unwrap();
        assert_eq!(bob.nodes().len(), 4);

        assert_eq!(alice.connect_start().unwrap(), 4);
        assert_eq!(alice.view_snapshot(), seed());
        deliver(&mut alice, &mut bob);
        assert_eq!(bob.view_snapshot(), seed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drag_commits_are_coalesced() {
        let mut canvas = synced(1, seed());
        canvas.take_outgoing();
        let id = NodeId::new("a");
        let drag = |x: f64| NodeChange::Position {
            id: NodeId::new("a"),
            position: Position::new(x, 0.0),
            dragging: Some(true),
        };

        canvas.apply_node_changes(vec![drag(1.0)]).unwrap();
        canvas.apply_node_changes(vec![drag(2.0)]).unwrap();
        canvas.apply_node_changes(vec![drag(3.0)]).unwrap();
        assert_eq!(canvas.node(&id).unwrap().position.x, 3.0);
        // Leading commit only; the rest waits for the interval.
        assert_eq!(canvas.take_outgoing().len(), 1);
        assert_eq!(canvas.document().nodes()[0].position.x, 1.0);

        tokio::time::advance(DRAG_COMMIT_INTERVAL).await;
        assert_eq!(canvas.flush_drags(Instant::now()).unwrap(), 1);
        assert_eq!(canvas.document().nodes()[0].position.x, 3.0);

        canvas
            .apply_node_changes(vec![NodeChange::Position {
                id: id.clone(),
                position: Position::new(9.0, 0.0),
                dragging: Some(false),
            }])
            .unwrap();
        let settled = &canvas.document().nodes()[0];
        assert_eq!(settled.position.x, 9.0);
        assert_eq!(settled.dragging, Some(false));
        assert!(canvas.drag_deadline().is_none());
    }

    #[test]
    fn test_concurrent_drag_and_data_edit_merge() {
        let mut alice = synced(1, seed());
        let mut bob = SyncedCanvas::new(ReplicaId::new(2), CanvasSnapshot::default());
        deliver(&mut alice, &mut bob);
        bob.on_synced().unwrap();

        alice
            .apply_node_changes(vec![NodeChange::Position {
                id: NodeId::new("a"),
                position: Position::new(50.0, 60.0),
                dragging: None,
            }])
            .unwrap();
        bob.update_node_data(&NodeId::new("a"), data(json!({"text": "hi"})))
            .unwrap();
        deliver(&mut alice, &mut bob);
        deliver(&mut bob, &mut alice);

        for canvas in [&alice, &bob] {
            let a = canvas.node(&NodeId::new("a")).unwrap();
            assert_eq!(a.position, Position::new(50.0, 60.0));
            assert_eq!(a.text(), Some("hi"));
        }
        assert_eq!(alice.document().to_snapshot(), bob.document().to_snapshot());
    }

    #[test]
    fn test_text_seeding_happens_once() {
        let mut with_content = node("t", 0.0);
        with_content.data = data(json!({"content": "hello"}));
        let mut canvas = synced(1, CanvasSnapshot::new(vec![with_content], vec![]));
        let id = NodeId::new("t");

        assert!(canvas.mount_text(&id).unwrap());
        assert_eq!(canvas.text(&id), "hello");
        assert_eq!(canvas.node(&id).unwrap().text(), Some("hello"));

        canvas.edit_text(&id, 0, 5, "", None).unwrap();
        assert_eq!(canvas.text(&id), "");
        // The field has history now, so remounting leaves it empty.
        assert!(!canvas.mount_text(&id).unwrap());
        assert_eq!(canvas.text(&id), "");
    }

    #[test]
    fn test_concurrent_text_edits_converge() {
        let mut alice = synced(1, CanvasSnapshot::new(vec![node("t", 0.0)], vec![]));
        let mut bob = SyncedCanvas::new(ReplicaId::new(2), CanvasSnapshot::default());
        deliver(&mut alice, &mut bob);
        bob.on_synced().unwrap();
        let id = NodeId::new("t");

        alice.edit_text(&id, 0, 0, "ac", None).unwrap();
        deliver(&mut alice, &mut bob);
        alice.edit_text(&id, 1, 0, "b", None).unwrap();
        bob.edit_text(&id, 2, 0, "d", None).unwrap();
        let to_bob = deliver(&mut alice, &mut bob);
        deliver(&mut bob, &mut alice);

        assert_eq!(alice.text(&id), "abcd");
        assert_eq!(bob.text(&id), "abcd");
        assert!(to_bob.iter().any(|c| c.texts == vec![text_field_name(&id)]));
    }

    #[test]
    fn test_edit_text_out_of_range_writes_nothing() {
        let mut canvas = synced(1, CanvasSnapshot::new(vec![node("t", 0.0)], vec![]));
        canvas.take_outgoing();
        let id = NodeId::new("t");
        assert!(canvas.edit_text(&id, 1, 0, "x", None).is_err());
        assert!(canvas.edit_text(&id, 0, 1, "", None).is_err());
        assert!(!canvas.has_outgoing());
    }

    #[test]
    fn test_text_field_requires_text_node() {
        let mut canvas = synced(
            1,
            CanvasSnapshot::new(
                vec![Node::new(NodeId::new("img"), NodeKind::Image, Position::ORIGIN)],
                vec![],
            ),
        );
        assert!(matches!(
            canvas.edit_text(&NodeId::new("img"), 0, 0, "x", None),
            Err(AdapterError::InvalidNode { .. })
        ));
    }
}
