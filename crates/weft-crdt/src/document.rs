//! The replicated canvas document.
//!
//! # Structure
//!
//! ```text
//! CanvasDocument
//!     ├── nodes: RGA<RecordState>     # insertion-ordered node records
//!     ├── edges: RGA<RecordState>     # insertion-ordered edge records
//!     └── texts: name → RGA<char>     # one field per rich-text node
//! ```
//!
//! # Transactions and origins
//!
//! Every mutation happens inside [`CanvasDocument::transact`], which takes
//! the origin explicitly. Remote ops enter through
//! [`CanvasDocument::apply_remote`] with the origin the relay tagged them
//! with. Both paths emit a [`ChangeEvent`] carrying that origin, so an
//! observer can skip changes it made itself.
//!
//! # Delivery
//!
//! Ops from one replica must be applied in `seq` order, and an op that
//! references an element must come after the op that created it. Ops that
//! arrive early are held in a bounded pending buffer and replayed after
//! every successful apply. Ops already covered by the version vector are
//! skipped, which makes echoes and repeated resyncs harmless.
//!
//! A remote op that is in order but cannot be integrated (a Lamport range
//! that overflows, a delete in a text field that does not exist) is
//! rejected: it still advances its replica's version and stays in the log,
//! so every replica rejects it the same way and later ops are not stalled.
//!
//! # Memory
//!
//! The op log and sequence tombstones are kept for the life of the
//! document, since late joiners are caught up from the log. A relay room
//! drops its document when its last member leaves and the next room is
//! rebuilt from the replicas that join it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tokio::sync::broadcast;
use weft_types::{CanvasSnapshot, Edge, Node, ReplicaId};

use crate::Result;
use crate::clock::{OpId, VersionVector};
use crate::error::CrdtError;
use crate::ops::{Collection, Op, OpKind, Update};
use crate::projection::{project_edge, project_node};
use crate::register::{RecordInit, RecordState, is_nested};
use crate::sequence::Sequence;
use crate::text::{TextAttrs, TextField};
use crate::value::FieldValue;

/// Ops held while waiting for their dependencies. Oldest are dropped past this.
pub const MAX_PENDING_OPS: usize = 4096;

/// Change events buffered per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 256;

/// Notification that a transaction or remote update changed the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Replica the change is attributed to.
    pub origin: ReplicaId,
    pub nodes: bool,
    pub edges: bool,
    /// Text fields touched.
    pub texts: Vec<String>,
}

impl ChangeEvent {
    pub fn touches(&self, collection: Collection) -> bool {
        match collection {
            Collection::Nodes => self.nodes,
            Collection::Edges => self.edges,
        }
    }
}

/// What happened to the ops of one remote update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub duplicates: usize,
    /// Ops parked in the pending buffer.
    pub buffered: usize,
    /// In-order ops that could not be integrated and were skipped.
    pub rejected: usize,
}

/// A live record located by its `id` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordRef {
    pub element: OpId,
    pub index: usize,
}

#[derive(Default)]
struct Changes {
    nodes: bool,
    edges: bool,
    texts: BTreeSet<String>,
}

impl Changes {
    fn is_empty(&self) -> bool {
        !self.nodes && !self.edges && self.texts.is_empty()
    }

    fn mark(&mut self, collection: Collection) {
        match collection {
            Collection::Nodes => self.nodes = true,
            Collection::Edges => self.edges = true,
        }
    }
}

enum Step {
    Applied,
    Duplicate,
    Rejected,
    NotReady(Op),
}

pub struct CanvasDocument {
    replica: ReplicaId,
    /// Highest Lamport time seen.
    clock: u64,
    version: VersionVector,
    nodes: Sequence<RecordState>,
    edges: Sequence<RecordState>,
    texts: BTreeMap<String, TextField>,
    /// Every applied op in application order (always causally consistent).
    /// Grows for the life of the document.
    log: Vec<Op>,
    pending: VecDeque<Op>,
    events: broadcast::Sender<ChangeEvent>,
}

impl CanvasDocument {
    pub fn new(replica: ReplicaId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            replica,
            clock: 0,
            version: VersionVector::new(),
            nodes: Sequence::new("nodes"),
            edges: Sequence::new("edges"),
            texts: BTreeMap::new(),
            log: Vec::new(),
            pending: VecDeque::new(),
            events,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn state_vector(&self) -> &VersionVector {
        &self.version
    }

    pub fn encode_state_vector(&self) -> Result<Vec<u8>> {
        self.version.encode()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn sequence(&self, collection: Collection) -> &Sequence<RecordState> {
        match collection {
            Collection::Nodes => &self.nodes,
            Collection::Edges => &self.edges,
        }
    }

    fn sequence_mut(&mut self, collection: Collection) -> &mut Sequence<RecordState> {
        match collection {
            Collection::Nodes => &mut self.nodes,
            Collection::Edges => &mut self.edges,
        }
    }

    /// Number of live records in a collection.
    pub fn len(&self, collection: Collection) -> usize {
        self.sequence(collection).len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Live records in order, with their element ids.
    pub fn records(&self, collection: Collection) -> impl Iterator<Item = (OpId, &RecordState)> {
        self.sequence(collection).iter().map(|e| (e.id, &e.value))
    }

    /// A live record by element id.
    pub fn record(&self, collection: Collection, element: OpId) -> Option<&RecordState> {
        self.sequence(collection)
            .get(element)
            .filter(|e| !e.deleted)
            .map(|e| &e.value)
    }

    /// First live record whose `id` field equals `id`.
    pub fn find_record(&self, collection: Collection, id: &str) -> Option<RecordRef> {
        self.records(collection)
            .enumerate()
            .find(|(_, (_, record))| record.id() == Some(id))
            .map(|(index, (element, _))| RecordRef { element, index })
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.records(Collection::Nodes)
            .map(|(element, record)| project_node(element, record))
            .collect()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.records(Collection::Edges)
            .filter_map(|(element, record)| project_edge(element, record))
            .collect()
    }

    /// Plain projection of both collections.
    pub fn to_snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot::new(self.nodes(), self.edges())
    }

    pub fn text(&self, field: &str) -> Option<&TextField> {
        self.texts.get(field)
    }

    /// Plain text of a field (empty if it was never written).
    pub fn plain_text(&self, field: &str) -> String {
        self.texts
            .get(field)
            .map(TextField::plain_text)
            .unwrap_or_default()
    }

    /// Subscribe to change events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Local mutation
    // =========================================================================

    /// Run `f` as one transaction attributed to `origin`.
    ///
    /// Returns the closure's result and the update holding every op the
    /// transaction applied, for broadcast. One change event is emitted at
    /// the end if anything changed.
    pub fn transact<R>(
        &mut self,
        origin: ReplicaId,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> (R, Update) {
        let mut tx = Transaction {
            doc: self,
            ops: Vec::new(),
            changes: Changes::default(),
        };
        let result = f(&mut tx);
        let Transaction { ops, changes, .. } = tx;
        if !ops.is_empty() {
            tracing::trace!(replica = %self.replica, %origin, ops = ops.len(), "transaction committed");
        }
        self.emit(origin, changes);
        (result, Update::new(ops))
    }

    fn apply_local(&mut self, kind: OpKind, changes: &mut Changes) -> Result<OpId> {
        let lamport = self
            .clock
            .checked_add(1)
            .ok_or(CrdtError::ClockOverflow(OpId::new(self.clock, self.replica)))?;
        let op = Op {
            id: OpId::new(lamport, self.replica),
            seq: self.version.next_expected(self.replica),
            kind,
        };
        if let Some(missing) = self.missing_dependency(&op) {
            return Err(CrdtError::MissingDependency(missing));
        }
        check_range(&op)?;
        self.integrate(&op, changes)?;
        self.commit(op.clone());
        Ok(op.id)
    }

    // =========================================================================
    // Remote updates
    // =========================================================================

    /// Apply a remote update tagged with `origin`.
    pub fn apply_remote(&mut self, update: &Update, origin: ReplicaId) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        let mut changes = Changes::default();

        for op in &update.ops {
            match self.try_apply(op.clone(), &mut changes) {
                Step::Applied => outcome.applied += 1,
                Step::Duplicate => outcome.duplicates += 1,
                Step::Rejected => outcome.rejected += 1,
                Step::NotReady(op) => {
                    outcome.buffered += 1;
                    self.pending.push_back(op);
                }
            }
        }
        let (applied, rejected) = self.replay_pending(&mut changes);
        outcome.applied += applied;
        outcome.rejected += rejected;
        self.trim_pending();

        if outcome.buffered > 0 {
            tracing::debug!(
                replica = %self.replica,
                buffered = outcome.buffered,
                pending = self.pending.len(),
                "ops waiting for dependencies"
            );
        }
        self.emit(origin, changes);
        Ok(outcome)
    }

    /// Decode and apply a remote update.
    pub fn apply_remote_bytes(&mut self, bytes: &[u8], origin: ReplicaId) -> Result<ApplyOutcome> {
        let update = Update::decode(bytes)?;
        self.apply_remote(&update, origin)
    }

    fn try_apply(&mut self, op: Op, changes: &mut Changes) -> Step {
        if self.version.contains(op.id.replica, op.seq) {
            return Step::Duplicate;
        }
        if op.seq != self.version.next_expected(op.id.replica) || self.missing_dependency(&op).is_some() {
            return Step::NotReady(op);
        }
        match check_range(&op).and_then(|()| self.integrate(&op, changes)) {
            Ok(()) => {
                self.commit(op);
                Step::Applied
            }
            Err(e) => {
                tracing::warn!(
                    replica = %self.replica,
                    op = %op.id,
                    seq = op.seq,
                    error = %e,
                    "rejecting remote op"
                );
                self.skip(op);
                Step::Rejected
            }
        }
    }

    /// Retry buffered ops until a full pass makes no progress.
    /// Returns `(applied, rejected)`.
    fn replay_pending(&mut self, changes: &mut Changes) -> (usize, usize) {
        let mut applied = 0;
        let mut rejected = 0;
        loop {
            let mut progressed = false;
            let waiting = std::mem::take(&mut self.pending);
            for op in waiting {
                match self.try_apply(op, changes) {
                    Step::Applied => {
                        applied += 1;
                        progressed = true;
                    }
                    Step::Rejected => {
                        rejected += 1;
                        progressed = true;
                    }
                    Step::Duplicate => {}
                    Step::NotReady(op) => self.pending.push_back(op),
                }
            }
            if !progressed {
                return (applied, rejected);
            }
        }
    }

    fn trim_pending(&mut self) {
        while self.pending.len() > MAX_PENDING_OPS {
            if let Some(dropped) = self.pending.pop_front() {
                tracing::warn!(
                    replica = %self.replica,
                    op = %dropped.id,
                    "pending op buffer full, dropping oldest; a resync will recover it"
                );
            }
        }
    }

    // =========================================================================
    // Integration (shared by local and remote paths)
    // =========================================================================

    fn missing_dependency(&self, op: &Op) -> Option<OpId> {
        match &op.kind {
            OpKind::Insert { collection, after, .. } => {
                after.filter(|a| !self.sequence(*collection).contains(*a))
            }
            OpKind::Delete { collection, target }
            | OpKind::SetField { collection, target, .. }
            | OpKind::SetKey { collection, target, .. } => {
                Some(*target).filter(|t| !self.sequence(*collection).contains(*t))
            }
            OpKind::TextInsert { field, after, .. } => after.filter(|a| {
                !self.texts.get(field).is_some_and(|text| text.contains(*a))
            }),
            OpKind::TextDelete { field, targets } => {
                let text = self.texts.get(field);
                targets
                    .iter()
                    .copied()
                    .find(|t| !text.is_some_and(|text| text.contains(*t)))
            }
        }
    }

    fn integrate(&mut self, op: &Op, changes: &mut Changes) -> Result<()> {
        match &op.kind {
            OpKind::Insert {
                collection,
                after,
                record,
            } => {
                let state = RecordState::from_init(record, op.id);
                if self.sequence_mut(*collection).integrate(*after, op.id, state)? {
                    changes.mark(*collection);
                }
            }
            OpKind::Delete { collection, target } => {
                if self.sequence_mut(*collection).delete(*target)? {
                    changes.mark(*collection);
                }
            }
            OpKind::SetField {
                collection,
                target,
                key,
                value,
            } => {
                let element = self
                    .sequence_mut(*collection)
                    .get_mut(*target)
                    .ok_or(CrdtError::MissingDependency(*target))?;
                // Writes to tombstoned records are kept so every replica ends
                // with identical registers, but they are not visible.
                if element.value.set_field(key, value.clone(), op.id) && !element.deleted {
                    changes.mark(*collection);
                }
            }
            OpKind::SetKey {
                collection,
                target,
                map,
                key,
                value,
            } => {
                let element = self
                    .sequence_mut(*collection)
                    .get_mut(*target)
                    .ok_or(CrdtError::MissingDependency(*target))?;
                if element.value.set_key(map, key, value.clone(), op.id) && !element.deleted {
                    changes.mark(*collection);
                }
            }
            OpKind::TextInsert {
                field,
                after,
                text,
                attrs,
            } => {
                let target = self.texts.entry(field.clone()).or_default();
                if target.integrate_insert(op.id, *after, text, attrs.as_ref())? {
                    changes.texts.insert(field.clone());
                }
            }
            OpKind::TextDelete { field, targets } => {
                let target = self
                    .texts
                    .get_mut(field)
                    .ok_or_else(|| CrdtError::TextFieldNotFound(field.clone()))?;
                if target.delete(targets)? {
                    changes.texts.insert(field.clone());
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, op: Op) {
        self.version.advance(op.id.replica, op.seq);
        if let Some(last) = op.last_lamport() {
            self.clock = self.clock.max(last);
        }
        self.log.push(op);
    }

    /// Record a rejected op without touching state or the clock.
    fn skip(&mut self, op: Op) {
        self.version.advance(op.id.replica, op.seq);
        self.log.push(op);
    }

    fn emit(&self, origin: ReplicaId, changes: Changes) {
        if changes.is_empty() {
            return;
        }
        // No subscribers is fine.
        let _ = self.events.send(ChangeEvent {
            origin,
            nodes: changes.nodes,
            edges: changes.edges,
            texts: changes.texts.into_iter().collect(),
        });
    }

    // =========================================================================
    // Sync Operations
    // =========================================================================

    /// Every op not covered by `since`, in causal order.
    pub fn ops_since(&self, since: &VersionVector) -> Update {
        Update::new(
            self.log
                .iter()
                .filter(|op| !since.contains(op.id.replica, op.seq))
                .cloned()
                .collect(),
        )
    }

    /// The full document as one encoded update.
    pub fn encode_state(&self) -> Result<Vec<u8>> {
        self.ops_since(&VersionVector::new()).encode()
    }
}

fn check_range(op: &Op) -> Result<()> {
    match op.last_lamport() {
        Some(_) => Ok(()),
        None => Err(CrdtError::ClockOverflow(op.id)),
    }
}

impl std::fmt::Debug for CanvasDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasDocument")
            .field("replica", &self.replica)
            .field("clock", &self.clock)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("texts", &self.texts.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Mutation handle passed to [`CanvasDocument::transact`].
///
/// Each method applies one op immediately, so later calls in the same
/// closure observe earlier ones.
pub struct Transaction<'a> {
    doc: &'a mut CanvasDocument,
    ops: Vec<Op>,
    changes: Changes,
}

impl Transaction<'_> {
    /// Read access to the document as of this point in the transaction.
    pub fn doc(&self) -> &CanvasDocument {
        &*self.doc
    }

    fn push(&mut self, kind: OpKind) -> Result<OpId> {
        let id = self.doc.apply_local(kind, &mut self.changes)?;
        if let Some(op) = self.doc.log.last() {
            self.ops.push(op.clone());
        }
        Ok(id)
    }

    fn require_live(&self, collection: Collection, element: OpId) -> Result<()> {
        match self.doc.record(collection, element) {
            Some(_) => Ok(()),
            None => Err(CrdtError::RecordNotFound(element, collection)),
        }
    }

    /// Insert a record at visible `index`. Returns its element id.
    pub fn insert_record(&mut self, collection: Collection, index: usize, record: RecordInit) -> Result<OpId> {
        let after = self.doc.sequence(collection).anchor_for(index)?;
        self.push(OpKind::Insert {
            collection,
            after,
            record,
        })
    }

    /// Append a record.
    pub fn push_record(&mut self, collection: Collection, record: RecordInit) -> Result<OpId> {
        let index = self.doc.len(collection);
        self.insert_record(collection, index, record)
    }

    pub fn delete_record(&mut self, collection: Collection, element: OpId) -> Result<()> {
        self.require_live(collection, element)?;
        self.push(OpKind::Delete {
            collection,
            target: element,
        })?;
        Ok(())
    }

    /// Delete the record with the given `id` field.
    pub fn delete_by_id(&mut self, collection: Collection, id: &str) -> Result<()> {
        let found = self
            .doc
            .find_record(collection, id)
            .ok_or_else(|| CrdtError::UnknownRecordId(id.to_string(), collection))?;
        self.delete_record(collection, found.element)
    }

    /// Delete every live record. Returns how many were removed.
    pub fn clear(&mut self, collection: Collection) -> Result<usize> {
        let elements: Vec<OpId> = self.doc.records(collection).map(|(id, _)| id).collect();
        for element in &elements {
            self.delete_record(collection, *element)?;
        }
        Ok(elements.len())
    }

    /// Write a top-level field. Object values for nested fields are written
    /// key by key so concurrent sub-field edits are preserved.
    pub fn set_field(
        &mut self,
        collection: Collection,
        element: OpId,
        key: &str,
        value: Option<FieldValue>,
    ) -> Result<()> {
        self.require_live(collection, element)?;
        if let (true, Some(FieldValue::Object(entries))) = (is_nested(key), &value) {
            for (sub, v) in entries {
                self.set_key(collection, element, key, sub, Some(v.clone()))?;
            }
            return Ok(());
        }
        self.push(OpKind::SetField {
            collection,
            target: element,
            key: key.to_string(),
            value,
        })?;
        Ok(())
    }

    pub fn set_key(
        &mut self,
        collection: Collection,
        element: OpId,
        map: &str,
        key: &str,
        value: Option<FieldValue>,
    ) -> Result<()> {
        self.require_live(collection, element)?;
        self.push(OpKind::SetKey {
            collection,
            target: element,
            map: map.to_string(),
            key: key.to_string(),
            value,
        })?;
        Ok(())
    }

    /// Insert `text` at character `index` of a text field (created on first write).
    pub fn text_insert(
        &mut self,
        field: &str,
        index: usize,
        text: &str,
        attrs: Option<TextAttrs>,
    ) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let after = match self.doc.texts.get(field) {
            Some(existing) => existing.anchor_for(index)?,
            None if index == 0 => None,
            None => {
                return Err(CrdtError::IndexOutOfBounds {
                    what: "text",
                    index,
                    len: 0,
                });
            }
        };
        self.push(OpKind::TextInsert {
            field: field.to_string(),
            after,
            text: text.to_string(),
            attrs,
        })?;
        Ok(())
    }

    /// Delete `len` characters starting at `index`.
    pub fn text_delete(&mut self, field: &str, index: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let targets = self
            .doc
            .texts
            .get(field)
            .ok_or_else(|| CrdtError::TextFieldNotFound(field.to_string()))?
            .ids_in_range(index, len)?;
        self.push(OpKind::TextDelete {
            field: field.to_string(),
            targets,
        })?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
