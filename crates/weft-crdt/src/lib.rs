//! Replicated canvas document for Weft.
//!
//! The document holds two insertion-ordered collections of records (nodes
//! and edges) plus any number of named rich-text fields. Every replica can
//! mutate it at any time without coordination; replicas that have applied
//! the same set of ops hold equal state regardless of delivery order.
//!
//! # CRDT Semantics
//!
//! - **Sequences**: RGA. Concurrent inserts at the same spot order by
//!   descending op id (Lamport time, then replica id); deletes tombstone.
//! - **Record fields**: last-writer-wins register per field, ordered by op
//!   id. `data` and `position` are maps of registers, so concurrent edits to
//!   different sub-fields both survive.
//! - **Text**: RGA of characters carrying optional formatting attributes.
//!
//! Records are typed only at the edges: the document stores whatever
//! fields it is given, and [`projection`] renders them as
//! [`weft_types::Node`] / [`weft_types::Edge`] with lenient defaults.

pub mod clock;
mod document;
mod error;
pub mod ops;
pub mod projection;
pub mod register;
pub mod sequence;
pub mod text;
pub mod value;

pub use clock::{OpId, VersionVector};
pub use document::{
    ApplyOutcome, CanvasDocument, ChangeEvent, EVENT_CAPACITY, MAX_PENDING_OPS, RecordRef,
    Transaction,
};
pub use error::CrdtError;
pub use ops::{Collection, Op, OpKind, Update};
pub use register::{Crdt, Lww, NESTED_FIELDS, RecordInit, RecordState};
pub use text::{TextAttrs, TextField, TextRun};
pub use value::FieldValue;

/// Result type for CRDT operations.
pub type Result<T> = std::result::Result<T, CrdtError>;

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{Node, NodeId, NodeKind, Position, ReplicaId};

    #[test]
    fn test_typed_node_round_trips_through_document() {
        let mut doc = CanvasDocument::new(ReplicaId::new(1));
        let node = Node::new(NodeId::new("n1"), NodeKind::Code, Position::new(3.0, 4.0));
        let init = RecordInit::from_serialize(&node).unwrap();

        let (result, update) = doc.transact(ReplicaId::new(1), |tx| tx.push_record(Collection::Nodes, init));
        result.unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(doc.nodes(), vec![node]);
    }
}
