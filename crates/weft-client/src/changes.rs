//! UI-level change sets and their effect on the rendered lists.

use weft_types::{Edge, EdgeId, Node, NodeId, Position};

/// A change to the rendered node list, as produced by the canvas UI.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeChange {
    Add(Node),
    Remove(NodeId),
    /// Move a node. `dragging` is `Some(true)` while a drag is in progress
    /// and `Some(false)` on release.
    Position {
        id: NodeId,
        position: Position,
        dragging: Option<bool>,
    },
    Select {
        id: NodeId,
        selected: bool,
    },
    /// Swap a node for a new version at the same list position.
    Replace(Node),
}

impl NodeChange {
    pub fn id(&self) -> &NodeId {
        match self {
            NodeChange::Add(node) | NodeChange::Replace(node) => &node.id,
            NodeChange::Remove(id)
            | NodeChange::Position { id, .. }
            | NodeChange::Select { id, .. } => id,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EdgeChange {
    Add(Edge),
    Remove(EdgeId),
    Select { id: EdgeId, selected: bool },
}

/// Apply node changes to a rendered list in place.
pub fn apply_node_changes(changes: &[NodeChange], nodes: &mut Vec<Node>) {
    for change in changes {
        match change {
            NodeChange::Add(node) => nodes.push(node.clone()),
            NodeChange::Remove(id) => nodes.retain(|n| &n.id != id),
            NodeChange::Position {
                id,
                position,
                dragging,
            } => {
                if let Some(node) = nodes.iter_mut().find(|n| &n.id == id) {
                    node.position = *position;
                    if dragging.is_some() {
                        node.dragging = *dragging;
                    }
                }
            }
            NodeChange::Select { id, selected } => {
                if let Some(node) = nodes.iter_mut().find(|n| &n.id == id) {
                    node.selected = Some(*selected);
                }
            }
            NodeChange::Replace(replacement) => {
                if let Some(node) = nodes.iter_mut().find(|n| n.id == replacement.id) {
                    *node = replacement.clone();
                }
            }
        }
    }
}

/// Apply edge changes to a rendered list in place.
pub fn apply_edge_changes(changes: &[EdgeChange], edges: &mut Vec<Edge>) {
    for change in changes {
        match change {
            EdgeChange::Add(edge) => edges.push(edge.clone()),
            EdgeChange::Remove(id) => edges.retain(|e| &e.id != id),
            EdgeChange::Select { id, selected } => {
                if let Some(edge) = edges.iter_mut().find(|e| &e.id == id) {
                    edge.selected = Some(*selected);
                }
            }
        }
    }
}
