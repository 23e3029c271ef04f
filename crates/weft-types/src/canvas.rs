//! Canvas records: nodes, edges and the snapshot read model.
//!
//! These are the plain, view-facing shapes. The replicated document stores
//! the same information as per-field registers; projecting it yields these
//! types. Serialized field names follow the JSON the hosting application
//! stores (`type`, `zIndex`, camelCase flags).

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::EnumString;

use crate::ids::{EdgeId, NodeId};

/// JSON object used for node payloads and unknown record fields.
pub type JsonMap = Map<String, Value>;

/// Canvas coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Shift by `(dx, dy)`.
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

// ============================================================================
// Node kinds
// ============================================================================

/// Behavioral tag of a node.
///
/// Stored on the node as a plain string so records written by newer clients
/// survive a round trip through older ones; use [`Node::kind`] to interpret it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum NodeKind {
    Text,
    Image,
    Audio,
    Video,
    Code,
    File,
    /// Placeholder created when a connection is dropped on empty canvas.
    Drop,
}

impl NodeKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Text => "text",
            NodeKind::Image => "image",
            NodeKind::Audio => "audio",
            NodeKind::Video => "video",
            NodeKind::Code => "code",
            NodeKind::File => "file",
            NodeKind::Drop => "drop",
        }
    }

    /// Whether nodes of this kind carry a collaborative text field.
    pub fn has_text_field(&self) -> bool {
        matches!(self, NodeKind::Text | NodeKind::Code)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Visual/behavioral tag of an edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum EdgeKind {
    #[default]
    Normal,
    Animated,
    /// Interaction scaffolding, removed when the next connection gesture starts.
    Temporary,
}

impl EdgeKind {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Normal => "normal",
            EdgeKind::Animated => "animated",
            EdgeKind::Temporary => "temporary",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A canvas node as the view sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dragging: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(rename = "zIndex", default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    /// Fields this version does not model; preserved verbatim.
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, position: Position) -> Self {
        Self {
            id,
            node_type: kind.as_str().to_string(),
            data: JsonMap::new(),
            position,
            selected: None,
            dragging: None,
            hidden: None,
            z_index: None,
            extra: JsonMap::new(),
        }
    }

    pub fn with_data(mut self, data: JsonMap) -> Self {
        self.data = data;
        self
    }

    pub fn kind(&self) -> Option<NodeKind> {
        NodeKind::from_str(&self.node_type)
    }

    pub fn is_selected(&self) -> bool {
        self.selected.unwrap_or(false)
    }

    /// Plain-text payload (`data.text`), if any.
    pub fn text(&self) -> Option<&str> {
        self.data.get("text").and_then(Value::as_str)
    }
}

/// A directed canvas edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(rename = "type", default)]
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Edge {
    pub fn new(id: EdgeId, source: NodeId, target: NodeId, kind: EdgeKind) -> Self {
        Self {
            id,
            source,
            target,
            kind,
            label: None,
            style: None,
            selected: None,
            extra: JsonMap::new(),
        }
    }

    pub fn is_selected(&self) -> bool {
        self.selected.unwrap_or(false)
    }
}

/// A proposed edge between two nodes, before validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: NodeId,
    pub target: NodeId,
}

impl Connection {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time projection of a document's node and edge collections.
///
/// This is what the relay persists. Equality is by value, which is what the
/// unchanged-write skip compares.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl CanvasSnapshot {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Name of the collaborative text field belonging to a node.
pub fn text_field_name(node: &NodeId) -> String {
    format!("text-node-{}", node.as_str())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_json_shape() {
        let mut node = Node::new(NodeId::new("n1"), NodeKind::Text, Position::new(1.0, 2.0));
        node.z_index = Some(3);
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["zIndex"], 3);
        assert_eq!(value["position"], json!({"x": 1.0, "y": 2.0}));
        assert!(value.get("selected").is_none());
    }

    #[test]
    fn test_unknown_node_fields_survive() {
        let raw = json!({
            "id": "n1",
            "type": "sketch",
            "position": {"x": 0.0, "y": 0.0},
            "width": 240,
        });
        let node: Node = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(node.kind(), None);
        assert_eq!(node.extra.get("width"), Some(&json!(240)));
        assert_eq!(serde_json::to_value(&node).unwrap()["width"], 240);
    }

    #[test]
    fn test_kind_parsing_is_case_insensitive() {
        assert_eq!(NodeKind::from_str("TEXT"), Some(NodeKind::Text));
        assert_eq!(EdgeKind::from_str("Temporary"), Some(EdgeKind::Temporary));
        assert_eq!(EdgeKind::from_str("dotted"), None);
    }

    #[test]
    fn test_edge_defaults_to_normal() {
        let edge: Edge =
            serde_json::from_value(json!({"id": "e1", "source": "a", "target": "b"})).unwrap();
        assert_eq!(edge.kind, EdgeKind::Normal);
    }

    #[test]
    fn test_snapshot_equality_is_by_value() {
        let a = CanvasSnapshot::new(
            vec![Node::new(NodeId::new("n1"), NodeKind::Image, Position::ORIGIN)],
            vec![],
        );
        let b = CanvasSnapshot::from_json(a.to_json().unwrap()).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(CanvasSnapshot::default().is_empty());
    }

    #[test]
    fn test_text_field_name() {
        assert_eq!(text_field_name(&NodeId::new("abc")), "text-node-abc");
    }
}
