//! Read model: replicated records → view-facing [`Node`]/[`Edge`] values.
//!
//! Projection never fails. A record written by a buggy or newer client is
//! rendered with defaults instead of aborting the whole sync:
//!
//! | Missing / malformed | Rendered as                         |
//! |---------------------|-------------------------------------|
//! | `id`                | `generated-{replica}-{lamport}`     |
//! | `type` (node)       | `text`                              |
//! | `position`          | `(0, 0)` per missing coordinate     |
//! | `data`              | `{}`                                |
//! | `type` (edge)       | `normal`                            |
//! | `source`/`target`   | edge skipped                        |

use serde_json::Value;
use weft_types::{Edge, EdgeId, EdgeKind, JsonMap, Node, NodeId, NodeKind, Position};

use crate::clock::OpId;
use crate::register::{RecordState, is_nested};
use crate::value::FieldValue;

const NODE_FIELDS: [&str; 7] = ["id", "type", "selected", "dragging", "hidden", "zIndex", "data"];
const EDGE_FIELDS: [&str; 7] = ["id", "source", "target", "type", "label", "style", "selected"];

/// Deterministic stand-in id for a record without one.
pub fn generated_id(element: OpId) -> String {
    format!("generated-{}-{}", element.replica, element.lamport)
}

fn bool_field(record: &RecordState, key: &str) -> Option<bool> {
    record.field(key).and_then(FieldValue::as_bool)
}

fn str_field<'a>(record: &'a RecordState, key: &str) -> Option<&'a str> {
    record.field(key).and_then(FieldValue::as_str)
}

/// A nested map as a JSON object. Falls back to an object-valued scalar
/// field of the same name; anything else is empty.
fn nested_object(record: &RecordState, name: &str) -> JsonMap {
    if record.maps.contains_key(name) {
        return record
            .entries(name)
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect();
    }
    match record.field(name).map(FieldValue::to_json) {
        Some(Value::Object(map)) => map,
        _ => JsonMap::new(),
    }
}

fn extra_fields(record: &RecordState, known: &[&str]) -> JsonMap {
    record
        .fields
        .iter()
        .filter(|(k, _)| !known.contains(&k.as_str()) && !is_nested(k))
        .filter_map(|(k, r)| r.value.as_ref().map(|v| (k.clone(), v.to_json())))
        .collect()
}

fn position_of(record: &RecordState) -> Position {
    let coord = |axis: &str| {
        record
            .key("position", axis)
            .and_then(FieldValue::as_f64)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    };
    Position::new(coord("x"), coord("y"))
}

pub fn project_node(element: OpId, record: &RecordState) -> Node {
    let id = str_field(record, "id")
        .map(NodeId::new)
        .unwrap_or_else(|| NodeId::new(generated_id(element)));
    let node_type = str_field(record, "type")
        .unwrap_or(NodeKind::Text.as_str())
        .to_string();

    Node {
        id,
        node_type,
        data: nested_object(record, "data"),
        position: position_of(record),
        selected: bool_field(record, "selected"),
        dragging: bool_field(record, "dragging"),
        hidden: bool_field(record, "hidden"),
        z_index: record.field("zIndex").and_then(FieldValue::as_i64),
        extra: extra_fields(record, &NODE_FIELDS),
    }
}

pub fn project_edge(element: OpId, record: &RecordState) -> Option<Edge> {
    let (Some(source), Some(target)) = (str_field(record, "source"), str_field(record, "target"))
    else {
        tracing::debug!("edge {} has no source/target, not rendered", element);
        return None;
    };
    let id = str_field(record, "id")
        .map(EdgeId::new)
        .unwrap_or_else(|| EdgeId::new(generated_id(element)));
    let kind = str_field(record, "type")
        .and_then(EdgeKind::from_str)
        .unwrap_or_default();
    let style = match record.field("style").map(FieldValue::to_json) {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    };

    Some(Edge {
        id,
        source: NodeId::new(source),
        target: NodeId::new(target),
        kind,
        label: str_field(record, "label").map(str::to_string),
        style,
        selected: bool_field(record, "selected"),
        extra: extra_fields(record, &EDGE_FIELDS),
    })
}
