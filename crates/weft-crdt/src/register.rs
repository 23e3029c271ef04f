//! Last-writer-wins registers and the replicated record built from them.
//!
//! "Last" means highest [`OpId`], never wall-clock or receipt order, so a
//! stale write that arrives late cannot clobber a newer one.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::clock::OpId;
use crate::value::FieldValue;

/// A state-based CRDT.
///
/// Properties:
/// - Commutative: join(a, b) == join(b, a)
/// - Associative: join(join(a, b), c) == join(a, join(b, c))
/// - Idempotent: join(a, a) == a
pub trait Crdt: Sized {
    fn join(&self, other: &Self) -> Self;
}

/// Last-writer-wins register stamped with the writing op.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lww<T> {
    pub value: T,
    pub stamp: OpId,
}

impl<T> Lww<T> {
    pub fn new(value: T, stamp: OpId) -> Self {
        Self { value, stamp }
    }

    /// Apply a write in place. Returns `true` if it won.
    pub fn set(&mut self, value: T, stamp: OpId) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }
}

impl<T: Clone> Crdt for Lww<T> {
    fn join(&self, other: &Self) -> Self {
        if self.stamp >= other.stamp {
            self.clone()
        } else {
            other.clone()
        }
    }
}

impl<T: PartialEq> PartialEq for Lww<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.stamp == other.stamp
    }
}

/// Field register. `None` means the field was unset.
pub type Register = Lww<Option<FieldValue>>;

/// Field names stored as nested replicated maps rather than whole values.
pub const NESTED_FIELDS: [&str; 2] = ["data", "position"];

pub fn is_nested(name: &str) -> bool {
    NESTED_FIELDS.contains(&name)
}

/// One record (node or edge) as a set of independent registers.
///
/// Top-level scalars live in `fields`. `data` and `position` are maps of
/// registers keyed by sub-field, so concurrent edits to different sub-fields
/// both survive. When a name exists in both, the map wins on read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordState {
    pub fields: BTreeMap<String, Register>,
    pub maps: BTreeMap<String, BTreeMap<String, Register>>,
}

impl RecordState {
    /// Build a record whose every register is stamped by the creating op.
    pub fn from_init(init: &RecordInit, stamp: OpId) -> Self {
        let fields = init
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Lww::new(Some(v.clone()), stamp)))
            .collect();
        let maps = init
            .maps
            .iter()
            .map(|(name, entries)| {
                let entries = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Lww::new(Some(v.clone()), stamp)))
                    .collect();
                (name.clone(), entries)
            })
            .collect();
        Self { fields, maps }
    }

    pub fn set_field(&mut self, key: &str, value: Option<FieldValue>, stamp: OpId) -> bool {
        set_register(&mut self.fields, key, value, stamp)
    }

    pub fn set_key(&mut self, map: &str, key: &str, value: Option<FieldValue>, stamp: OpId) -> bool {
        let entries = self.maps.entry(map.to_string()).or_default();
        set_register(entries, key, value, stamp)
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key).and_then(|r| r.value.as_ref())
    }

    pub fn key(&self, map: &str, key: &str) -> Option<&FieldValue> {
        self.maps
            .get(map)
            .and_then(|m| m.get(key))
            .and_then(|r| r.value.as_ref())
    }

    /// The record's `id` field, if it is a string.
    pub fn id(&self) -> Option<&str> {
        self.field("id").and_then(FieldValue::as_str)
    }

    /// Live entries of a nested map.
    pub fn entries(&self, map: &str) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.maps.get(map).into_iter().flat_map(|m| {
            m.iter()
                .filter_map(|(k, r)| r.value.as_ref().map(|v| (k.as_str(), v)))
        })
    }
}

fn set_register(
    registers: &mut BTreeMap<String, Register>,
    key: &str,
    value: Option<FieldValue>,
    stamp: OpId,
) -> bool {
    match registers.get_mut(key) {
        Some(register) => register.set(value, stamp),
        None => {
            registers.insert(key.to_string(), Lww::new(value, stamp));
            true
        }
    }
}

/// Initial contents of a record, as carried by an insert op.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordInit {
    pub fields: BTreeMap<String, FieldValue>,
    pub maps: BTreeMap<String, BTreeMap<String, FieldValue>>,
}

impl RecordInit {
    /// Split a JSON object: object-valued nested fields become maps,
    /// everything else a top-level field.
    pub fn from_json(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut init = RecordInit::default();
        for (key, value) in object {
            match value {
                serde_json::Value::Object(entries) if is_nested(key) => {
                    let entries = entries
                        .iter()
                        .map(|(k, v)| (k.clone(), FieldValue::from(v)))
                        .collect();
                    init.maps.insert(key.clone(), entries);
                }
                _ => {
                    init.fields.insert(key.clone(), FieldValue::from(value));
                }
            }
        }
        init
    }

    /// Serialize any record type through JSON.
    pub fn from_serialize<T: Serialize>(record: &T) -> crate::Result<Self> {
        match serde_json::to_value(record) {
            Ok(serde_json::Value::Object(object)) => Ok(Self::from_json(&object)),
            Ok(other) => Err(crate::CrdtError::Serialization(format!(
                "record must serialize to an object, got {other}"
            ))),
            Err(e) => Err(crate::CrdtError::Serialization(e.to_string())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub mod laws {
    use super::*;

    /// Verify CRDT laws: associativity, commutativity, idempotence.
    pub fn check_crdt_laws<T: Crdt + PartialEq + Clone + Debug>(a: T, b: T, c: T) {
        assert_eq!(a.join(&a), a, "idempotence failed for {a:?}");
        assert_eq!(
            a.join(&b),
            b.join(&a),
            "commutativity failed for {a:?} and {b:?}"
        );
        assert_eq!(
            a.join(&b).join(&c),
            a.join(&b.join(&c)),
            "associativity failed for {a:?}, {b:?}, {c:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_types::ReplicaId;

    fn stamp(lamport: u64, replica: u64) -> OpId {
        OpId::new(lamport, ReplicaId::new(replica))
    }

    #[test]
    fn test_lww_laws() {
        laws::check_crdt_laws(
            Lww::new(1, stamp(1, 1)),
            Lww::new(2, stamp(1, 2)),
            Lww::new(3, stamp(2, 1)),
        );
    }

    #[test]
    fn test_stale_write_loses() {
        let mut reg = Lww::new("new", stamp(5, 1));
        assert!(!reg.set("old", stamp(4, 9)));
        assert_eq!(reg.value, "new");
        assert!(reg.set("newer", stamp(5, 2)));
        assert_eq!(reg.value, "newer");
    }

    #[test]
    fn test_concurrent_subfield_writes_both_survive() {
        let init = RecordInit::from_json(
            json!({"id": "n1", "data": {"text": "a"}, "position": {"x": 0, "y": 0}})
                .as_object()
                .unwrap(),
        );
        let mut record = RecordState::from_init(&init, stamp(1, 1));
        record.set_key("position", "x", Some(FieldValue::Float(10.0)), stamp(2, 1));
        record.set_key("data", "text", Some("b".into()), stamp(2, 2));

        assert_eq!(record.key("position", "x"), Some(&FieldValue::Float(10.0)));
        assert_eq!(record.key("data", "text"), Some(&FieldValue::from("b")));
        assert_eq!(record.id(), Some("n1"));
    }

    #[test]
    fn test_non_object_nested_field_stays_scalar() {
        let init = RecordInit::from_json(json!({"data": "oops"}).as_object().unwrap());
        assert!(init.maps.is_empty());
        assert_eq!(init.fields.get("data"), Some(&FieldValue::from("oops")));
    }

    #[test]
    fn test_unset_key_is_hidden() {
        let mut record = RecordState::default();
        record.set_key("data", "k", Some(true.into()), stamp(1, 1));
        record.set_key("data", "k", None, stamp(2, 1));
        assert_eq!(record.entries("data").count(), 0);
    }
}
