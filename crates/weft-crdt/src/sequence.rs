//! Replicated growable array (RGA).
//!
//! Each element is inserted *after* an existing element (or at the head).
//! Concurrent inserts after the same element are ordered by descending
//! [`OpId`], so every replica places them identically regardless of arrival
//! order. Deletes leave a tombstone so later inserts can still anchor to the
//! deleted element.

use crate::Result;
use crate::clock::OpId;
use crate::error::CrdtError;

#[derive(Clone, Debug, PartialEq)]
pub struct Element<T> {
    pub id: OpId,
    pub value: T,
    pub deleted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sequence<T> {
    elements: Vec<Element<T>>,
    what: &'static str,
}

impl<T> Sequence<T> {
    pub fn new(what: &'static str) -> Self {
        Self {
            elements: Vec::new(),
            what,
        }
    }

    /// Position of an element (live or tombstoned) in the physical order.
    fn position(&self, id: OpId) -> Option<usize> {
        self.elements.iter().position(|e| e.id == id)
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: OpId) -> Option<&Element<T>> {
        self.position(id).map(|p| &self.elements[p])
    }

    pub fn get_mut(&mut self, id: OpId) -> Option<&mut Element<T>> {
        let p = self.position(id)?;
        Some(&mut self.elements[p])
    }

    /// Integrate an insert. Returns `Ok(false)` for a duplicate.
    pub fn integrate(&mut self, after: Option<OpId>, id: OpId, value: T) -> Result<bool> {
        if self.contains(id) {
            return Ok(false);
        }
        let mut p = match after {
            None => 0,
            Some(anchor) => self.position(anchor).ok_or(CrdtError::MissingDependency(anchor))? + 1,
        };
        // Skip the subtrees of concurrent siblings with a higher id.
        while p < self.elements.len() && self.elements[p].id > id {
            p += 1;
        }
        self.elements.insert(
            p,
            Element {
                id,
                value,
                deleted: false,
            },
        );
        Ok(true)
    }

    /// Tombstone an element. Returns `Ok(false)` if it was already deleted.
    pub fn delete(&mut self, id: OpId) -> Result<bool> {
        let element = self.get_mut(id).ok_or(CrdtError::MissingDependency(id))?;
        if element.deleted {
            return Ok(false);
        }
        element.deleted = true;
        Ok(true)
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.elements.iter().filter(|e| !e.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live elements in order.
    pub fn iter(&self) -> impl Iterator<Item = &Element<T>> {
        self.elements.iter().filter(|e| !e.deleted)
    }

    /// Id of the live element at visible `index`.
    pub fn id_at(&self, index: usize) -> Result<OpId> {
        self.iter()
            .nth(index)
            .map(|e| e.id)
            .ok_or(CrdtError::IndexOutOfBounds {
                what: self.what,
                index,
                len: self.len(),
            })
    }

    /// Anchor for inserting at visible `index` (`None` = head).
    pub fn anchor_for(&self, index: usize) -> Result<Option<OpId>> {
        if index == 0 {
            return Ok(None);
        }
        let len = self.len();
        if index > len {
            return Err(CrdtError::IndexOutOfBounds {
                what: self.what,
                index,
                len,
            });
        }
        self.id_at(index - 1).map(Some)
    }

    /// Visible index of a live element.
    pub fn index_of(&self, id: OpId) -> Option<usize> {
        self.iter().position(|e| e.id == id)
    }
}

// ============================================================================
// Tests
// ============================================================================
