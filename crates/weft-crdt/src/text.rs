//! Collaborative rich-text fields.
//!
//! A text field is an RGA of characters, each optionally carrying formatting
//! attributes. Runs of adjacent characters with equal attributes form the
//! rich structure; the plain text is derived from it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::clock::OpId;
use crate::sequence::Sequence;
use crate::value::FieldValue;

/// Formatting attributes (`bold`, `link`, heading level, ...).
pub type TextAttrs = BTreeMap<String, FieldValue>;

#[derive(Clone, Debug, PartialEq)]
pub struct TextElem {
    pub ch: char,
    pub attrs: Option<TextAttrs>,
}

/// A maximal run of characters sharing the same attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub attrs: Option<TextAttrs>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextField {
    chars: Sequence<TextElem>,
}

impl Default for TextField {
    fn default() -> Self {
        Self::new()
    }
}

impl TextField {
    pub fn new() -> Self {
        Self {
            chars: Sequence::new("text"),
        }
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.chars.contains(id)
    }

    pub fn plain_text(&self) -> String {
        self.chars.iter().map(|e| e.value.ch).collect()
    }

    pub fn runs(&self) -> Vec<TextRun> {
        let mut runs: Vec<TextRun> = Vec::new();
        for element in self.chars.iter() {
            match runs.last_mut() {
                Some(run) if run.attrs == element.value.attrs => run.text.push(element.value.ch),
                _ => runs.push(TextRun {
                    text: element.value.ch.to_string(),
                    attrs: element.value.attrs.clone(),
                }),
            }
        }
        runs
    }

    pub fn anchor_for(&self, index: usize) -> Result<Option<OpId>> {
        self.chars.anchor_for(index)
    }

    /// Ids of the `len` visible characters starting at `index`.
    pub fn ids_in_range(&self, index: usize, len: usize) -> Result<Vec<OpId>> {
        let total = self.len();
        if index + len > total {
            return Err(crate::CrdtError::IndexOutOfBounds {
                what: "text",
                index: index + len,
                len: total,
            });
        }
        Ok(self.chars.iter().skip(index).take(len).map(|e| e.id).collect())
    }

    /// Integrate a run inserted by op `base`. Returns `Ok(false)` for a duplicate.
    pub fn integrate_insert(
        &mut self,
        base: OpId,
        after: Option<OpId>,
        text: &str,
        attrs: Option<&TextAttrs>,
    ) -> Result<bool> {
        let mut anchor = after;
        let mut inserted = false;
        for (i, ch) in text.chars().enumerate() {
            let id = base.nth(i as u64).ok_or(crate::CrdtError::ClockOverflow(base))?;
            let elem = TextElem {
                ch,
                attrs: attrs.cloned(),
            };
            inserted |= self.chars.integrate(anchor, id, elem)?;
            anchor = Some(id);
        }
        Ok(inserted)
    }

    /// Tombstone characters. Returns `true` if any was live.
    pub fn delete(&mut self, targets: &[OpId]) -> Result<bool> {
        let mut changed = false;
        for target in targets {
            changed |= self.chars.delete(*target)?;
        }
        Ok(changed)
    }
}
