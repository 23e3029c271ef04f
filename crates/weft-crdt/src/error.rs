//! Error types for replicated document operations.

use thiserror::Error;

use crate::clock::OpId;
use crate::ops::Collection;

/// Errors that can occur while building or applying document operations.
#[derive(Error, Debug)]
pub enum CrdtError {
    /// Visible index past the end of a sequence.
    #[error("index {index} out of bounds for {what} with length {len}")]
    IndexOutOfBounds {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// No live record with this element id.
    #[error("record {0:?} not found in {1:?}")]
    RecordNotFound(OpId, Collection),

    /// No live record whose `id` field matches.
    #[error("no record with id {0:?} in {1:?}")]
    UnknownRecordId(String, Collection),

    /// Text field has never been written.
    #[error("text field not found: {0}")]
    TextFieldNotFound(String),

    /// An op references an element this replica has not seen yet.
    #[error("missing dependency {0:?}")]
    MissingDependency(OpId),

    /// The op's Lamport range does not fit in a `u64`.
    #[error("lamport clock overflow at {0}")]
    ClockOverflow(OpId),

    /// Update or state vector bytes could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] postcard::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
