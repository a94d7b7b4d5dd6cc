//! Operational-transformation algebra.
//!
//! A [`Delta`] is an ordered, immutable list of ops of one kind. Deltas compose
//! (`a.compose(b)` is "apply `a`, then `b`"), a [`Change`] tags a delta with the
//! revision it produces, and a [`Snapshot`] is a document-shaped delta at a
//! revision. Three kinds are provided: rich text ([`body`]), scalar properties
//! ([`property`]) and live carets ([`caret`]).

use thiserror::Error;

/// Rich-text body ops in Quill-compatible form.
pub mod body;
/// Caret / presence ops keyed by session.
pub mod caret;
/// Revision-tagged deltas and their storage envelope.
pub mod change;
/// Generic immutable delta.
pub mod delta;
/// Op trait, opcode names and payload form.
pub mod op;
/// Key/value property ops.
pub mod property;
/// Materialized document state at a revision.
pub mod snapshot;

pub use change::{Change, ChangeEnvelope};
pub use delta::Delta;
pub use op::{DeltaOp, OpName, Payload};
pub use snapshot::Snapshot;

/// Errors raised by the OT algebra. None of these are transient.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OtError {
    /// Malformed opcode name, argument shape or identifier.
    #[error("bad value: {0}")]
    BadValue(String),
    /// Values of incompatible kinds were combined.
    #[error("bad use: {0}")]
    BadUse(String),
    /// A change does not fit the snapshot it is applied to.
    #[error("invalid change: {0}")]
    InvalidChange(String),
}

impl OtError {
    pub(crate) fn bad_value(msg: impl Into<String>) -> Self {
        Self::BadValue(msg.into())
    }

    pub(crate) fn invalid_change(msg: impl Into<String>) -> Self {
        Self::InvalidChange(msg.into())
    }
}
