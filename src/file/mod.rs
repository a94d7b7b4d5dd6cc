//! Versioned, content-addressed file storage with predicated transactions.
//!
//! A [`FileSnapshot`] maps paths to blob hashes at a revision. A
//! [`TransactionSpec`] bundles checks, pulls, pushes and at most one wait;
//! running it against a snapshot either fails on the first unsatisfied check
//! or yields the read results plus, when there were pushes, the next snapshot.

use thiserror::Error;

/// Content hashes and blobs.
pub mod hash;
/// Storage path syntax.
pub mod path;
/// Predicates over file snapshots.
pub mod predicate;
/// Journal record of one committed revision.
pub mod revision;
/// Immutable file-store state.
pub mod snapshot;
/// Transaction ops, specs and the pure commit steps.
pub mod transaction;

pub use hash::{Blob, ContentHash};
pub use path::StoragePath;
pub use predicate::{
    PredicateErrorName, PredicateFailure, PredicateFailurePayload, PredicateOp, PredicateSpec,
};
pub use revision::{StoredRevision, StoredRevisionEnvelope};
pub use snapshot::{FileSnapshot, FileSnapshotV1};
pub use transaction::{
    PullOp, PushOp, TransactionError, TransactionOp, TransactionOutcome, TransactionResult,
    TransactionSpec, WaitOp,
};

/// Construction-time validation failures for storage values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Malformed path, hash or argument.
    #[error("bad value: {0}")]
    BadValue(String),
    /// Ops combined in a way the store does not allow.
    #[error("bad use: {0}")]
    BadUse(String),
}
