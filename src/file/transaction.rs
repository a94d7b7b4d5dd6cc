use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RevNum, now_ms};

use super::{
    Blob, ContentHash, FileSnapshot, PredicateFailure, PredicateOp, PredicateSpec, StorageError,
    StoragePath, StoredRevision,
};

/// Read performed against the pre-commit snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PullOp {
    ReadBlob { hash: ContentHash },
    ReadPath { path: StoragePath },
    /// Strict descendants of `prefix`, sorted.
    ListPathPrefix { prefix: StoragePath },
}

impl PullOp {
    pub fn read_blob(hash: impl Into<ContentHash>) -> Self {
        Self::ReadBlob { hash: hash.into() }
    }

    pub fn read_path(path: StoragePath) -> Self {
        Self::ReadPath { path }
    }

    pub fn list_path_prefix(prefix: StoragePath) -> Self {
        Self::ListPathPrefix { prefix }
    }
}

/// Write applied atomically with the rest of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PushOp {
    WriteBlob { blob: Blob },
    /// Stores `blob` and maps `path` to its hash.
    WritePath { path: StoragePath, blob: Blob },
    DeleteBlob { hash: ContentHash },
    DeletePath { path: StoragePath },
    DeletePathPrefix { prefix: StoragePath },
    DeleteAll,
}

impl PushOp {
    pub fn write_blob(blob: Blob) -> Self {
        Self::WriteBlob { blob }
    }

    pub fn write_path(path: StoragePath, blob: Blob) -> Self {
        Self::WritePath { path, blob }
    }

    pub fn delete_blob(hash: impl Into<ContentHash>) -> Self {
        Self::DeleteBlob { hash: hash.into() }
    }

    pub fn delete_path(path: StoragePath) -> Self {
        Self::DeletePath { path }
    }

    pub fn delete_path_prefix(prefix: StoragePath) -> Self {
        Self::DeletePathPrefix { prefix }
    }

    pub fn delete_all() -> Self {
        Self::DeleteAll
    }

    /// Deletions run before writes within one transaction.
    pub fn is_deletion(&self) -> bool {
        !matches!(self, Self::WriteBlob { .. } | Self::WritePath { .. })
    }
}

/// Condition a transaction blocks on after its pushes land.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WaitOp {
    #[serde(rename_all = "camelCase")]
    WhenRevNumAfter { rev_num: RevNum },
    WhenPathNot { path: StoragePath, hash: ContentHash },
}

impl WaitOp {
    pub fn when_rev_num_after(rev_num: RevNum) -> Self {
        Self::WhenRevNumAfter { rev_num }
    }

    pub fn when_path_not(path: StoragePath, hash: impl Into<ContentHash>) -> Self {
        Self::WhenPathNot {
            path,
            hash: hash.into(),
        }
    }

    pub fn is_satisfied(&self, snapshot: &FileSnapshot) -> bool {
        match self {
            Self::WhenRevNumAfter { rev_num } => snapshot.rev_num() > *rev_num,
            Self::WhenPathNot { path, hash } => snapshot.path_hash(path) != Some(*hash),
        }
    }
}

/// One element of a [`TransactionSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionOp {
    Check(PredicateOp),
    Pull(PullOp),
    Push(PushOp),
    Wait(WaitOp),
    /// Upper bound on a wait, in milliseconds.
    Timeout(u64),
}

impl From<PredicateOp> for TransactionOp {
    fn from(op: PredicateOp) -> Self {
        Self::Check(op)
    }
}

impl From<PullOp> for TransactionOp {
    fn from(op: PullOp) -> Self {
        Self::Pull(op)
    }
}

impl From<PushOp> for TransactionOp {
    fn from(op: PushOp) -> Self {
        Self::Push(op)
    }
}

impl From<WaitOp> for TransactionOp {
    fn from(op: WaitOp) -> Self {
        Self::Wait(op)
    }
}

/// Validated, duplicate-free list of transaction ops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TransactionOp>", into = "Vec<TransactionOp>")]
pub struct TransactionSpec {
    ops: Vec<TransactionOp>,
}

impl TransactionSpec {
    /// Drops exact duplicates; rejects more than one wait or timeout.
    pub fn new<I, T>(ops: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = T>,
        T: Into<TransactionOp>,
    {
        let mut deduped: Vec<TransactionOp> = Vec::new();
        for op in ops {
            let op = op.into();
            if !deduped.contains(&op) {
                deduped.push(op);
            }
        }
        let waits = deduped.iter().filter(|op| matches!(op, TransactionOp::Wait(_))).count();
        if waits > 1 {
            return Err(StorageError::BadUse(format!(
                "transaction has {waits} wait ops; at most one is allowed"
            )));
        }
        let timeouts = deduped.iter().filter(|op| matches!(op, TransactionOp::Timeout(_))).count();
        if timeouts > 1 {
            return Err(StorageError::BadUse(format!(
                "transaction has {timeouts} timeout ops; at most one is allowed"
            )));
        }
        Ok(Self { ops: deduped })
    }

    pub fn ops(&self) -> &[TransactionOp] {
        &self.ops
    }

    pub fn checks(&self) -> PredicateSpec {
        PredicateSpec::new(self.ops.iter().filter_map(|op| match op {
            TransactionOp::Check(check) => Some(check.clone()),
            _ => None,
        }))
    }

    pub fn pulls(&self) -> impl Iterator<Item = &PullOp> {
        self.ops.iter().filter_map(|op| match op {
            TransactionOp::Pull(pull) => Some(pull),
            _ => None,
        })
    }

    pub fn pushes(&self) -> impl Iterator<Item = &PushOp> {
        self.ops.iter().filter_map(|op| match op {
            TransactionOp::Push(push) => Some(push),
            _ => None,
        })
    }

    pub fn has_pushes(&self) -> bool {
        self.pushes().next().is_some()
    }

    pub fn wait(&self) -> Option<&WaitOp> {
        self.ops.iter().find_map(|op| match op {
            TransactionOp::Wait(wait) => Some(wait),
            _ => None,
        })
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.ops.iter().find_map(|op| match op {
            TransactionOp::Timeout(ms) => Some(*ms),
            _ => None,
        })
    }

    /// Checks, pulls and pushes against `snapshot`. Waits are left to the caller.
    pub fn run(&self, snapshot: &FileSnapshot) -> Result<TransactionOutcome, TransactionError> {
        self.checks().check_all(snapshot)?;

        let mut result = TransactionResult {
            rev_num: snapshot.rev_num(),
            ..TransactionResult::default()
        };
        for pull in self.pulls() {
            match pull {
                PullOp::ReadBlob { hash } => {
                    result.blobs.insert(*hash, snapshot.blob(hash).cloned());
                }
                PullOp::ReadPath { path } => {
                    result.paths.insert(path.clone(), snapshot.path_blob(path).cloned());
                }
                PullOp::ListPathPrefix { prefix } => {
                    let listed = snapshot.paths_with_prefix(prefix).into_iter().cloned().collect();
                    result.listings.insert(prefix.clone(), listed);
                }
            }
        }

        let pushes: Vec<PushOp> = self.pushes().cloned().collect();
        if pushes.is_empty() {
            return Ok(TransactionOutcome {
                result,
                next: None,
                revision: None,
            });
        }
        let next = snapshot.with_pushes(&pushes)?;
        result.rev_num = next.rev_num();
        let revision = StoredRevision {
            rev_num: next.rev_num(),
            ts_ms: now_ms(),
            pushes,
        };
        Ok(TransactionOutcome {
            result,
            next: Some(next),
            revision: Some(revision),
        })
    }
}

impl TryFrom<Vec<TransactionOp>> for TransactionSpec {
    type Error = StorageError;

    fn try_from(ops: Vec<TransactionOp>) -> Result<Self, Self::Error> {
        Self::new(ops)
    }
}

impl From<TransactionSpec> for Vec<TransactionOp> {
    fn from(spec: TransactionSpec) -> Self {
        spec.ops
    }
}

/// What a committed transaction reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    /// Revision after the transaction's pushes (unchanged without pushes).
    pub rev_num: RevNum,
    pub blobs: BTreeMap<ContentHash, Option<Blob>>,
    pub paths: BTreeMap<StoragePath, Option<Blob>>,
    pub listings: BTreeMap<StoragePath, Vec<StoragePath>>,
    /// `None` without a wait op; `Some(false)` when the timeout elapsed first.
    pub wait_satisfied: Option<bool>,
}

impl TransactionResult {
    pub fn blob(&self, hash: &ContentHash) -> Option<&Blob> {
        self.blobs.get(hash).and_then(Option::as_ref)
    }

    pub fn path(&self, path: &StoragePath) -> Option<&Blob> {
        self.paths.get(path).and_then(Option::as_ref)
    }

    pub fn listing(&self, prefix: &StoragePath) -> &[StoragePath] {
        self.listings.get(prefix).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Output of [`TransactionSpec::run`].
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub result: TransactionResult,
    /// Replacement snapshot, present when the transaction had pushes.
    pub next: Option<FileSnapshot>,
    pub revision: Option<StoredRevision>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("predicate failed: {0}")]
    Predicate(#[from] PredicateFailure),
    #[error("blob {0} is still referenced by a path")]
    BlobInUse(ContentHash),
    #[error(transparent)]
    Spec(#[from] StorageError),
    #[error("persistence: {0}")]
    Persist(String),
    #[error("file store is closed")]
    Closed,
}

impl TransactionError {
    /// The predicate failure, when that is why the transaction was rejected.
    pub fn predicate_failure(&self) -> Option<&PredicateFailure> {
        match self {
            Self::Predicate(failure) => Some(failure),
            _ => None,
        }
    }
}
