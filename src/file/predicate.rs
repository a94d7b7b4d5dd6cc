use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::RevNum;

use super::{ContentHash, FileSnapshot, StoragePath};

/// A boolean condition over a [`FileSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PredicateOp {
    BlobPresent { hash: ContentHash },
    BlobAbsent { hash: ContentHash },
    PathPresent { path: StoragePath },
    PathAbsent { path: StoragePath },
    PathIs { path: StoragePath, hash: ContentHash },
    /// Also holds when the path is absent.
    PathIsNot { path: StoragePath, hash: ContentHash },
    #[serde(rename_all = "camelCase")]
    RevNumIs { rev_num: RevNum },
}

impl PredicateOp {
    pub fn blob_present(hash: impl Into<ContentHash>) -> Self {
        Self::BlobPresent { hash: hash.into() }
    }

    pub fn blob_absent(hash: impl Into<ContentHash>) -> Self {
        Self::BlobAbsent { hash: hash.into() }
    }

    pub fn path_present(path: StoragePath) -> Self {
        Self::PathPresent { path }
    }

    pub fn path_absent(path: StoragePath) -> Self {
        Self::PathAbsent { path }
    }

    pub fn path_is(path: StoragePath, hash: impl Into<ContentHash>) -> Self {
        Self::PathIs {
            path,
            hash: hash.into(),
        }
    }

    pub fn path_is_not(path: StoragePath, hash: impl Into<ContentHash>) -> Self {
        Self::PathIsNot {
            path,
            hash: hash.into(),
        }
    }

    pub fn rev_num_is(rev_num: RevNum) -> Self {
        Self::RevNumIs { rev_num }
    }

    /// Evaluates the predicate.
    pub fn test(&self, snapshot: &FileSnapshot) -> bool {
        match self {
            Self::BlobPresent { hash } => snapshot.has_blob(hash),
            Self::BlobAbsent { hash } => !snapshot.has_blob(hash),
            Self::PathPresent { path } => snapshot.has_path(path),
            Self::PathAbsent { path } => !snapshot.has_path(path),
            Self::PathIs { path, hash } => snapshot.path_hash(path) == Some(*hash),
            Self::PathIsNot { path, hash } => snapshot.path_hash(path) != Some(*hash),
            Self::RevNumIs { rev_num } => snapshot.rev_num() == *rev_num,
        }
    }

    /// Like [`Self::test`], but reports why the predicate does not hold.
    pub fn check(&self, snapshot: &FileSnapshot) -> Result<(), PredicateFailure> {
        if self.test(snapshot) {
            return Ok(());
        }
        let error_name = match self {
            Self::BlobPresent { .. } => PredicateErrorName::BlobNotFound,
            Self::BlobAbsent { .. } => PredicateErrorName::BlobNotAbsent,
            Self::PathPresent { .. } => PredicateErrorName::PathNotFound,
            Self::PathAbsent { .. } => PredicateErrorName::PathNotAbsent,
            Self::PathIs { path, .. } if !snapshot.has_path(path) => PredicateErrorName::PathNotFound,
            Self::PathIs { .. } | Self::PathIsNot { .. } => PredicateErrorName::PathHashMismatch,
            Self::RevNumIs { .. } => PredicateErrorName::RevNumMismatch,
        };
        Err(PredicateFailure {
            error_name,
            op: self.clone(),
        })
    }

    /// The op's arguments, in declaration order.
    pub fn args(&self) -> Vec<Value> {
        let hash = |h: &ContentHash| Value::from(h.to_string());
        let path = |p: &StoragePath| Value::from(p.as_str());
        match self {
            Self::BlobPresent { hash: h } | Self::BlobAbsent { hash: h } => vec![hash(h)],
            Self::PathPresent { path: p } | Self::PathAbsent { path: p } => vec![path(p)],
            Self::PathIs { path: p, hash: h } | Self::PathIsNot { path: p, hash: h } => {
                vec![path(p), hash(h)]
            }
            Self::RevNumIs { rev_num } => vec![Value::from(*rev_num)],
        }
    }
}

/// Why a predicate check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PredicateErrorName {
    BlobNotAbsent,
    BlobNotFound,
    PathNotAbsent,
    PathNotFound,
    PathHashMismatch,
    RevNumMismatch,
}

impl PredicateErrorName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlobNotAbsent => "blobNotAbsent",
            Self::BlobNotFound => "blobNotFound",
            Self::PathNotAbsent => "pathNotAbsent",
            Self::PathNotFound => "pathNotFound",
            Self::PathHashMismatch => "pathHashMismatch",
            Self::RevNumMismatch => "revNumMismatch",
        }
    }
}

impl fmt::Display for PredicateErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An optimistic-concurrency assumption that no longer holds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{error_name}: {op:?}")]
pub struct PredicateFailure {
    pub error_name: PredicateErrorName,
    /// The predicate that failed.
    pub op: PredicateOp,
}

/// Wire form of a [`PredicateFailure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateFailurePayload {
    pub error_name: PredicateErrorName,
    pub args: Vec<Value>,
}

impl PredicateFailure {
    pub fn to_payload(&self) -> PredicateFailurePayload {
        PredicateFailurePayload {
            error_name: self.error_name,
            args: self.op.args(),
        }
    }
}

/// A set of predicates evaluated together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateSpec {
    ops: Vec<PredicateOp>,
}

impl PredicateSpec {
    pub fn new(ops: impl IntoIterator<Item = PredicateOp>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
        }
    }

    pub fn ops(&self) -> &[PredicateOp] {
        &self.ops
    }

    /// Conjunction; true when empty.
    pub fn all_pass(&self, snapshot: &FileSnapshot) -> bool {
        self.ops.iter().all(|op| op.test(snapshot))
    }

    /// Disjunction; false when empty.
    pub fn any_pass(&self, snapshot: &FileSnapshot) -> bool {
        self.ops.iter().any(|op| op.test(snapshot))
    }

    /// Fails with the first unsatisfied predicate.
    pub fn check_all(&self, snapshot: &FileSnapshot) -> Result<(), PredicateFailure> {
        self.ops.iter().try_for_each(|op| op.check(snapshot))
    }
}
