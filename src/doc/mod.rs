//! Document revision control on top of a file store.
//!
//! A document of one OT kind lives in a dedicated store: change `N` at
//! `<change_prefix>/<N>` and the latest snapshot at `snapshot_path`. Change
//! `N` is written by the transaction that takes the store from revision `N`
//! to `N + 1`, so the document revision is always the store revision minus one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    file::{PredicateFailure, StorageError, StoragePath, TransactionError},
    ot::OtError,
    sync::SingleFlightError,
    types::RevNum,
};

/// Per-document change log and snapshot access.
pub mod control;

pub use control::DocControl;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocError {
    #[error(transparent)]
    Ot(#[from] OtError),
    /// An optimistic-concurrency assumption failed; re-diff and retry.
    #[error("predicate failed: {0}")]
    Predicate(PredicateFailure),
    #[error("document does not exist")]
    DocumentMissing,
    #[error("document already exists")]
    AlreadyExists,
    #[error("no change with revision {0}")]
    NoSuchChange(RevNum),
    #[error("author rejected: {0}")]
    BadAuthor(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("storage: {0}")]
    Storage(String),
}

impl DocError {
    /// True when resubmitting against a newer snapshot may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Predicate(_))
    }
}

impl From<TransactionError> for DocError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Predicate(failure) => Self::Predicate(failure),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<StorageError> for DocError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<SingleFlightError> for DocError {
    fn from(err: SingleFlightError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocConfig {
    pub change_prefix: String,
    pub snapshot_path: String,
    /// Reject changes that carry no author id.
    pub require_author: bool,
    pub max_author_id_len: usize,
}

impl Default for DocConfig {
    fn default() -> Self {
        Self {
            change_prefix: "/change".to_string(),
            snapshot_path: "/snapshot".to_string(),
            require_author: false,
            max_author_id_len: 64,
        }
    }
}

impl DocConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub(crate) fn layout(&self) -> Result<Layout, DocError> {
        let change_prefix = StoragePath::new(self.change_prefix.clone())?;
        let snapshot_path = StoragePath::new(self.snapshot_path.clone())?;
        if snapshot_path == change_prefix || snapshot_path.is_under(&change_prefix) {
            return Err(DocError::Storage(format!(
                "snapshot path {snapshot_path} lies inside the change log {change_prefix}"
            )));
        }
        Ok(Layout {
            change_prefix,
            snapshot_path,
        })
    }

    pub(crate) fn check_author(&self, author_id: Option<&str>) -> Result<(), DocError> {
        match author_id {
            None if self.require_author => Err(DocError::BadAuthor("author id is required".to_string())),
            None => Ok(()),
            Some("") => Err(DocError::BadAuthor("author id is empty".to_string())),
            Some(id) if id.chars().count() > self.max_author_id_len => Err(DocError::BadAuthor(format!(
                "author id exceeds {} characters",
                self.max_author_id_len
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Validated storage locations of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    pub(crate) change_prefix: StoragePath,
    pub(crate) snapshot_path: StoragePath,
}

impl Layout {
    pub(crate) fn change_path(&self, rev_num: RevNum) -> Result<StoragePath, DocError> {
        Ok(self.change_prefix.join(rev_num)?)
    }
}
