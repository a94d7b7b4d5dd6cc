pub mod sqlite;

use thiserror::Error;

use crate::{
    file::{FileSnapshotV1, StorageError, StoredRevision, TransactionError},
    types::RevNum,
};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// The stored journal cannot be replayed as written.
    #[error("corrupt journal: {0}")]
    Corrupt(String),
    #[error("{0}")]
    Message(String),
}

impl From<StorageError> for PersistError {
    fn from(value: StorageError) -> Self {
        Self::Corrupt(value.to_string())
    }
}

impl From<TransactionError> for PersistError {
    fn from(value: TransactionError) -> Self {
        Self::Corrupt(format!("revision does not replay: {value}"))
    }
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination for committed revisions.
pub trait RevisionSink: Send {
    /// Appends revisions in order; returns the highest revision now stored.
    fn append_revisions(&mut self, revisions: &[StoredRevision]) -> PersistResult<RevNum>;
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    fn write_snapshot(&mut self, _snapshot: &FileSnapshotV1) -> PersistResult<()> {
        Ok(())
    }
    /// Drops journal entries up to and including `rev_num`.
    fn compact_through(&mut self, _rev_num: RevNum) -> PersistResult<usize> {
        Ok(0)
    }
}
