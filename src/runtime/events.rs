//! Runtime event stream payloads.

use crate::types::RevNum;

/// Events published by a file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A transaction with pushes produced this revision.
    Committed { rev_num: RevNum },
    /// Persistence has reached at least this revision.
    DurableUpTo { rev_num: RevNum },
}
