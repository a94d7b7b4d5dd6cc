use serde::{Deserialize, Serialize};

use crate::types::{RevNum, TimestampMs};

use super::PushOp;

/// Version number for serialized [`StoredRevisionEnvelope`] payloads.
pub const REVISION_FORMAT_VERSION: u16 = 1;

/// The pushes that produced one revision, as appended to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRevision {
    /// Revision these pushes produced.
    pub rev_num: RevNum,
    pub ts_ms: TimestampMs,
    pub pushes: Vec<PushOp>,
}

/// Versioned wrapper for stable on-disk decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRevisionEnvelope {
    pub format_version: u16,
    pub stored: StoredRevision,
}

impl StoredRevisionEnvelope {
    pub fn new(stored: StoredRevision) -> Self {
        Self {
            format_version: REVISION_FORMAT_VERSION,
            stored,
        }
    }

    /// Unwraps the revision if its format is one this build reads.
    pub fn into_current(self) -> Option<StoredRevision> {
        (self.format_version == REVISION_FORMAT_VERSION).then_some(self.stored)
    }
}
