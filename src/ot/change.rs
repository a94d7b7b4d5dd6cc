use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AuthorId, RevNum, TimestampMs};

use super::{Delta, DeltaOp, OtError};

/// Version number for serialized [`ChangeEnvelope`] payloads.
pub const CHANGE_FORMAT_VERSION: u16 = 1;

/// One step of a document's linear history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    bound(serialize = "O: DeltaOp", deserialize = "O: DeltaOp")
)]
pub struct Change<O> {
    /// Revision this change produces.
    pub rev_num: RevNum,
    /// The edit itself.
    pub delta: Delta<O>,
    /// When the change was made, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<TimestampMs>,
    /// Who made the change, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<AuthorId>,
}

impl<O: DeltaOp> Change<O> {
    pub fn new(rev_num: RevNum, delta: Delta<O>) -> Self {
        Self {
            rev_num,
            delta,
            timestamp_ms: None,
            author_id: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: TimestampMs) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn with_author(mut self, author_id: impl Into<AuthorId>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }
}

/// Versioned, kind-tagged wrapper for stored changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEnvelope<C> {
    /// Payload format version.
    pub format_version: u16,
    /// Op kind of the wrapped change.
    pub kind: String,
    /// Wrapped change.
    pub change: C,
}

impl<O: DeltaOp> ChangeEnvelope<Change<O>> {
    /// Encodes `change` as envelope JSON.
    pub fn encode(change: &Change<O>) -> Result<Vec<u8>, OtError> {
        let env = ChangeEnvelope {
            format_version: CHANGE_FORMAT_VERSION,
            kind: O::KIND.to_string(),
            change,
        };
        serde_json::to_vec(&env).map_err(|e| OtError::bad_value(format!("change encode failed: {e}")))
    }

    /// Decodes envelope JSON, rejecting other kinds and format versions.
    pub fn decode(bytes: &[u8]) -> Result<Change<O>, OtError> {
        let env: ChangeEnvelope<Value> = serde_json::from_slice(bytes)
            .map_err(|e| OtError::bad_value(format!("change envelope decode failed: {e}")))?;
        if env.format_version != CHANGE_FORMAT_VERSION {
            return Err(OtError::bad_value(format!(
                "unsupported change format version: {}",
                env.format_version
            )));
        }
        if env.kind != O::KIND {
            return Err(OtError::BadUse(format!(
                "expected a `{}` change, found `{}`",
                O::KIND,
                env.kind
            )));
        }
        serde_json::from_value(env.change)
            .map_err(|e| OtError::bad_value(format!("change decode failed: {e}")))
    }
}
