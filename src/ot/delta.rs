use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{DeltaOp, OtError, Payload};

/// Immutable, ordered sequence of same-kind ops.
///
/// Cloning is cheap; the op list is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta<O> {
    ops: Arc<[O]>,
}

impl<O: DeltaOp> Delta<O> {
    /// Wraps `ops` without normalizing them.
    pub fn new(ops: Vec<O>) -> Self {
        Self { ops: ops.into() }
    }

    /// The empty delta.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Validates and converts a list of payloads.
    pub fn from_payloads(payloads: &[Payload]) -> Result<Self, OtError> {
        let ops = payloads
            .iter()
            .map(O::from_payload)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(ops))
    }

    /// Converts every op to payload form.
    pub fn to_payloads(&self) -> Vec<Payload> {
        self.ops.iter().map(DeltaOp::to_payload).collect()
    }

    /// The ops, in order.
    pub fn ops(&self) -> &[O] {
        &self.ops
    }

    /// Number of ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when the delta has no ops.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when this delta could be used as a whole document.
    pub fn is_document(&self) -> bool {
        O::is_document(&self.ops)
    }

    /// Net effect of applying `self` then `other`; `other` wins conflicts.
    pub fn compose(&self, other: &Delta<O>, want_document: bool) -> Delta<O> {
        if other.is_empty() && !want_document {
            return self.clone();
        }
        Self::new(O::compose(&self.ops, &other.ops, want_document))
    }

    /// Left fold of [`Self::compose`] over `deltas`.
    pub fn compose_all<'a, I>(&self, deltas: I, want_document: bool) -> Delta<O>
    where
        I: IntoIterator<Item = &'a Delta<O>>,
    {
        deltas
            .into_iter()
            .fold(self.clone(), |acc, d| acc.compose(d, want_document))
    }
}

impl<O: DeltaOp> Default for Delta<O> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<O: DeltaOp> From<Vec<O>> for Delta<O> {
    fn from(ops: Vec<O>) -> Self {
        Self::new(ops)
    }
}

impl<O: DeltaOp> Serialize for Delta<O> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ops.serialize(serializer)
    }
}

impl<'de, O: DeltaOp> Deserialize<'de> for Delta<O> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<O>::deserialize(deserializer).map(Self::new)
    }
}
