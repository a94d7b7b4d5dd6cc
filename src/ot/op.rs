//! Op contract shared by every delta kind.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::OtError;

/// Closed set of opcode names for one op kind.
pub trait OpName: Copy + Eq + fmt::Debug + FromStr<Err = OtError> + 'static {
    /// Every opcode of the kind, in declaration order.
    const ALL: &'static [Self];

    /// Wire name of the opcode.
    fn as_str(self) -> &'static str;

    /// Returns true when `name` is one of [`Self::ALL`].
    fn is_valid_name(name: &str) -> bool {
        Self::ALL.iter().any(|n| n.as_str() == name)
    }

    /// Parses by scanning [`Self::ALL`]; usable as a `FromStr` body.
    fn parse_name(name: &str) -> Result<Self, OtError> {
        Self::ALL
            .iter()
            .copied()
            .find(|n| n.as_str() == name)
            .ok_or_else(|| OtError::bad_value(format!("unknown opcode `{name}`")))
    }
}

/// Generic `{ name, args }` form of an op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Opcode name.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl Payload {
    /// Builds a payload from an opcode and its arguments.
    pub fn new<N: OpName>(name: N, args: Vec<Value>) -> Self {
        Self {
            name: name.as_str().to_string(),
            args,
        }
    }

    /// Returns the argument at `idx`, failing when absent.
    pub(crate) fn arg(&self, idx: usize) -> Result<&Value, OtError> {
        self.args
            .get(idx)
            .ok_or_else(|| OtError::bad_value(format!("`{}` is missing argument {idx}", self.name)))
    }

    /// Returns the argument at `idx` if present and not null.
    pub(crate) fn opt_arg(&self, idx: usize) -> Option<&Value> {
        self.args.get(idx).filter(|v| !v.is_null())
    }

    pub(crate) fn expect_arity(&self, min: usize, max: usize) -> Result<(), OtError> {
        let n = self.args.len();
        if n < min || n > max {
            return Err(OtError::bad_value(format!(
                "`{}` takes {min}..={max} arguments, got {n}",
                self.name
            )));
        }
        Ok(())
    }

    pub(crate) fn str_arg(&self, idx: usize) -> Result<&str, OtError> {
        self.arg(idx)?
            .as_str()
            .ok_or_else(|| OtError::bad_value(format!("`{}` argument {idx} must be a string", self.name)))
    }

    pub(crate) fn u64_arg(&self, idx: usize) -> Result<u64, OtError> {
        self.arg(idx)?.as_u64().ok_or_else(|| {
            OtError::bad_value(format!(
                "`{}` argument {idx} must be a non-negative integer",
                self.name
            ))
        })
    }
}

/// One immutable instruction of a concrete delta kind.
///
/// Implementors are plain enums: construction goes through validating factory
/// functions, so a value that exists is always well formed.
pub trait DeltaOp:
    Sized + Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Opcode enum for this kind.
    type Name: OpName;

    /// Kind tag used in diagnostics and stored envelopes.
    const KIND: &'static str;

    /// Opcode of this op.
    fn name(&self) -> Self::Name;

    /// Validates `payload` (name first, then argument shape) and builds the op.
    fn from_payload(payload: &Payload) -> Result<Self, OtError>;

    /// Converts the op to its generic payload form.
    fn to_payload(&self) -> Payload;

    /// True when `ops`, applied to nothing, stands in as a whole document.
    fn is_document(ops: &[Self]) -> bool;

    /// Ops equivalent to applying `base` then `other`. With `want_document`,
    /// transform-only ops are dropped from the result.
    fn compose(base: &[Self], other: &[Self], want_document: bool) -> Vec<Self>;

    /// Ops that turn document `old` into document `new`.
    fn diff(old: &[Self], new: &[Self]) -> Vec<Self>;

    /// Structural check of `delta` against document `doc`.
    fn validate_change(doc: &[Self], delta: &[Self]) -> Result<(), OtError> {
        let _ = (doc, delta);
        Ok(())
    }
}
