//! Scalar key/value property deltas.

use std::{collections::BTreeMap, str::FromStr};

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::is_identifier;

use super::{Change, Delta, DeltaOp, OpName, OtError, Payload, Snapshot};

/// Property delta.
pub type PropertyDelta = Delta<PropertyOp>;
/// Property change.
pub type PropertyChange = Change<PropertyOp>;
/// Property snapshot.
pub type PropertySnapshot = Snapshot<PropertyOp>;

/// Opcodes of [`PropertyOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyOpName {
    Set,
    Delete,
}

impl OpName for PropertyOpName {
    const ALL: &'static [Self] = &[Self::Set, Self::Delete];

    fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for PropertyOpName {
    type Err = OtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_name(s)
    }
}

/// Sets or removes one named property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Payload", into = "Payload")]
pub enum PropertyOp {
    Set { key: String, value: Value },
    Delete { key: String },
}

impl PropertyOp {
    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Result<Self, OtError> {
        Ok(Self::Set {
            key: check_key(key.into())?,
            value: value.into(),
        })
    }

    pub fn delete(key: impl Into<String>) -> Result<Self, OtError> {
        Ok(Self::Delete {
            key: check_key(key.into())?,
        })
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

fn check_key(key: String) -> Result<String, OtError> {
    if !is_identifier(&key) {
        return Err(OtError::bad_value(format!("invalid property name `{key}`")));
    }
    Ok(key)
}

impl TryFrom<Payload> for PropertyOp {
    type Error = OtError;

    fn try_from(payload: Payload) -> Result<Self, Self::Error> {
        Self::from_payload(&payload)
    }
}

impl From<PropertyOp> for Payload {
    fn from(op: PropertyOp) -> Self {
        op.to_payload()
    }
}

impl DeltaOp for PropertyOp {
    type Name = PropertyOpName;

    const KIND: &'static str = "property";

    fn name(&self) -> PropertyOpName {
        match self {
            Self::Set { .. } => PropertyOpName::Set,
            Self::Delete { .. } => PropertyOpName::Delete,
        }
    }

    fn from_payload(payload: &Payload) -> Result<Self, OtError> {
        match payload.name.parse::<PropertyOpName>()? {
            PropertyOpName::Set => {
                payload.expect_arity(2, 2)?;
                Self::set(payload.str_arg(0)?, payload.arg(1)?.clone())
            }
            PropertyOpName::Delete => {
                payload.expect_arity(1, 1)?;
                Self::delete(payload.str_arg(0)?)
            }
        }
    }

    fn to_payload(&self) -> Payload {
        let args = match self {
            Self::Set { key, value } => vec![Value::from(key.as_str()), value.clone()],
            Self::Delete { key } => vec![Value::from(key.as_str())],
        };
        Payload::new(self.name(), args)
    }

    fn is_document(ops: &[Self]) -> bool {
        let mut seen = HashSet::new();
        ops.iter().all(|op| !op.is_delete() && seen.insert(op.key()))
    }

    fn compose(base: &[Self], other: &[Self], want_document: bool) -> Vec<Self> {
        let mut by_key: BTreeMap<&str, &Self> = BTreeMap::new();
        for op in base.iter().chain(other) {
            by_key.insert(op.key(), op);
        }
        by_key
            .into_values()
            .filter(|op| !(want_document && op.is_delete()))
            .cloned()
            .collect()
    }

    fn diff(old: &[Self], new: &[Self]) -> Vec<Self> {
        let old_values = values_by_key(old);
        let new_values = values_by_key(new);

        let mut out: BTreeMap<&str, Self> = BTreeMap::new();
        for &key in old_values.keys() {
            if !new_values.contains_key(key) {
                out.insert(key, Self::Delete { key: key.to_string() });
            }
        }
        for (&key, &value) in &new_values {
            if old_values.get(key) != Some(&value) {
                out.insert(
                    key,
                    Self::Set {
                        key: key.to_string(),
                        value: value.clone(),
                    },
                );
            }
        }
        out.into_values().collect()
    }

    fn validate_change(_doc: &[Self], delta: &[Self]) -> Result<(), OtError> {
        let mut seen = HashSet::new();
        for op in delta {
            if !seen.insert(op.key()) {
                return Err(OtError::invalid_change(format!(
                    "property `{}` is changed more than once",
                    op.key()
                )));
            }
        }
        Ok(())
    }
}

fn values_by_key(ops: &[PropertyOp]) -> BTreeMap<&str, &Value> {
    let mut out = BTreeMap::new();
    for op in ops {
        match op {
            PropertyOp::Set { key, value } => {
                out.insert(key.as_str(), value);
            }
            PropertyOp::Delete { key } => {
                out.remove(key.as_str());
            }
        }
    }
    out
}

impl Snapshot<PropertyOp> {
    /// Value of property `key`, if set.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.contents().ops().iter().find_map(|op| match op {
            PropertyOp::Set { key: k, value } if k == key => Some(value),
            _ => None,
        })
    }

    /// All properties in document order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.contents().ops().iter().filter_map(|op| match op {
            PropertyOp::Set { key, value } => Some((key.as_str(), value)),
            PropertyOp::Delete { .. } => None,
        })
    }
}
