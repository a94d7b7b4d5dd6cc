//! Rich-text body deltas.
//!
//! Ops follow the Quill delta model: `insert` (text or a single embed),
//! `retain` and `delete`, each insert/retain optionally carrying formatting
//! attributes. Lengths count Unicode scalar values; an embed has length 1.

use std::{cmp, collections::BTreeMap, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Change, Delta, DeltaOp, OpName, OtError, Payload, Snapshot};

/// Formatting attributes. A null value on a retain removes the attribute.
pub type Attributes = BTreeMap<String, Value>;

/// Body delta.
pub type BodyDelta = Delta<BodyOp>;
/// Body change.
pub type BodyChange = Change<BodyOp>;
/// Body snapshot.
pub type BodySnapshot = Snapshot<BodyOp>;

/// Opcodes of [`BodyOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyOpName {
    Insert,
    Retain,
    Delete,
}

impl OpName for BodyOpName {
    const ALL: &'static [Self] = &[Self::Insert, Self::Retain, Self::Delete];

    fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Retain => "retain",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for BodyOpName {
    type Err = OtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_name(s)
    }
}

/// Non-text content, written on the wire as `{ kind: value }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    kind: String,
    value: Value,
}

impl Embed {
    pub fn new(kind: impl Into<String>, value: Value) -> Result<Self, OtError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(OtError::bad_value("embed kind must not be empty"));
        }
        Ok(Self { kind, value })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.kind.clone(), self.value.clone());
        Value::Object(map)
    }

    fn from_json(value: &Value) -> Result<Self, OtError> {
        match value {
            Value::Object(map) if map.len() == 1 => {
                let (kind, value) = map.iter().next().ok_or_else(|| OtError::bad_value("empty embed"))?;
                Self::new(kind.clone(), value.clone())
            }
            _ => Err(OtError::bad_value("embed must be a single-key object")),
        }
    }
}

/// Inserted content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyContent {
    Text(String),
    Embed(Embed),
}

impl BodyContent {
    fn len(&self) -> u64 {
        match self {
            Self::Text(text) => text.chars().count() as u64,
            Self::Embed(_) => 1,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Embed(embed) => embed.to_json(),
        }
    }

    fn from_json(value: &Value) -> Result<Self, OtError> {
        match value {
            Value::String(text) if !text.is_empty() => Ok(Self::Text(text.clone())),
            Value::String(_) => Err(OtError::bad_value("inserted text must not be empty")),
            other => Embed::from_json(other).map(Self::Embed),
        }
    }
}

/// One rich-text op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuillOp", into = "QuillOp")]
pub enum BodyOp {
    Insert {
        content: BodyContent,
        attributes: Option<Attributes>,
    },
    Retain {
        count: u64,
        attributes: Option<Attributes>,
    },
    Delete {
        count: u64,
    },
}

impl BodyOp {
    /// Inserts non-empty `text`.
    pub fn insert_text(text: impl Into<String>, attributes: Option<Attributes>) -> Result<Self, OtError> {
        let text = text.into();
        if text.is_empty() {
            return Err(OtError::bad_value("inserted text must not be empty"));
        }
        Ok(Self::Insert {
            content: BodyContent::Text(text),
            attributes: check_attributes(attributes)?,
        })
    }

    pub fn insert_embed(embed: Embed, attributes: Option<Attributes>) -> Result<Self, OtError> {
        Ok(Self::Insert {
            content: BodyContent::Embed(embed),
            attributes: check_attributes(attributes)?,
        })
    }

    pub fn retain(count: u64, attributes: Option<Attributes>) -> Result<Self, OtError> {
        Ok(Self::Retain {
            count: check_count(count)?,
            attributes: check_attributes(attributes)?,
        })
    }

    pub fn delete(count: u64) -> Result<Self, OtError> {
        Ok(Self::Delete {
            count: check_count(count)?,
        })
    }

    /// Number of document positions the op covers.
    pub fn len(&self) -> u64 {
        match self {
            Self::Insert { content, .. } => content.len(),
            Self::Retain { count, .. } | Self::Delete { count } => *count,
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Self::Insert { attributes, .. } | Self::Retain { attributes, .. } => attributes.as_ref(),
            Self::Delete { .. } => None,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert { .. })
    }

    /// Quill JSON object for this op.
    pub fn to_quill_json(&self) -> Value {
        let mut map = Map::new();
        match self {
            Self::Insert { content, .. } => map.insert("insert".into(), content.to_json()),
            Self::Retain { count, .. } => map.insert("retain".into(), Value::from(*count)),
            Self::Delete { count } => map.insert("delete".into(), Value::from(*count)),
        };
        if let Some(attrs) = self.attributes() {
            map.insert("attributes".into(), attributes_to_json(attrs));
        }
        Value::Object(map)
    }
}

fn check_count(count: u64) -> Result<u64, OtError> {
    if count == 0 {
        return Err(OtError::bad_value("op count must be positive"));
    }
    Ok(count)
}

fn check_attributes(attributes: Option<Attributes>) -> Result<Option<Attributes>, OtError> {
    match attributes {
        Some(attrs) if attrs.keys().any(String::is_empty) => {
            Err(OtError::bad_value("attribute names must not be empty"))
        }
        Some(attrs) if attrs.is_empty() => Ok(None),
        other => Ok(other),
    }
}

fn attributes_from_json(value: &Value) -> Result<Attributes, OtError> {
    match value {
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        _ => Err(OtError::bad_value("attributes must be an object")),
    }
}

fn attributes_to_json(attrs: &Attributes) -> Value {
    Value::Object(attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Quill wire form: exactly one of `insert` / `retain` / `delete`, and
/// `attributes` only when there are some.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuillOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    insert: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retain: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<Attributes>,
}

impl TryFrom<QuillOp> for BodyOp {
    type Error = OtError;

    fn try_from(q: QuillOp) -> Result<Self, Self::Error> {
        match (q.insert, q.retain, q.delete) {
            (Some(insert), None, None) => Ok(Self::Insert {
                content: BodyContent::from_json(&insert)?,
                attributes: check_attributes(q.attributes)?,
            }),
            (None, Some(count), None) => Self::retain(count, q.attributes),
            (None, None, Some(count)) if q.attributes.is_none() => Self::delete(count),
            (None, None, Some(_)) => Err(OtError::bad_value("delete ops take no attributes")),
            _ => Err(OtError::bad_value(
                "quill op needs exactly one of `insert`, `retain` or `delete`",
            )),
        }
    }
}

impl From<BodyOp> for QuillOp {
    fn from(op: BodyOp) -> Self {
        let mut q = QuillOp {
            insert: None,
            retain: None,
            delete: None,
            attributes: None,
        };
        match op {
            BodyOp::Insert { content, attributes } => {
                q.insert = Some(content.to_json());
                q.attributes = attributes;
            }
            BodyOp::Retain { count, attributes } => {
                q.retain = Some(count);
                q.attributes = attributes;
            }
            BodyOp::Delete { count } => q.delete = Some(count),
        }
        q
    }
}

impl DeltaOp for BodyOp {
    type Name = BodyOpName;

    const KIND: &'static str = "body";

    fn name(&self) -> BodyOpName {
        match self {
            Self::Insert { .. } => BodyOpName::Insert,
            Self::Retain { .. } => BodyOpName::Retain,
            Self::Delete { .. } => BodyOpName::Delete,
        }
    }

    fn from_payload(payload: &Payload) -> Result<Self, OtError> {
        let attrs = |idx| payload.opt_arg(idx).map(attributes_from_json).transpose();
        match payload.name.parse::<BodyOpName>()? {
            BodyOpName::Insert => {
                payload.expect_arity(1, 2)?;
                Ok(Self::Insert {
                    content: BodyContent::from_json(payload.arg(0)?)?,
                    attributes: check_attributes(attrs(1)?)?,
                })
            }
            BodyOpName::Retain => {
                payload.expect_arity(1, 2)?;
                Self::retain(payload.u64_arg(0)?, attrs(1)?)
            }
            BodyOpName::Delete => {
                payload.expect_arity(1, 1)?;
                Self::delete(payload.u64_arg(0)?)
            }
        }
    }

    fn to_payload(&self) -> Payload {
        let mut args = match self {
            Self::Insert { content, .. } => vec![content.to_json()],
            Self::Retain { count, .. } | Self::Delete { count } => vec![Value::from(*count)],
        };
        if let Some(attrs) = self.attributes() {
            args.push(attributes_to_json(attrs));
        }
        Payload::new(self.name(), args)
    }

    fn is_document(ops: &[Self]) -> bool {
        ops.iter().all(BodyOp::is_insert)
    }

    fn compose(base: &[Self], other: &[Self], want_document: bool) -> Vec<Self> {
        let mut a = Cursor::new(base);
        let mut b = Cursor::new(other);
        let mut out = OpBuilder::default();

        while a.has_next() || b.has_next() {
            if b.peek_is_insert() {
                out.push(b.next(u64::MAX));
                continue;
            }
            if a.peek_is_delete() {
                out.push(a.next(u64::MAX));
                continue;
            }

            let len = cmp::min(a.peek_len(), b.peek_len());
            match (a.next(len), b.next(len)) {
                (Self::Retain { attributes: aa, .. }, Self::Retain { count, attributes: ba }) => {
                    out.push(Self::Retain {
                        count,
                        attributes: compose_attributes(aa.as_ref(), ba.as_ref(), true),
                    });
                }
                (Self::Insert { content, attributes: aa }, Self::Retain { attributes: ba, .. }) => {
                    out.push(Self::Insert {
                        content,
                        attributes: compose_attributes(aa.as_ref(), ba.as_ref(), false),
                    });
                }
                (Self::Retain { .. }, Self::Delete { count }) => out.push(Self::Delete { count }),
                // Deleting freshly inserted content cancels both.
                (Self::Insert { .. }, Self::Delete { .. }) => {}
                (Self::Delete { .. }, _) | (_, Self::Insert { .. }) => {
                    unreachable!("body cursor yielded an op kind it peeked past")
                }
            }
        }

        let mut ops = out.finish();
        if want_document {
            let mut doc = OpBuilder::default();
            for op in ops.into_iter().filter(BodyOp::is_insert) {
                doc.push(op);
            }
            ops = doc.finish();
        }
        ops
    }

    fn diff(old: &[Self], new: &[Self]) -> Vec<Self> {
        let old_units = flatten(old);
        let new_units = flatten(new);

        let max_common = cmp::min(old_units.len(), new_units.len());
        let prefix = old_units
            .iter()
            .zip(&new_units)
            .take_while(|(a, b)| a == b)
            .count();
        let suffix = old_units
            .iter()
            .rev()
            .zip(new_units.iter().rev())
            .take(max_common - prefix)
            .take_while(|(a, b)| a == b)
            .count();

        let old_mid = &old_units[prefix..old_units.len() - suffix];
        let new_mid = &new_units[prefix..new_units.len() - suffix];

        let mut out = OpBuilder::default();
        if prefix > 0 {
            out.push(Self::Retain {
                count: prefix as u64,
                attributes: None,
            });
        }

        let same_content = old_mid.len() == new_mid.len()
            && old_mid.iter().zip(new_mid).all(|(a, b)| a.unit == b.unit);
        if same_content {
            for (a, b) in old_mid.iter().zip(new_mid) {
                out.push(Self::Retain {
                    count: 1,
                    attributes: attribute_diff(a.attributes, b.attributes),
                });
            }
        } else {
            if !old_mid.is_empty() {
                out.push(Self::Delete {
                    count: old_mid.len() as u64,
                });
            }
            for unit in new_mid {
                out.push(unit.to_insert());
            }
        }
        out.finish()
    }

    fn validate_change(doc: &[Self], delta: &[Self]) -> Result<(), OtError> {
        let doc_len: u64 = doc.iter().map(BodyOp::len).sum();
        let consumed: u64 = delta
            .iter()
            .filter(|op| !op.is_insert())
            .map(BodyOp::len)
            .fold(0, u64::saturating_add);
        if consumed > doc_len {
            return Err(OtError::invalid_change(format!(
                "body change spans {consumed} positions but the document has {doc_len}"
            )));
        }
        Ok(())
    }
}

/// Quill-style attribute merge: `b` overrides `a`; nulls are dropped unless
/// the result is itself a retain.
fn compose_attributes(a: Option<&Attributes>, b: Option<&Attributes>, keep_null: bool) -> Option<Attributes> {
    let mut out = a.cloned().unwrap_or_default();
    if let Some(b) = b {
        for (k, v) in b {
            out.insert(k.clone(), v.clone());
        }
    }
    if !keep_null {
        out.retain(|_, v| !v.is_null());
    }
    (!out.is_empty()).then_some(out)
}

/// Attributes that turn `old` into `new` when applied by a retain.
fn attribute_diff(old: Option<&Attributes>, new: Option<&Attributes>) -> Option<Attributes> {
    let empty = Attributes::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);
    let mut out = Attributes::new();
    for (k, v) in new {
        if old.get(k) != Some(v) {
            out.insert(k.clone(), v.clone());
        }
    }
    for k in old.keys() {
        if !new.contains_key(k) {
            out.insert(k.clone(), Value::Null);
        }
    }
    (!out.is_empty()).then_some(out)
}

#[derive(Debug, PartialEq)]
enum Unit<'a> {
    Char(char),
    Embed(&'a Embed),
}

#[derive(Debug, PartialEq)]
struct DocUnit<'a> {
    unit: Unit<'a>,
    attributes: Option<&'a Attributes>,
}

impl DocUnit<'_> {
    fn to_insert(&self) -> BodyOp {
        let content = match self.unit {
            Unit::Char(c) => BodyContent::Text(c.to_string()),
            Unit::Embed(embed) => BodyContent::Embed(embed.clone()),
        };
        BodyOp::Insert {
            content,
            attributes: self.attributes.cloned(),
        }
    }
}

fn flatten(doc: &[BodyOp]) -> Vec<DocUnit<'_>> {
    let mut out = Vec::new();
    for op in doc {
        let BodyOp::Insert { content, attributes } = op else {
            continue;
        };
        let attributes = attributes.as_ref();
        match content {
            BodyContent::Text(text) => out.extend(text.chars().map(|c| DocUnit {
                unit: Unit::Char(c),
                attributes,
            })),
            BodyContent::Embed(embed) => out.push(DocUnit {
                unit: Unit::Embed(embed),
                attributes,
            }),
        }
    }
    out
}

/// Walks an op list, splitting ops at arbitrary lengths. Past the end it
/// yields an unbounded plain retain.
struct Cursor<'a> {
    ops: &'a [BodyOp],
    index: usize,
    offset: u64,
}

impl<'a> Cursor<'a> {
    fn new(ops: &'a [BodyOp]) -> Self {
        Self { ops, index: 0, offset: 0 }
    }

    fn has_next(&self) -> bool {
        self.index < self.ops.len()
    }

    fn peek(&self) -> Option<&'a BodyOp> {
        self.ops.get(self.index)
    }

    fn peek_len(&self) -> u64 {
        self.peek().map_or(u64::MAX, |op| op.len() - self.offset)
    }

    fn peek_is_insert(&self) -> bool {
        matches!(self.peek(), Some(BodyOp::Insert { .. }))
    }

    fn peek_is_delete(&self) -> bool {
        matches!(self.peek(), Some(BodyOp::Delete { .. }))
    }

    fn next(&mut self, len: u64) -> BodyOp {
        let Some(op) = self.peek() else {
            return BodyOp::Retain {
                count: len,
                attributes: None,
            };
        };
        let offset = self.offset;
        let remaining = op.len() - offset;
        let take = if len >= remaining {
            self.index += 1;
            self.offset = 0;
            remaining
        } else {
            self.offset += len;
            len
        };

        match op {
            BodyOp::Delete { .. } => BodyOp::Delete { count: take },
            BodyOp::Retain { attributes, .. } => BodyOp::Retain {
                count: take,
                attributes: attributes.clone(),
            },
            BodyOp::Insert {
                content: BodyContent::Text(text),
                attributes,
            } => BodyOp::Insert {
                content: BodyContent::Text(text.chars().skip(offset as usize).take(take as usize).collect()),
                attributes: attributes.clone(),
            },
            BodyOp::Insert { .. } => op.clone(),
        }
    }
}

/// Appends ops in canonical form: adjacent compatible ops merge, and an
/// insert never directly follows a delete.
#[derive(Default)]
struct OpBuilder {
    ops: Vec<BodyOp>,
}

impl OpBuilder {
    fn push(&mut self, op: BodyOp) {
        if op.len() == 0 {
            return;
        }
        let n = self.ops.len();
        if n > 0 {
            if let BodyOp::Delete { count: last } = &mut self.ops[n - 1] {
                match op {
                    BodyOp::Delete { count } => {
                        *last = last.saturating_add(count);
                        return;
                    }
                    BodyOp::Insert { .. } => {
                        if n >= 2 && merge_into(&mut self.ops[n - 2], &op) {
                            return;
                        }
                        self.ops.insert(n - 1, op);
                        return;
                    }
                    BodyOp::Retain { .. } => {}
                }
            } else if merge_into(&mut self.ops[n - 1], &op) {
                return;
            }
        }
        self.ops.push(op);
    }

    /// Drops a trailing plain retain, which has no effect.
    fn finish(mut self) -> Vec<BodyOp> {
        if let Some(BodyOp::Retain { attributes: None, .. }) = self.ops.last() {
            self.ops.pop();
        }
        self.ops
    }
}

fn merge_into(last: &mut BodyOp, op: &BodyOp) -> bool {
    match (last, op) {
        (
            BodyOp::Insert {
                content: BodyContent::Text(a),
                attributes: aa,
            },
            BodyOp::Insert {
                content: BodyContent::Text(b),
                attributes: ba,
            },
        ) if *aa == *ba => {
            a.push_str(b);
            true
        }
        (BodyOp::Retain { count: a, attributes: aa }, BodyOp::Retain { count: b, attributes: ba }) if *aa == *ba => {
            *a = a.saturating_add(*b);
            true
        }
        _ => false,
    }
}

impl Delta<BodyOp> {
    /// Canonical external JSON: an array of Quill ops.
    pub fn to_quill_form(&self) -> Value {
        Value::Array(self.ops().iter().map(BodyOp::to_quill_json).collect())
    }

    /// Parses and validates an array of Quill ops.
    pub fn from_quill_form(value: &Value) -> Result<Self, OtError> {
        let Value::Array(items) = value else {
            return Err(OtError::bad_value("quill delta must be an array"));
        };
        let ops = items
            .iter()
            .map(|item| {
                let q: QuillOp = serde_json::from_value(item.clone())
                    .map_err(|e| OtError::bad_value(format!("malformed quill op: {e}")))?;
                BodyOp::try_from(q)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(ops))
    }
}

impl Snapshot<BodyOp> {
    /// Document length in positions.
    pub fn length(&self) -> u64 {
        self.contents().ops().iter().map(BodyOp::len).sum()
    }

    /// Plain text of the document; embeds are skipped.
    pub fn text(&self) -> String {
        self.contents()
            .ops()
            .iter()
            .filter_map(|op| match op {
                BodyOp::Insert {
                    content: BodyContent::Text(text),
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}
