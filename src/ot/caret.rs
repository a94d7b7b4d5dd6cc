//! Live caret / presence deltas, keyed by editing session.
//!
//! Composition rules:
//! - `endSession` wins over every earlier op for its session, including field
//!   updates that arrive after it. Only a fresh `beginSession` revives it.
//! - A field update following a `beginSession` folds into the begun caret.
//! - Of two updates to the same session field, the later one survives.

use std::{collections::BTreeMap, str::FromStr};

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{AuthorId, RevNum, SessionId, TimestampMs, is_identifier};

use super::{Change, Delta, DeltaOp, OpName, OtError, Payload, Snapshot};

/// Caret delta.
pub type CaretDelta = Delta<CaretOp>;
/// Caret change.
pub type CaretChange = Change<CaretOp>;
/// Caret snapshot.
pub type CaretSnapshot = Snapshot<CaretOp>;

/// One session's cursor and selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Caret {
    session_id: SessionId,
    author_id: AuthorId,
    #[serde(default)]
    rev_num: RevNum,
    #[serde(default)]
    index: u64,
    #[serde(default)]
    length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_active_ms: Option<TimestampMs>,
}

impl Caret {
    /// A caret at the start of the document, revision 0.
    pub fn new(session_id: impl Into<SessionId>, author_id: impl Into<AuthorId>) -> Result<Self, OtError> {
        let caret = Self {
            session_id: session_id.into(),
            author_id: author_id.into(),
            rev_num: 0,
            index: 0,
            length: 0,
            color: None,
            last_active_ms: None,
        };
        caret.validate()?;
        Ok(caret)
    }

    /// Returns a copy with `update` applied.
    pub fn with(mut self, update: CaretUpdate) -> Self {
        self.apply(update);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn author_id(&self) -> &str {
        &self.author_id
    }

    pub fn rev_num(&self) -> RevNum {
        self.rev_num
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn last_active_ms(&self) -> Option<TimestampMs> {
        self.last_active_ms
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("sessionId".into(), Value::from(self.session_id.as_str()));
        map.insert("authorId".into(), Value::from(self.author_id.as_str()));
        map.insert("revNum".into(), Value::from(self.rev_num));
        map.insert("index".into(), Value::from(self.index));
        map.insert("length".into(), Value::from(self.length));
        if let Some(color) = &self.color {
            map.insert("color".into(), Value::from(color.as_str()));
        }
        if let Some(ts) = self.last_active_ms {
            map.insert("lastActiveMs".into(), Value::from(ts));
        }
        Value::Object(map)
    }

    fn validate(&self) -> Result<(), OtError> {
        check_session_id(&self.session_id)?;
        if self.author_id.is_empty() {
            return Err(OtError::bad_value("caret author id must not be empty"));
        }
        if let Some(color) = &self.color {
            check_color(color)?;
        }
        Ok(())
    }

    fn apply(&mut self, update: CaretUpdate) {
        match update {
            CaretUpdate::RevNum(v) => self.rev_num = v,
            CaretUpdate::Index(v) => self.index = v,
            CaretUpdate::Length(v) => self.length = v,
            CaretUpdate::Color(v) => self.color = Some(v),
            CaretUpdate::LastActive(v) => self.last_active_ms = Some(v),
        }
    }

    /// Field updates turning `self` into `new`, or `None` when `new` cannot
    /// be reached by updates alone.
    fn updates_to(&self, new: &Caret) -> Option<Vec<CaretUpdate>> {
        if self.author_id != new.author_id
            || (self.color.is_some() && new.color.is_none())
            || (self.last_active_ms.is_some() && new.last_active_ms.is_none())
        {
            return None;
        }
        let mut out = Vec::new();
        if self.rev_num != new.rev_num {
            out.push(CaretUpdate::RevNum(new.rev_num));
        }
        if self.index != new.index {
            out.push(CaretUpdate::Index(new.index));
        }
        if self.length != new.length {
            out.push(CaretUpdate::Length(new.length));
        }
        if let Some(color) = new.color.as_ref().filter(|c| self.color.as_ref() != Some(*c)) {
            out.push(CaretUpdate::Color(color.clone()));
        }
        if let Some(ts) = new.last_active_ms.filter(|ts| self.last_active_ms != Some(*ts)) {
            out.push(CaretUpdate::LastActive(ts));
        }
        Some(out)
    }
}

fn check_session_id(session_id: &str) -> Result<(), OtError> {
    if !is_identifier(session_id) {
        return Err(OtError::bad_value(format!("invalid session id `{session_id}`")));
    }
    Ok(())
}

fn check_color(color: &str) -> Result<(), OtError> {
    let hex = color.strip_prefix('#').unwrap_or("");
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(OtError::bad_value(format!("invalid caret color `{color}`")));
    }
    Ok(())
}

/// Settable caret fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CaretField {
    RevNum,
    Index,
    Length,
    Color,
    LastActive,
}

impl CaretField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RevNum => "revNum",
            Self::Index => "index",
            Self::Length => "length",
            Self::Color => "color",
            Self::LastActive => "lastActive",
        }
    }
}

impl FromStr for CaretField {
    type Err = OtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "revNum" => Ok(Self::RevNum),
            "index" => Ok(Self::Index),
            "length" => Ok(Self::Length),
            "color" => Ok(Self::Color),
            "lastActive" => Ok(Self::LastActive),
            other => Err(OtError::bad_value(format!("unknown caret field `{other}`"))),
        }
    }
}

/// A typed value for one [`CaretField`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaretUpdate {
    RevNum(RevNum),
    Index(u64),
    Length(u64),
    Color(String),
    LastActive(TimestampMs),
}

impl CaretUpdate {
    pub fn field(&self) -> CaretField {
        match self {
            Self::RevNum(_) => CaretField::RevNum,
            Self::Index(_) => CaretField::Index,
            Self::Length(_) => CaretField::Length,
            Self::Color(_) => CaretField::Color,
            Self::LastActive(_) => CaretField::LastActive,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::RevNum(v) | Self::Index(v) | Self::Length(v) | Self::LastActive(v) => Value::from(*v),
            Self::Color(v) => Value::from(v.as_str()),
        }
    }

    /// Parses a `(field, value)` pair, checking the value's type.
    pub fn from_field_value(field: &str, value: &Value) -> Result<Self, OtError> {
        let field: CaretField = field.parse()?;
        let as_u64 = || {
            value
                .as_u64()
                .ok_or_else(|| OtError::bad_value(format!("caret field `{}` takes an integer", field.as_str())))
        };
        Ok(match field {
            CaretField::RevNum => Self::RevNum(as_u64()?),
            CaretField::Index => Self::Index(as_u64()?),
            CaretField::Length => Self::Length(as_u64()?),
            CaretField::LastActive => Self::LastActive(as_u64()?),
            CaretField::Color => {
                let color = value
                    .as_str()
                    .ok_or_else(|| OtError::bad_value("caret field `color` takes a string"))?;
                check_color(color)?;
                Self::Color(color.to_string())
            }
        })
    }
}

/// Opcodes of [`CaretOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaretOpName {
    BeginSession,
    EndSession,
    SetField,
    UpdateRevNum,
}

impl OpName for CaretOpName {
    const ALL: &'static [Self] = &[
        Self::BeginSession,
        Self::EndSession,
        Self::SetField,
        Self::UpdateRevNum,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::BeginSession => "beginSession",
            Self::EndSession => "endSession",
            Self::SetField => "setField",
            Self::UpdateRevNum => "updateRevNum",
        }
    }
}

impl FromStr for CaretOpName {
    type Err = OtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_name(s)
    }
}

/// One presence op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Payload", into = "Payload")]
pub enum CaretOp {
    BeginSession(Caret),
    EndSession { session_id: SessionId },
    SetField { session_id: SessionId, update: CaretUpdate },
    UpdateRevNum { session_id: SessionId, rev_num: RevNum },
}

impl CaretOp {
    pub fn begin_session(caret: Caret) -> Self {
        Self::BeginSession(caret)
    }

    pub fn end_session(session_id: impl Into<SessionId>) -> Result<Self, OtError> {
        let session_id = session_id.into();
        check_session_id(&session_id)?;
        Ok(Self::EndSession { session_id })
    }

    pub fn set_field(session_id: impl Into<SessionId>, update: CaretUpdate) -> Result<Self, OtError> {
        let session_id = session_id.into();
        check_session_id(&session_id)?;
        if let CaretUpdate::Color(color) = &update {
            check_color(color)?;
        }
        Ok(Self::SetField { session_id, update })
    }

    pub fn update_rev_num(session_id: impl Into<SessionId>, rev_num: RevNum) -> Result<Self, OtError> {
        let session_id = session_id.into();
        check_session_id(&session_id)?;
        Ok(Self::UpdateRevNum { session_id, rev_num })
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::BeginSession(caret) => &caret.session_id,
            Self::EndSession { session_id }
            | Self::SetField { session_id, .. }
            | Self::UpdateRevNum { session_id, .. } => session_id,
        }
    }

    /// The field update carried by a `setField` / `updateRevNum` op.
    fn update(&self) -> Option<CaretUpdate> {
        match self {
            Self::SetField { update, .. } => Some(update.clone()),
            Self::UpdateRevNum { rev_num, .. } => Some(CaretUpdate::RevNum(*rev_num)),
            Self::BeginSession(_) | Self::EndSession { .. } => None,
        }
    }
}

impl TryFrom<Payload> for CaretOp {
    type Error = OtError;

    fn try_from(payload: Payload) -> Result<Self, Self::Error> {
        Self::from_payload(&payload)
    }
}

impl From<CaretOp> for Payload {
    fn from(op: CaretOp) -> Self {
        op.to_payload()
    }
}

/// Net state of one session while composing.
enum Slot {
    Begun(Caret),
    Ended,
    Updated(BTreeMap<CaretField, CaretOp>),
}

impl DeltaOp for CaretOp {
    type Name = CaretOpName;

    const KIND: &'static str = "caret";

    fn name(&self) -> CaretOpName {
        match self {
            Self::BeginSession(_) => CaretOpName::BeginSession,
            Self::EndSession { .. } => CaretOpName::EndSession,
            Self::SetField { .. } => CaretOpName::SetField,
            Self::UpdateRevNum { .. } => CaretOpName::UpdateRevNum,
        }
    }

    fn from_payload(payload: &Payload) -> Result<Self, OtError> {
        match payload.name.parse::<CaretOpName>()? {
            CaretOpName::BeginSession => {
                payload.expect_arity(1, 1)?;
                let caret: Caret = serde_json::from_value(payload.arg(0)?.clone())
                    .map_err(|e| OtError::bad_value(format!("malformed caret: {e}")))?;
                caret.validate()?;
                Ok(Self::BeginSession(caret))
            }
            CaretOpName::EndSession => {
                payload.expect_arity(1, 1)?;
                Self::end_session(payload.str_arg(0)?)
            }
            CaretOpName::SetField => {
                payload.expect_arity(3, 3)?;
                let update = CaretUpdate::from_field_value(payload.str_arg(1)?, payload.arg(2)?)?;
                Self::set_field(payload.str_arg(0)?, update)
            }
            CaretOpName::UpdateRevNum => {
                payload.expect_arity(2, 2)?;
                Self::update_rev_num(payload.str_arg(0)?, payload.u64_arg(1)?)
            }
        }
    }

    fn to_payload(&self) -> Payload {
        let args = match self {
            Self::BeginSession(caret) => vec![caret.to_json()],
            Self::EndSession { session_id } => vec![Value::from(session_id.as_str())],
            Self::SetField { session_id, update } => vec![
                Value::from(session_id.as_str()),
                Value::from(update.field().as_str()),
                update.to_json(),
            ],
            Self::UpdateRevNum { session_id, rev_num } => {
                vec![Value::from(session_id.as_str()), Value::from(*rev_num)]
            }
        };
        Payload::new(self.name(), args)
    }

    fn is_document(ops: &[Self]) -> bool {
        let mut seen = HashSet::new();
        ops.iter()
            .all(|op| matches!(op, Self::BeginSession(_)) && seen.insert(op.session_id()))
    }

    fn compose(base: &[Self], other: &[Self], want_document: bool) -> Vec<Self> {
        let mut sessions: BTreeMap<&str, Slot> = BTreeMap::new();
        for op in base.iter().chain(other) {
            let sid = op.session_id();
            match op {
                Self::BeginSession(caret) => {
                    sessions.insert(sid, Slot::Begun(caret.clone()));
                }
                Self::EndSession { .. } => {
                    sessions.insert(sid, Slot::Ended);
                }
                Self::SetField { .. } | Self::UpdateRevNum { .. } => {
                    let Some(update) = op.update() else { continue };
                    match sessions.entry(sid).or_insert_with(|| Slot::Updated(BTreeMap::new())) {
                        Slot::Begun(caret) => caret.apply(update),
                        Slot::Ended => {}
                        Slot::Updated(fields) => {
                            fields.insert(update.field(), op.clone());
                        }
                    }
                }
            }
        }

        let mut out = Vec::new();
        for (sid, slot) in sessions {
            match slot {
                Slot::Begun(caret) => out.push(Self::BeginSession(caret)),
                Slot::Ended if !want_document => out.push(Self::EndSession {
                    session_id: sid.to_string(),
                }),
                // A bare update has no caret to apply to in a document.
                Slot::Updated(fields) if !want_document => out.extend(fields.into_values()),
                Slot::Ended | Slot::Updated(_) => {}
            }
        }
        out
    }

    fn diff(old: &[Self], new: &[Self]) -> Vec<Self> {
        let old_carets = carets_by_session(old);
        let new_carets = carets_by_session(new);

        let mut out = Vec::new();
        for &sid in old_carets.keys() {
            if !new_carets.contains_key(sid) {
                out.push((sid, Self::EndSession {
                    session_id: sid.to_string(),
                }));
            }
        }
        for (&sid, &caret) in &new_carets {
            match old_carets.get(sid).map(|old| old.updates_to(caret)) {
                None => out.push((sid, Self::BeginSession(caret.clone()))),
                // Not expressible as field updates: restart the session.
                Some(None) => {
                    out.push((sid, Self::EndSession {
                        session_id: sid.to_string(),
                    }));
                    out.push((sid, Self::BeginSession(caret.clone())));
                }
                Some(Some(updates)) => out.extend(updates.into_iter().map(|update| {
                    (sid, Self::SetField {
                        session_id: sid.to_string(),
                        update,
                    })
                })),
            }
        }
        // Stable, so a restart keeps its end before its begin.
        out.sort_by(|a, b| a.0.cmp(b.0));
        out.into_iter().map(|(_, op)| op).collect()
    }

    fn validate_change(doc: &[Self], delta: &[Self]) -> Result<(), OtError> {
        let mut live: HashSet<&str> = doc.iter().map(CaretOp::session_id).collect();
        for op in delta {
            let sid = op.session_id();
            match op {
                Self::BeginSession(_) => {
                    if !live.insert(sid) {
                        return Err(OtError::invalid_change(format!("session `{sid}` already exists")));
                    }
                }
                Self::EndSession { .. } => {
                    if !live.remove(sid) {
                        return Err(OtError::invalid_change(format!("no session `{sid}` to end")));
                    }
                }
                Self::SetField { .. } | Self::UpdateRevNum { .. } => {
                    if !live.contains(sid) {
                        return Err(OtError::invalid_change(format!("no session `{sid}` to update")));
                    }
                }
            }
        }
        Ok(())
    }
}

fn carets_by_session(ops: &[CaretOp]) -> BTreeMap<&str, &Caret> {
    ops.iter()
        .filter_map(|op| match op {
            CaretOp::BeginSession(caret) => Some((caret.session_id(), caret)),
            _ => None,
        })
        .collect()
}

impl Snapshot<CaretOp> {
    /// Caret for `session_id`, if the session is active.
    pub fn caret(&self, session_id: &str) -> Option<&Caret> {
        self.carets().find(|c| c.session_id() == session_id)
    }

    /// All active carets.
    pub fn carets(&self) -> impl Iterator<Item = &Caret> {
        self.contents().ops().iter().filter_map(|op| match op {
            CaretOp::BeginSession(caret) => Some(caret),
            _ => None,
        })
    }
}
