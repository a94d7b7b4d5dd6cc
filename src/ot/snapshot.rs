use serde::{Deserialize, Serialize};

use crate::types::RevNum;

use super::{Change, Delta, DeltaOp, OtError};

/// Document contents at a specific revision.
///
/// `contents` is always document-shaped (see [`Delta::is_document`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    bound(serialize = "O: DeltaOp", deserialize = "O: DeltaOp"),
    try_from = "RawSnapshot<O>"
)]
pub struct Snapshot<O> {
    rev_num: RevNum,
    contents: Delta<O>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "O: DeltaOp"))]
struct RawSnapshot<O> {
    rev_num: RevNum,
    contents: Delta<O>,
}

impl<O: DeltaOp> TryFrom<RawSnapshot<O>> for Snapshot<O> {
    type Error = OtError;

    fn try_from(raw: RawSnapshot<O>) -> Result<Self, Self::Error> {
        Self::new(raw.rev_num, raw.contents)
    }
}

impl<O: DeltaOp> Snapshot<O> {
    /// Fails with `BadValue` unless `contents` is a document.
    pub fn new(rev_num: RevNum, contents: Delta<O>) -> Result<Self, OtError> {
        if !contents.is_document() {
            return Err(OtError::bad_value(format!(
                "{} snapshot contents must be a document",
                O::KIND
            )));
        }
        Ok(Self { rev_num, contents })
    }

    /// Empty document at revision 0.
    pub fn empty() -> Self {
        Self {
            rev_num: 0,
            contents: Delta::empty(),
        }
    }

    pub fn rev_num(&self) -> RevNum {
        self.rev_num
    }

    pub fn contents(&self) -> &Delta<O> {
        &self.contents
    }

    pub fn with_rev_num(&self, rev_num: RevNum) -> Self {
        Self {
            rev_num,
            contents: self.contents.clone(),
        }
    }

    /// Rejects a change that does not structurally fit this snapshot.
    pub fn validate_change(&self, change: &Change<O>) -> Result<(), OtError> {
        O::validate_change(self.contents.ops(), change.delta.ops())
    }

    /// Applies `change`, producing the snapshot at `change.rev_num`.
    pub fn compose(&self, change: &Change<O>) -> Result<Self, OtError> {
        self.validate_change(change)?;
        Ok(Self {
            rev_num: change.rev_num,
            contents: self.contents.compose(&change.delta, true),
        })
    }

    /// Applies each change in order.
    pub fn compose_all<'a, I>(&self, changes: I) -> Result<Self, OtError>
    where
        I: IntoIterator<Item = &'a Change<O>>,
    {
        changes
            .into_iter()
            .try_fold(self.clone(), |snap, change| snap.compose(change))
    }

    /// Delta that, composed onto `self.contents`, yields `newer.contents`.
    pub fn diff(&self, newer: &Snapshot<O>) -> Delta<O> {
        Delta::new(O::diff(self.contents.ops(), newer.contents.ops()))
    }

    /// [`Self::diff`] wrapped as a change producing `newer.rev_num`.
    pub fn diff_change(&self, newer: &Snapshot<O>) -> Change<O> {
        Change::new(newer.rev_num, self.diff(newer))
    }
}
