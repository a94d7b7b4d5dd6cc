use serde_json::json;

use otstore::ot::{
    Change, ChangeEnvelope, Delta, DeltaOp, OtError, Payload, Snapshot,
    body::{Attributes, BodyDelta, BodyOp, BodySnapshot, Embed},
    property::PropertyOp,
};

fn text(s: &str) -> BodyOp {
    BodyOp::insert_text(s, None).expect("insert")
}

fn styled(s: &str, key: &str, value: serde_json::Value) -> BodyOp {
    let attrs: Attributes = [(key.to_string(), value)].into_iter().collect();
    BodyOp::insert_text(s, Some(attrs)).expect("insert")
}

fn retain(n: u64) -> BodyOp {
    BodyOp::retain(n, None).expect("retain")
}

fn retain_with(n: u64, key: &str, value: serde_json::Value) -> BodyOp {
    let attrs: Attributes = [(key.to_string(), value)].into_iter().collect();
    BodyOp::retain(n, Some(attrs)).expect("retain")
}

fn delete(n: u64) -> BodyOp {
    BodyOp::delete(n).expect("delete")
}

fn doc(s: &str) -> BodyDelta {
    Delta::new(vec![text(s)])
}

#[test]
fn appending_text_merges_into_one_insert() {
    let edit = Delta::new(vec![retain(5), text(" world")]);
    let out = doc("Hello").compose(&edit, true);
    assert_eq!(out.ops(), &[text("Hello world")]);
}

#[test]
fn deleting_a_middle_range_keeps_the_ends() {
    let edit = Delta::new(vec![retain(1), delete(3)]);
    let out = doc("Hello").compose(&edit, true);
    assert_eq!(out.ops(), &[text("Ho")]);
}

#[test]
fn formatting_retain_splits_the_insert() {
    let edit = Delta::new(vec![retain_with(1, "bold", json!(true))]);
    let out = doc("ab").compose(&edit, true);
    assert_eq!(out.ops(), &[styled("a", "bold", json!(true)), text("b")]);
}

#[test]
fn null_attribute_removes_formatting_from_documents() {
    let base = Delta::new(vec![styled("a", "bold", json!(true))]);
    let edit = Delta::new(vec![retain_with(1, "bold", serde_json::Value::Null)]);
    let out = base.compose(&edit, true);
    assert_eq!(out.ops(), &[text("a")]);
}

#[test]
fn composing_transforms_keeps_null_attributes_on_retains() {
    let a = Delta::new(vec![retain_with(2, "bold", json!(true))]);
    let b = Delta::new(vec![retain_with(2, "bold", serde_json::Value::Null)]);
    let out = a.compose(&b, false);
    assert_eq!(out.ops(), &[retain_with(2, "bold", serde_json::Value::Null)]);
}

#[test]
fn insert_then_delete_cancels() {
    let a = Delta::new(vec![retain(2), text("xyz")]);
    let b = Delta::new(vec![retain(2), delete(3)]);
    let out = a.compose(&b, false);
    assert!(out.is_empty(), "got {:?}", out.ops());
}

#[test]
fn inserts_are_placed_before_deletes() {
    let a = Delta::new(vec![delete(2)]);
    let b = Delta::new(vec![text("x")]);
    let out = a.compose(&b, false);
    assert_eq!(out.ops(), &[text("x"), delete(2)]);
}

#[test]
fn want_document_drops_retains_and_deletes() {
    let a = Delta::new(vec![retain(3), text("a"), delete(1)]);
    let b = Delta::new(vec![retain(1), delete(1), text("b")]);
    let out = a.compose(&b, true);
    assert!(out.ops().iter().all(BodyOp::is_insert), "got {:?}", out.ops());
    assert!(out.is_document());
}

#[test]
fn empty_compose_is_empty_both_ways() {
    let empty = BodyDelta::empty();
    assert!(empty.compose(&empty, false).is_empty());
    assert!(empty.compose(&empty, true).is_empty());
}

#[test]
fn lengths_count_scalar_values_and_embeds_as_one() {
    let emoji = text("h\u{e9}llo\u{1F44D}");
    assert_eq!(emoji.len(), 6);

    let image = BodyOp::insert_embed(Embed::new("image", json!("cat.png")).expect("embed"), None).expect("insert");
    assert_eq!(image.len(), 1);

    let snap = Snapshot::new(3, Delta::new(vec![emoji, image])).expect("snapshot");
    assert_eq!(snap.length(), 7);
    assert_eq!(snap.text(), "h\u{e9}llo\u{1F44D}");
}

#[test]
fn multibyte_text_splits_on_character_boundaries() {
    let edit = Delta::new(vec![retain(2), delete(1)]);
    let out = doc("\u{e9}\u{1F44D}\u{e8}x").compose(&edit, true);
    assert_eq!(out.ops(), &[text("\u{e9}\u{1F44D}x")]);
}

#[test]
fn diff_replaces_the_changed_middle() {
    let old = BodySnapshot::new(1, doc("Hello")).expect("old");
    let new = BodySnapshot::new(2, doc("Help!")).expect("new");
    let delta = old.diff(&new);
    assert_eq!(delta.ops(), &[retain(3), text("p!"), delete(2)]);
    assert_eq!(old.contents().compose(&delta, true), *new.contents());
}

#[test]
fn diff_of_formatting_only_uses_retains() {
    let old = BodySnapshot::new(1, doc("abc")).expect("old");
    let new = BodySnapshot::new(
        2,
        Delta::new(vec![text("a"), styled("b", "italic", json!(true)), text("c")]),
    )
    .expect("new");
    let delta = old.diff(&new);
    assert_eq!(delta.ops(), &[retain(1), retain_with(1, "italic", json!(true))]);
    assert_eq!(old.contents().compose(&delta, true), *new.contents());
}

#[test]
fn diff_of_identical_documents_is_empty() {
    let a = BodySnapshot::new(1, doc("same")).expect("a");
    let b = BodySnapshot::new(9, doc("same")).expect("b");
    assert!(a.diff(&b).is_empty());
}

#[test]
fn quill_form_omits_absent_attributes() {
    let delta = Delta::new(vec![retain(2), styled("x", "bold", json!(true)), delete(1)]);
    assert_eq!(
        delta.to_quill_form(),
        json!([
            { "retain": 2 },
            { "insert": "x", "attributes": { "bold": true } },
            { "delete": 1 },
        ])
    );
    let back = BodyDelta::from_quill_form(&delta.to_quill_form()).expect("parse");
    assert_eq!(back, delta);
}

#[test]
fn quill_form_rejects_malformed_ops() {
    for bad in [
        json!([{ "insert": "a", "delete": 1 }]),
        json!([{ "retain": 0 }]),
        json!([{ "delete": 1, "attributes": { "bold": true } }]),
        json!([{ "insert": "" }]),
        json!([{ "insert": "a", "color": "red" }]),
        json!([{}]),
        json!({ "insert": "a" }),
    ] {
        let err = BodyDelta::from_quill_form(&bad).expect_err("should reject");
        assert!(matches!(err, OtError::BadValue(_)), "{bad} gave {err:?}");
    }
}

#[test]
fn payload_names_are_checked_before_arguments() {
    let unknown = Payload {
        name: "replace".to_string(),
        args: vec![json!(1)],
    };
    assert!(matches!(BodyOp::from_payload(&unknown), Err(OtError::BadValue(_))));

    let arity = Payload {
        name: "delete".to_string(),
        args: vec![json!(1), json!(2)],
    };
    assert!(matches!(BodyOp::from_payload(&arity), Err(OtError::BadValue(_))));

    let op = styled("hi", "bold", json!(true));
    assert_eq!(BodyOp::from_payload(&op.to_payload()).expect("round trip"), op);
}

#[test]
fn snapshots_must_hold_documents() {
    let err = BodySnapshot::new(1, Delta::new(vec![retain(1)])).expect_err("not a document");
    assert!(matches!(err, OtError::BadValue(_)));
}

#[test]
fn changes_past_the_end_of_the_document_are_invalid() {
    let snap = BodySnapshot::new(1, doc("abc")).expect("snapshot");
    let change = Change::new(2, Delta::new(vec![retain(2), delete(2)]));
    assert!(matches!(snap.compose(&change), Err(OtError::InvalidChange(_))));

    let ok = Change::new(2, Delta::new(vec![retain(3), text("d")]));
    let next = snap.compose(&ok).expect("compose");
    assert_eq!(next.rev_num(), 2);
    assert_eq!(next.text(), "abcd");
}

#[test]
fn change_envelope_rejects_other_kinds() {
    let change = Change::new(4, doc("x")).with_author("ana");
    let bytes = ChangeEnvelope::<Change<BodyOp>>::encode(&change).expect("encode");

    let back = ChangeEnvelope::<Change<BodyOp>>::decode(&bytes).expect("decode");
    assert_eq!(back, change);

    let err = ChangeEnvelope::<Change<PropertyOp>>::decode(&bytes).expect_err("kind mismatch");
    assert!(matches!(err, OtError::BadUse(_)));
}
