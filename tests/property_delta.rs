use serde_json::json;

use otstore::ot::{
    Change, Delta, DeltaOp, OtError, Payload,
    property::{PropertyDelta, PropertyOp, PropertySnapshot},
};

fn set(key: &str, value: serde_json::Value) -> PropertyOp {
    PropertyOp::set(key, value).expect("set")
}

fn del(key: &str) -> PropertyOp {
    PropertyOp::delete(key).expect("delete")
}

fn deltas() -> (PropertyDelta, PropertyDelta) {
    let d1 = Delta::new(vec![set("a", json!(1)), set("b", json!(2))]);
    let d2 = Delta::new(vec![set("c", json!(3)), del("b"), del("d")]);
    (d1, d2)
}

#[test]
fn compose_keeps_deletes_unless_a_document_is_wanted() {
    let (d1, d2) = deltas();

    let transform = d1.compose(&d2, false);
    assert_eq!(
        transform.ops(),
        &[set("a", json!(1)), del("b"), set("c", json!(3)), del("d")]
    );
    assert!(!transform.is_document());

    let document = d1.compose(&d2, true);
    assert_eq!(document.ops(), &[set("a", json!(1)), set("c", json!(3))]);
    assert!(document.is_document());
}

#[test]
fn later_set_wins() {
    let a = Delta::new(vec![set("title", json!("draft"))]);
    let b = Delta::new(vec![set("title", json!("final"))]);
    assert_eq!(a.compose(&b, true).ops(), &[set("title", json!("final"))]);
}

#[test]
fn set_after_delete_revives_the_key() {
    let a = Delta::new(vec![del("k")]);
    let b = Delta::new(vec![set("k", json!(null))]);
    assert_eq!(a.compose(&b, true).ops(), &[set("k", json!(null))]);
}

#[test]
fn documents_have_unique_set_keys() {
    assert!(Delta::new(vec![set("a", json!(1)), set("b", json!(1))]).is_document());
    assert!(!Delta::new(vec![set("a", json!(1)), set("a", json!(2))]).is_document());
    assert!(!Delta::new(vec![del("a")]).is_document());
    assert!(PropertyDelta::empty().is_document());
}

#[test]
fn diff_sets_changed_keys_and_deletes_missing_ones() {
    let old = PropertySnapshot::new(
        3,
        Delta::new(vec![set("a", json!(1)), set("b", json!(2)), set("x", json!("same"))]),
    )
    .expect("old");
    let new = PropertySnapshot::new(
        4,
        Delta::new(vec![set("a", json!(10)), set("c", json!(3)), set("x", json!("same"))]),
    )
    .expect("new");

    let delta = old.diff(&new);
    assert_eq!(delta.ops(), &[set("a", json!(10)), del("b"), set("c", json!(3))]);
    assert_eq!(old.contents().compose(&delta, true), *new.contents());

    let change = old.diff_change(&new);
    assert_eq!(change.rev_num, 4);
    assert_eq!(old.compose(&change).expect("compose"), new);
}

#[test]
fn changes_may_not_touch_a_key_twice() {
    let snap = PropertySnapshot::empty();
    let change = Change::new(1, Delta::new(vec![set("a", json!(1)), del("a")]));
    assert!(matches!(snap.compose(&change), Err(OtError::InvalidChange(_))));
}

#[test]
fn snapshot_lookups() {
    let snap = PropertySnapshot::empty()
        .compose(&Change::new(
            1,
            Delta::new(vec![set("title", json!("Notes")), set("pinned", json!(true))]),
        ))
        .expect("compose");
    assert_eq!(snap.get("title"), Some(&json!("Notes")));
    assert_eq!(snap.get("missing"), None);
    let keys: Vec<&str> = snap.properties().map(|(k, _)| k).collect();
    assert_eq!(keys, ["pinned", "title"]);
}

#[test]
fn keys_must_be_identifiers() {
    for bad in ["", "1abc", "has space", "dot.ted", "-lead"] {
        assert!(
            matches!(PropertyOp::set(bad, json!(1)), Err(OtError::BadValue(_))),
            "`{bad}` accepted"
        );
    }
    assert!(PropertyOp::set("snake_case-9", json!(1)).is_ok());
}

#[test]
fn payload_form_is_checked() {
    let ok = Payload {
        name: "set".to_string(),
        args: vec![json!("k"), json!({ "nested": [1, 2] })],
    };
    let op = PropertyOp::from_payload(&ok).expect("parse");
    assert_eq!(op.to_payload(), ok);

    let arity = Payload {
        name: "delete".to_string(),
        args: vec![json!("k"), json!(1)],
    };
    assert!(matches!(PropertyOp::from_payload(&arity), Err(OtError::BadValue(_))));

    let unknown = Payload {
        name: "increment".to_string(),
        args: vec![json!("k")],
    };
    assert!(matches!(PropertyOp::from_payload(&unknown), Err(OtError::BadValue(_))));

    let not_a_key = Payload {
        name: "delete".to_string(),
        args: vec![json!(7)],
    };
    assert!(matches!(PropertyOp::from_payload(&not_a_key), Err(OtError::BadValue(_))));
}

#[test]
fn serde_uses_the_payload_form() {
    let delta = Delta::new(vec![set("a", json!(1)), del("b")]);
    let value = serde_json::to_value(&delta).expect("serialize");
    assert_eq!(value, json!([
            { "name": "set", "args": ["a", 1] },
            { "name": "delete", "args": ["b"] },
        ]));
    let back: PropertyDelta = serde_json::from_value(value).expect("deserialize");
    assert_eq!(back, delta);
}
