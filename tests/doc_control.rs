use std::time::Duration;

use serde_json::json;

use otstore::{
    doc::{DocConfig, DocControl, DocError},
    file::{FileSnapshot, PredicateErrorName},
    ot::{
        Change, Delta, OtError,
        body::BodyOp,
        property::{PropertyDelta, PropertyOp},
    },
    runtime::{FileStoreHandle, StoreConfig, spawn_file_store},
};

fn store() -> FileStoreHandle {
    spawn_file_store(FileSnapshot::empty(), None, StoreConfig::default())
}

fn set(key: &str, value: serde_json::Value) -> PropertyDelta {
    Delta::new(vec![PropertyOp::set(key, value).expect("set")])
}

async fn created(store: FileStoreHandle) -> DocControl<PropertyOp> {
    let doc = DocControl::new(store, DocConfig::default()).expect("doc");
    doc.create().await.expect("create");
    doc
}

#[tokio::test]
async fn create_once() {
    let doc = DocControl::<PropertyOp>::new(store(), DocConfig::default()).expect("doc");
    assert!(!doc.exists());
    assert_eq!(doc.rev_num(), Err(DocError::DocumentMissing));

    doc.create().await.expect("create");
    assert!(doc.exists());
    assert_eq!(doc.rev_num(), Ok(0));
    assert_eq!(doc.store().rev_num(), 1);

    assert_eq!(doc.create().await, Err(DocError::AlreadyExists));

    let first = doc.get_change(0).await.expect("change 0");
    assert!(first.delta.is_empty());
    assert!(first.timestamp_ms.is_some());
}

#[tokio::test]
async fn appends_advance_the_document() {
    let doc = created(store()).await;

    let rev = doc
        .append_change(Change::new(1, set("title", json!("Notes"))).with_author("ana"))
        .await
        .expect("append 1");
    assert_eq!(rev, 1);
    doc.append_change(Change::new(2, set("pinned", json!(true))))
        .await
        .expect("append 2");
    assert_eq!(doc.rev_num(), Ok(2));
    assert_eq!(doc.store().rev_num(), 3);

    let latest = doc.get_snapshot(None).await.expect("latest");
    assert_eq!(latest.rev_num(), 2);
    assert_eq!(latest.get("title"), Some(&json!("Notes")));
    assert_eq!(latest.get("pinned"), Some(&json!(true)));

    let first = doc.get_snapshot(Some(1)).await.expect("rev 1");
    assert_eq!(first.rev_num(), 1);
    assert_eq!(first.get("pinned"), None);

    let change = doc.get_change(1).await.expect("change 1");
    assert_eq!(change.author_id.as_deref(), Some("ana"));
    assert_eq!(change.delta, set("title", json!("Notes")));
}

#[tokio::test]
async fn stale_appends_fail_with_a_rev_num_mismatch() {
    let doc = created(store()).await;
    doc.append_change(Change::new(1, set("a", json!(1)))).await.expect("append");

    let err = doc
        .append_change(Change::new(1, set("a", json!(2))))
        .await
        .expect_err("stale");
    assert!(err.is_retryable());
    let failure = match err {
        DocError::Predicate(failure) => failure,
        other => panic!("expected a predicate failure, got {other:?}"),
    };
    assert_eq!(failure.error_name, PredicateErrorName::RevNumMismatch);
    assert_eq!(failure.to_payload().args, vec![json!(1)]);

    let ahead = doc
        .append_change(Change::new(7, set("a", json!(3))))
        .await
        .expect_err("ahead");
    assert!(matches!(ahead, DocError::Predicate(_)));
    assert_eq!(doc.rev_num(), Ok(1));
}

#[tokio::test]
async fn appends_drop_the_superseded_snapshot_blob() {
    let doc = created(store()).await;
    for rev in 1..=20 {
        doc.append_change(Change::new(rev, set("n", json!(rev))))
            .await
            .expect("append");
    }
    let storage = doc.store().snapshot();
    // 21 changes plus the snapshot, one blob each.
    assert_eq!(storage.path_count(), 22);
    assert_eq!(storage.blob_count(), storage.path_count());
    assert_eq!(doc.get_snapshot(None).await.expect("latest").get("n"), Some(&json!(20)));
}

#[tokio::test]
async fn second_writer_rebases_and_retries() {
    let store = store();
    let alice = created(store.clone()).await;
    let bob = DocControl::<PropertyOp>::new(store, DocConfig::default()).expect("bob");

    let base = bob.get_snapshot(None).await.expect("bob reads rev 0");
    alice.append_change(Change::new(1, set("x", json!("alice")))).await.expect("alice");

    let mine = Change::new(base.rev_num() + 1, set("y", json!("bob")));
    let err = bob.append_change(mine.clone()).await.expect_err("bob is behind");
    assert!(err.is_retryable());

    let latest = bob.get_snapshot(None).await.expect("bob re-reads");
    assert_eq!(latest.rev_num(), 1);
    let retried = Change::new(latest.rev_num() + 1, mine.delta);
    assert_eq!(bob.append_change(retried).await, Ok(2));

    let merged = alice.get_snapshot(None).await.expect("alice reads");
    assert_eq!(merged.get("x"), Some(&json!("alice")));
    assert_eq!(merged.get("y"), Some(&json!("bob")));
}

#[tokio::test]
async fn missing_changes_and_future_snapshots() {
    let doc = created(store()).await;
    assert_eq!(doc.get_change(4).await.expect_err("missing"), DocError::NoSuchChange(4));
    assert_eq!(doc.get_snapshot(Some(3)).await.expect_err("future"), DocError::NoSuchChange(3));

    let empty = DocControl::<PropertyOp>::new(store(), DocConfig::default()).expect("doc");
    assert_eq!(empty.get_change(0).await.expect_err("no doc"), DocError::DocumentMissing);
    assert_eq!(empty.get_snapshot(None).await.expect_err("no doc"), DocError::DocumentMissing);
}

#[tokio::test]
async fn invalid_changes_are_rejected_before_commit() {
    let store = store();
    let doc = DocControl::<BodyOp>::new(store.clone(), DocConfig::default()).expect("doc");
    doc.create().await.expect("create");

    let zero = doc.append_change(Change::new(0, Delta::empty())).await.expect_err("rev 0");
    assert!(matches!(zero, DocError::Ot(OtError::InvalidChange(_))));

    let past_end = Change::new(1, Delta::new(vec![BodyOp::delete(3).expect("delete")]));
    let err = doc.append_change(past_end).await.expect_err("past end");
    assert!(matches!(err, DocError::Ot(OtError::InvalidChange(_))));
    assert!(!err.is_retryable());
    assert_eq!(store.rev_num(), 1);

    let hello = Change::new(1, Delta::new(vec![BodyOp::insert_text("hello", None).expect("insert")]));
    doc.append_change(hello).await.expect("insert");
    assert_eq!(doc.get_snapshot(None).await.expect("latest").text(), "hello");
}

#[tokio::test]
async fn author_policy_comes_from_config() {
    let config = DocConfig {
        require_author: true,
        max_author_id_len: 4,
        ..DocConfig::default()
    };
    let doc = DocControl::<PropertyOp>::new(store(), config).expect("doc");
    doc.create().await.expect("create");

    let anonymous = doc.append_change(Change::new(1, set("a", json!(1)))).await;
    assert!(matches!(anonymous, Err(DocError::BadAuthor(_))));

    let long = doc
        .append_change(Change::new(1, set("a", json!(1))).with_author("mallory"))
        .await;
    assert!(matches!(long, Err(DocError::BadAuthor(_))));

    let empty = doc.append_change(Change::new(1, set("a", json!(1))).with_author("")).await;
    assert!(matches!(empty, Err(DocError::BadAuthor(_))));

    assert_eq!(
        doc.append_change(Change::new(1, set("a", json!(1))).with_author("ana")).await,
        Ok(1)
    );
}

#[tokio::test]
async fn layout_is_validated() {
    let config = DocConfig::from_json(r#"{ "snapshot_path": "/change/latest" }"#).expect("parse");
    assert_eq!(config.change_prefix, "/change");
    assert!(matches!(
        DocControl::<PropertyOp>::new(store(), config),
        Err(DocError::Storage(_))
    ));

    let config = DocConfig {
        change_prefix: "no-slash".to_string(),
        ..DocConfig::default()
    };
    assert!(DocControl::<PropertyOp>::new(store(), config).is_err());
}

#[tokio::test]
async fn when_rev_num_after_waits_for_the_next_change() {
    let doc = created(store()).await;
    doc.append_change(Change::new(1, set("a", json!(1)))).await.expect("append");

    // Already past revision 0.
    assert_eq!(doc.when_rev_num_after(0, Some(1_000)).await, Ok(1));
    // Nothing new arrives.
    assert_eq!(doc.when_rev_num_after(1, Some(20)).await, Ok(1));

    let writer = DocControl::<PropertyOp>::new(doc.store().clone(), DocConfig::default()).expect("writer");
    let append = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.append_change(Change::new(2, set("b", json!(2)))).await
    };
    let (seen, appended) = tokio::join!(doc.when_rev_num_after(1, Some(5_000)), append);
    assert_eq!(appended, Ok(2));
    assert_eq!(seen, Ok(2));
}

#[tokio::test]
async fn concurrent_snapshot_reads_agree() {
    let doc = created(store()).await;
    for rev in 1..=5 {
        doc.append_change(Change::new(rev, set(&format!("k{rev}"), json!(rev))))
            .await
            .expect("append");
    }
    let reader = DocControl::<PropertyOp>::new(doc.store().clone(), DocConfig::default()).expect("reader");
    let (a, b, c) = tokio::join!(
        reader.get_snapshot(None),
        reader.get_snapshot(None),
        reader.get_snapshot(None)
    );
    let a = a.expect("a");
    assert_eq!(a.rev_num(), 5);
    assert_eq!(Ok(a.clone()), b);
    assert_eq!(Ok(a), c);
}
