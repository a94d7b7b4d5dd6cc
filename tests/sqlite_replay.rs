use tempfile::TempDir;

use otstore::{
    doc::{DocConfig, DocControl},
    file::{Blob, FileSnapshot, PushOp, StoragePath, StoredRevision, TransactionOp, TransactionSpec},
    ot::{Change, Delta, property::PropertyOp},
    persist::{PersistError, RevisionSink, sqlite::SqliteRevisionSink},
    runtime::{StoreConfig, spawn_file_store},
};

fn path(raw: &str) -> StoragePath {
    StoragePath::new(raw).expect("path")
}

fn revision(base: &FileSnapshot, pushes: Vec<PushOp>) -> (FileSnapshot, StoredRevision) {
    let ops = pushes.into_iter().map(TransactionOp::Push);
    let outcome = TransactionSpec::new(ops).expect("spec").run(base).expect("run");
    (
        outcome.next.expect("next"),
        outcome.revision.expect("revision"),
    )
}

#[test]
fn sqlite_replay_round_trips_state() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("store.db");

    let s0 = FileSnapshot::empty();
    let (s1, r1) = revision(&s0, vec![
        PushOp::write_path(path("/a"), Blob::new(b"one".to_vec())),
        PushOp::write_blob(Blob::new(b"loose".to_vec())),
    ]);
    let (s2, r2) = revision(&s1, vec![PushOp::write_path(path("/a"), Blob::new(b"two".to_vec()))]);
    let (s3, r3) = revision(&s2, vec![
        PushOp::delete_blob(Blob::new(b"loose".to_vec()).hash()),
        PushOp::write_path(path("/dir/b"), Blob::new(b"b".to_vec())),
    ]);

    let mut sink = SqliteRevisionSink::open(&db_path).expect("open sqlite");
    assert_eq!(sink.append_revisions(&[r1, r2]).expect("append"), 2);
    assert_eq!(sink.append_revisions(&[r3]).expect("append"), 3);
    sink.flush().expect("flush");
    drop(sink);

    let reopened = SqliteRevisionSink::open(&db_path).expect("reopen");
    assert_eq!(reopened.latest_rev_num().expect("latest"), 3);
    let replayed = reopened.load_snapshot().expect("replay");
    assert_eq!(replayed, s3);
    assert_eq!(reopened.load_revisions_after(1).expect("tail").len(), 2);
}

#[test]
fn snapshot_and_compaction_preserve_replay() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snap.db");
    let mut sink = SqliteRevisionSink::open(&db_path).expect("open sqlite");

    let mut state = FileSnapshot::empty();
    let mut revisions = Vec::new();
    for i in 0..10u64 {
        let (next, rev) = revision(&state, vec![PushOp::write_path(
            path(&format!("/change/{i}")),
            Blob::new(format!("change {i}").into_bytes()),
        )]);
        state = next;
        revisions.push(rev);
    }
    sink.append_revisions(&revisions).expect("append");

    let checkpoint = state.export();
    sink.write_snapshot(&checkpoint).expect("snapshot");
    let removed = sink.compact_through(checkpoint.rev_num).expect("compact");
    assert_eq!(removed, 10);

    let (after, tail) = revision(&state, vec![PushOp::delete_path_prefix(path("/change"))]);
    sink.append_revisions(&[tail]).expect("append tail");
    drop(sink);

    let reopened = SqliteRevisionSink::open(&db_path).expect("reopen");
    let replayed = reopened.load_snapshot().expect("replay");
    assert_eq!(replayed, after);
    assert_eq!(replayed.rev_num(), 11);
}

#[test]
fn journal_gaps_are_reported_as_corruption() {
    let mut sink = SqliteRevisionSink::open_in_memory().expect("open");
    let (s1, r1) = revision(&FileSnapshot::empty(), vec![PushOp::write_blob(Blob::new(b"x".to_vec()))]);
    let (_, r2) = revision(&s1, vec![PushOp::write_blob(Blob::new(b"y".to_vec()))]);
    let skipped = StoredRevision {
        rev_num: 3,
        ..r2
    };
    sink.append_revisions(&[r1, skipped]).expect("append");

    let err = sink.load_snapshot().expect_err("gap");
    assert!(matches!(err, PersistError::Corrupt(_)), "{err:?}");
}

#[tokio::test]
async fn runtime_checkpoints_and_reloads_a_document() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("doc.db");
    let config = StoreConfig {
        snapshot_every_revisions: 3,
        compact_after_snapshot: true,
        ..StoreConfig::default()
    };

    {
        let sink = SqliteRevisionSink::open(&db_path).expect("open");
        let initial = sink.load_snapshot().expect("load");
        let store = spawn_file_store(initial, Some(Box::new(sink)), config.clone());
        let doc = DocControl::<PropertyOp>::new(store.clone(), DocConfig::default()).expect("doc");
        doc.create().await.expect("create");
        for rev in 1..=4u64 {
            let delta = Delta::new(vec![PropertyOp::set("count", rev).expect("set")]);
            doc.append_change(Change::new(rev, delta)).await.expect("append");
        }
        assert_eq!(store.flush().await.expect("flush"), 5);
        store.shutdown().await.expect("shutdown");
    }

    let sink = SqliteRevisionSink::open(&db_path).expect("reopen");
    // Revisions 1..=3 were folded into the checkpoint.
    assert_eq!(sink.load_revisions_after(0).expect("journal").len(), 2);
    let initial = sink.load_snapshot().expect("load");
    assert_eq!(initial.rev_num(), 5);

    let store = spawn_file_store(initial, Some(Box::new(sink)), config);
    let doc = DocControl::<PropertyOp>::new(store.clone(), DocConfig::default()).expect("doc");
    assert_eq!(doc.rev_num(), Ok(4));
    let latest = doc.get_snapshot(None).await.expect("latest");
    assert_eq!(latest.get("count"), Some(&serde_json::json!(4)));
    assert_eq!(doc.get_snapshot(Some(2)).await.expect("rev 2").get("count"), Some(&serde_json::json!(2)));

    doc.append_change(Change::new(5, Delta::new(vec![PropertyOp::set("count", 5u64).expect("set")])))
        .await
        .expect("append after reload");
    store.shutdown().await.expect("shutdown");
}
