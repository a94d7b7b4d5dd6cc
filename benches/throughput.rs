use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use otstore::{
    file::{Blob, FileSnapshot, PredicateOp, PushOp, StoragePath, TransactionOp, TransactionSpec},
    ot::{
        Change, Delta, Snapshot,
        body::{BodyOp, BodySnapshot},
        property::{PropertyDelta, PropertyOp},
    },
};

/// One keystroke appended at the end of a document of `len` characters.
fn keystroke(len: u64, c: char) -> Delta<BodyOp> {
    let insert = BodyOp::insert_text(c.to_string(), None).expect("insert");
    if len == 0 {
        return Delta::new(vec![insert]);
    }
    Delta::new(vec![BodyOp::retain(len, None).expect("retain"), insert])
}

fn bench_typing(c: &mut Criterion) {
    c.bench_function("body_type_2k_chars", |b| {
        b.iter(|| {
            let mut snap = BodySnapshot::empty();
            for i in 0..2_000u64 {
                let change = Change::new(i + 1, keystroke(snap.length(), 'x'));
                snap = snap.compose(&change).expect("compose");
            }
            snap
        });
    });
}

fn bench_body_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_diff");
    for len in [100usize, 1_000, 10_000] {
        let text: String = "lorem ipsum ".chars().cycle().take(len).collect();
        let mut edited = text.clone();
        edited.insert_str(len / 2, "EDIT");
        let old = Snapshot::new(1, Delta::new(vec![BodyOp::insert_text(text, None).expect("old")])).expect("old");
        let new = Snapshot::new(2, Delta::new(vec![BodyOp::insert_text(edited, None).expect("new")])).expect("new");
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| old.diff(&new));
        });
    }
    group.finish();
}

fn bench_property_compose(c: &mut Criterion) {
    let deltas: Vec<PropertyDelta> = (0..1_000u64)
        .map(|i| Delta::new(vec![PropertyOp::set(format!("k{}", i % 64), i).expect("set")]))
        .collect();
    c.bench_function("property_compose_1k", |b| {
        b.iter(|| PropertyDelta::empty().compose_all(&deltas, true));
    });
}

fn bench_commits(c: &mut Criterion) {
    c.bench_function("file_commit_5k", |b| {
        b.iter(|| {
            let mut snap = FileSnapshot::empty();
            for i in 0..5_000u64 {
                let spec = TransactionSpec::new([
                    TransactionOp::Check(PredicateOp::rev_num_is(i)),
                    TransactionOp::Push(PushOp::write_path(
                        StoragePath::new(format!("/change/{i}")).expect("path"),
                        Blob::new(i.to_le_bytes().to_vec()),
                    )),
                ])
                .expect("spec");
                snap = spec.run(&snap).expect("run").next.expect("next");
            }
            snap
        });
    });
}

criterion_group!(benches, bench_typing, bench_body_diff, bench_property_compose, bench_commits);
criterion_main!(benches);
