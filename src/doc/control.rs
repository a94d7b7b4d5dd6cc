use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use crate::{
    file::{
        Blob, FileSnapshot, PredicateOp, PullOp, PushOp, TransactionOp, TransactionSpec, WaitOp,
    },
    ot::{Change, ChangeEnvelope, Delta, DeltaOp, OtError, Snapshot},
    runtime::FileStoreHandle,
    sync::SingleFlight,
    types::{RevNum, now_ms},
};

use super::{DocConfig, DocError, Layout};

type SnapshotCache<O> = Arc<StdMutex<Option<Snapshot<O>>>>;

/// Change log and snapshots of one document of kind `O`.
pub struct DocControl<O: DeltaOp> {
    store: FileStoreHandle,
    layout: Layout,
    config: DocConfig,
    latest: SnapshotCache<O>,
    flight: SingleFlight<Result<Snapshot<O>, DocError>>,
}

impl<O: DeltaOp> DocControl<O> {
    /// Binds to `store`. The store should hold nothing but this document.
    pub fn new(store: FileStoreHandle, config: DocConfig) -> Result<Self, DocError> {
        let layout = config.layout()?;
        Ok(Self {
            store,
            layout,
            config,
            latest: Arc::new(StdMutex::new(None)),
            flight: SingleFlight::new(),
        })
    }

    pub fn store(&self) -> &FileStoreHandle {
        &self.store
    }

    /// Writes change 0 (the empty delta) and the empty snapshot.
    pub async fn create(&self) -> Result<(), DocError> {
        let change0 = self.layout.change_path(0)?;
        let first = Change::<O>::new(0, Delta::empty()).with_timestamp(now_ms());
        let empty = Snapshot::<O>::empty();
        let spec = TransactionSpec::new([
            TransactionOp::Check(PredicateOp::path_absent(change0.clone())),
            TransactionOp::Check(PredicateOp::rev_num_is(0)),
            TransactionOp::Push(PushOp::write_path(change0, encode_change(&first)?)),
            TransactionOp::Push(PushOp::write_path(
                self.layout.snapshot_path.clone(),
                encode_snapshot(&empty)?,
            )),
        ])?;
        match self.store.transact(spec).await {
            Ok(_) => {
                tracing::info!(kind = O::KIND, "document created");
                Ok(())
            }
            Err(err) => match DocError::from(err) {
                DocError::Predicate(_) if self.exists() => Err(DocError::AlreadyExists),
                other => Err(other),
            },
        }
    }

    pub fn exists(&self) -> bool {
        self.layout
            .change_path(0)
            .is_ok_and(|path| self.store.snapshot().has_path(&path))
    }

    /// Latest document revision.
    pub fn rev_num(&self) -> Result<RevNum, DocError> {
        doc_rev_num(&self.store.snapshot(), &self.layout)
    }

    pub async fn get_change(&self, rev_num: RevNum) -> Result<Change<O>, DocError> {
        let path = self.layout.change_path(rev_num)?;
        let spec = TransactionSpec::new([PullOp::read_path(path.clone())])?;
        let result = self.store.transact(spec).await?;
        match result.path(&path) {
            Some(blob) => decode_change(blob),
            None if self.exists() => Err(DocError::NoSuchChange(rev_num)),
            None => Err(DocError::DocumentMissing),
        }
    }

    /// Snapshot at `rev_num`, or the latest one when `None`.
    ///
    /// Concurrent requests for the latest snapshot share one computation.
    pub async fn get_snapshot(&self, rev_num: Option<RevNum>) -> Result<Snapshot<O>, DocError> {
        let storage = self.store.snapshot();
        let current = doc_rev_num(&storage, &self.layout)?;
        let target = rev_num.unwrap_or(current);
        if target > current {
            return Err(DocError::NoSuchChange(target));
        }
        if target < current {
            let changes = read_changes::<O>(&storage, &self.layout, 0, target)?;
            return Ok(Snapshot::empty().compose_all(&changes)?);
        }

        if let Some(cached) = self.cached_at(current) {
            return Ok(cached);
        }
        let store = self.store.clone();
        let layout = self.layout.clone();
        let cache = Arc::clone(&self.latest);
        self.flight
            .run(move || async move { compute_latest(&store, &layout, &cache) })
            .await?
    }

    /// Validates `change` and commits it as the next revision.
    ///
    /// A change built on a stale revision fails with a `revNumMismatch`
    /// predicate failure; retrying is left to the caller.
    pub async fn append_change(&self, change: Change<O>) -> Result<RevNum, DocError> {
        self.config.check_author(change.author_id.as_deref())?;
        if change.rev_num == 0 {
            return Err(OtError::invalid_change("revision 0 is the document's creation").into());
        }
        let rev_check = PredicateOp::rev_num_is(change.rev_num);
        let storage = self.store.snapshot();
        rev_check.check(&storage).map_err(DocError::Predicate)?;
        let superseded = storage.path_hash(&self.layout.snapshot_path);

        let base = self.get_snapshot(Some(change.rev_num - 1)).await?;
        let change = match change.timestamp_ms {
            Some(_) => change,
            None => change.with_timestamp(now_ms()),
        };
        let next = base.compose(&change)?;
        let change_path = self.layout.change_path(change.rev_num)?;

        let mut ops = vec![
            TransactionOp::Check(rev_check),
            TransactionOp::Check(PredicateOp::path_absent(change_path.clone())),
            TransactionOp::Push(PushOp::write_path(change_path, encode_change(&change)?)),
            TransactionOp::Push(PushOp::write_path(
                self.layout.snapshot_path.clone(),
                encode_snapshot(&next)?,
            )),
        ];
        // The old snapshot blob is unreachable once the path moves on.
        ops.extend(superseded.map(|hash| TransactionOp::Push(PushOp::delete_blob(hash))));
        let spec = TransactionSpec::new(ops)?;
        self.store.transact(spec).await.inspect_err(|err| {
            tracing::debug!(kind = O::KIND, rev_num = change.rev_num, error = %err, "change rejected");
        })?;

        tracing::debug!(kind = O::KIND, rev_num = change.rev_num, ops = change.delta.len(), "change appended");
        *lock_cache(&self.latest) = Some(next);
        Ok(change.rev_num)
    }

    /// Waits until the document moves past `rev_num` or `timeout_ms` elapses.
    ///
    /// Returns the document revision observed when the wait ended.
    pub async fn when_rev_num_after(&self, rev_num: RevNum, timeout_ms: Option<u64>) -> Result<RevNum, DocError> {
        let mut ops = vec![TransactionOp::Wait(WaitOp::when_rev_num_after(rev_num + 1))];
        ops.extend(timeout_ms.map(TransactionOp::Timeout));
        let spec = TransactionSpec::new(ops)?;
        self.store.transact(spec).await?;
        self.rev_num()
    }

    fn cached_at(&self, rev_num: RevNum) -> Option<Snapshot<O>> {
        lock_cache(&self.latest)
            .as_ref()
            .filter(|snapshot| snapshot.rev_num() == rev_num)
            .cloned()
    }
}

fn lock_cache<O>(cache: &SnapshotCache<O>) -> std::sync::MutexGuard<'_, Option<Snapshot<O>>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

fn doc_rev_num(storage: &FileSnapshot, layout: &Layout) -> Result<RevNum, DocError> {
    if !storage.has_path(&layout.change_path(0)?) {
        return Err(DocError::DocumentMissing);
    }
    Ok(storage.rev_num().saturating_sub(1))
}

fn compute_latest<O: DeltaOp>(
    store: &FileStoreHandle,
    layout: &Layout,
    cache: &SnapshotCache<O>,
) -> Result<Snapshot<O>, DocError> {
    let storage = store.snapshot();
    let current = doc_rev_num(&storage, layout)?;
    if let Some(cached) = lock_cache(cache).as_ref().filter(|s| s.rev_num() == current) {
        return Ok(cached.clone());
    }

    let base = match storage.path_blob(&layout.snapshot_path) {
        Some(blob) => decode_snapshot::<O>(blob)?,
        None => Snapshot::empty(),
    };
    let snapshot = if base.rev_num() >= current {
        base
    } else {
        let changes = read_changes::<O>(&storage, layout, base.rev_num() + 1, current)?;
        base.compose_all(&changes)?
    };

    let mut slot = lock_cache(cache);
    if slot.as_ref().is_none_or(|s| s.rev_num() < snapshot.rev_num()) {
        *slot = Some(snapshot.clone());
    }
    Ok(snapshot)
}

fn read_changes<O: DeltaOp>(
    storage: &FileSnapshot,
    layout: &Layout,
    from: RevNum,
    through: RevNum,
) -> Result<Vec<Change<O>>, DocError> {
    (from..=through)
        .map(|rev_num| {
            let path = layout.change_path(rev_num)?;
            let blob = storage.path_blob(&path).ok_or(DocError::NoSuchChange(rev_num))?;
            decode_change(blob)
        })
        .collect()
}

fn encode_change<O: DeltaOp>(change: &Change<O>) -> Result<Blob, DocError> {
    Ok(Blob::new(ChangeEnvelope::<Change<O>>::encode(change)?))
}

fn decode_change<O: DeltaOp>(blob: &Blob) -> Result<Change<O>, DocError> {
    Ok(ChangeEnvelope::<Change<O>>::decode(blob.bytes())?)
}

fn encode_snapshot<O: DeltaOp>(snapshot: &Snapshot<O>) -> Result<Blob, DocError> {
    serde_json::to_vec(snapshot)
        .map(Blob::new)
        .map_err(|e| DocError::Codec(format!("snapshot encode failed: {e}")))
}

fn decode_snapshot<O: DeltaOp>(blob: &Blob) -> Result<Snapshot<O>, DocError> {
    serde_json::from_slice(blob.bytes()).map_err(|e| DocError::Codec(format!("snapshot decode failed: {e}")))
}
