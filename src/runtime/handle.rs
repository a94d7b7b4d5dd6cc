use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    file::{
        FileSnapshot, FileSnapshotV1, StoredRevision, TransactionError, TransactionResult,
        TransactionSpec, WaitOp,
    },
    persist::{PersistError, RevisionSink},
    sync::{Condition, Mutex},
    types::RevNum,
};

use super::events::StoreEvent;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("runtime channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub batch_max_revisions: usize,
    pub batch_max_latency_ms: u64,
    /// Commits are rejected once this many revisions await persistence.
    pub persist_queue_bound: usize,
    /// Checkpoint after this many revisions; 0 disables automatic checkpoints.
    pub snapshot_every_revisions: usize,
    pub compact_after_snapshot: bool,
    pub event_capacity: usize,
    /// Wait bound for transactions that carry no timeout op.
    pub default_wait_timeout_ms: u64,
    pub max_wait_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_max_revisions: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_revisions: 2000,
            compact_after_snapshot: false,
            event_capacity: 1024,
            default_wait_timeout_ms: 30_000,
            max_wait_timeout_ms: 300_000,
        }
    }
}

impl StoreConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    fn wait_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_wait_timeout_ms)
            .min(self.max_wait_timeout_ms);
        Duration::from_millis(ms)
    }
}

/// Cloneable handle to one file store.
#[derive(Clone)]
pub struct FileStoreHandle {
    inner: Arc<Inner>,
}

struct Inner {
    current: RwLock<Arc<FileSnapshot>>,
    commit_lock: Mutex,
    /// Pulsed after every commit.
    changed: Condition,
    events_tx: broadcast::Sender<StoreEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    config: StoreConfig,
    closed: AtomicBool,
    revisions_since_checkpoint: AtomicUsize,
}

enum PersistMsg {
    Revision(StoredRevision),
    Flush {
        resp: oneshot::Sender<Result<RevNum, PersistError>>,
    },
    Checkpoint {
        snapshot: FileSnapshotV1,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

type SharedSink = Arc<tokio::sync::Mutex<Box<dyn RevisionSink>>>;

/// Starts a store at `initial`, journaling commits to `sink` when given.
///
/// Must be called inside a tokio runtime.
pub fn spawn_file_store(
    initial: FileSnapshot,
    sink: Option<Box<dyn RevisionSink>>,
    config: StoreConfig,
) -> FileStoreHandle {
    let (events_tx, _) = broadcast::channel::<StoreEvent>(config.event_capacity.max(1));
    let persist_tx = sink.map(|sink| {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        spawn_persistence_worker(
            sink,
            persist_rx,
            events_tx.clone(),
            initial.rev_num(),
            config.clone(),
        );
        persist_tx
    });

    tracing::info!(
        rev_num = initial.rev_num(),
        paths = initial.path_count(),
        durable = persist_tx.is_some(),
        "file store started"
    );

    FileStoreHandle {
        inner: Arc::new(Inner {
            current: RwLock::new(Arc::new(initial)),
            commit_lock: Mutex::new(),
            changed: Condition::new(false),
            events_tx,
            persist_tx,
            config,
            closed: AtomicBool::new(false),
            revisions_since_checkpoint: AtomicUsize::new(0),
        }),
    }
}

impl FileStoreHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events_tx.subscribe()
    }

    /// The current snapshot. Never observes a partially applied transaction.
    pub fn snapshot(&self) -> Arc<FileSnapshot> {
        Arc::clone(&self.inner.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn rev_num(&self) -> RevNum {
        self.snapshot().rev_num()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Commits `spec`, then blocks on its wait op if it has one.
    ///
    /// An elapsed wait is reported as `wait_satisfied == Some(false)`, not as an error.
    pub async fn transact(&self, spec: TransactionSpec) -> Result<TransactionResult, TransactionError> {
        let mut result = self.commit(&spec).await?;
        if let Some(wait) = spec.wait() {
            let timeout = self.inner.config.wait_timeout(spec.timeout_ms());
            result.wait_satisfied = Some(self.resolve_wait(wait, timeout).await);
        }
        Ok(result)
    }

    async fn commit(&self, spec: &TransactionSpec) -> Result<TransactionResult, TransactionError> {
        let inner = &self.inner;
        let _guard = inner.commit_lock.lock().await;
        if inner.closed.load(Ordering::Acquire) {
            return Err(TransactionError::Closed);
        }

        let current = self.snapshot();
        let outcome = spec.run(&current).inspect_err(|err| {
            tracing::debug!(rev_num = current.rev_num(), error = %err, "transaction rejected");
        })?;
        let (Some(next), Some(revision)) = (outcome.next, outcome.revision) else {
            return Ok(outcome.result);
        };

        let permit = match inner.persist_tx.as_ref() {
            Some(tx) => Some(tx.try_reserve().map_err(|err| {
                tracing::warn!(rev_num = revision.rev_num, error = %err, "persistence queue full; rejecting transaction");
                TransactionError::Persist(format!("persistence queue unavailable: {err}"))
            })?),
            None => None,
        };

        let rev_num = next.rev_num();
        let push_count = revision.pushes.len();
        *inner.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        match permit {
            Some(permit) => permit.send(PersistMsg::Revision(revision)),
            None => {
                let _ = inner.events_tx.send(StoreEvent::DurableUpTo { rev_num });
            }
        }
        tracing::debug!(rev_num, push_count, "revision committed");
        let _ = inner.events_tx.send(StoreEvent::Committed { rev_num });
        inner.changed.on_off();

        self.maybe_auto_checkpoint().await;
        Ok(outcome.result)
    }

    async fn resolve_wait(&self, wait: &WaitOp, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so a commit in between still wakes us.
            let changed = self.inner.changed.when_true();
            if wait.is_satisfied(&self.snapshot()) {
                return true;
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return false;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return false;
            }
        }
    }

    /// Writes out buffered revisions; returns the highest durable revision.
    pub async fn flush(&self) -> Result<RevNum, RuntimeError> {
        let Some(tx) = self.inner.persist_tx.as_ref() else {
            return Ok(self.rev_num());
        };
        let (resp, rx) = oneshot::channel();
        tx.send(PersistMsg::Flush { resp })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| RuntimeError::ChannelClosed)??)
    }

    /// Stores a snapshot checkpoint of the current state.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        let _guard = self.inner.commit_lock.lock().await;
        self.send_checkpoint().await
    }

    /// Rejects further transactions, releases waiters and drains persistence.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let inner = &self.inner;
        let _guard = inner.commit_lock.lock().await;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        inner.changed.on_off();

        let out = match inner.persist_tx.as_ref() {
            Some(tx) => {
                let (done_tx, done_rx) = oneshot::channel();
                tx.send(PersistMsg::Shutdown { resp: done_tx })
                    .await
                    .map_err(|_| RuntimeError::ChannelClosed)?;
                done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
            }
            None => Ok(()),
        };
        tracing::info!(rev_num = self.rev_num(), "file store shut down");
        out
    }

    /// Caller holds the commit lock.
    async fn send_checkpoint(&self) -> Result<(), RuntimeError> {
        let Some(tx) = self.inner.persist_tx.as_ref() else {
            return Ok(());
        };
        let snapshot = self.snapshot().export();
        let rev_num = snapshot.rev_num;
        let (resp, rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            compact: self.inner.config.compact_after_snapshot,
            resp,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)??;
        self.inner.revisions_since_checkpoint.store(0, Ordering::Relaxed);
        tracing::info!(rev_num, "checkpoint written");
        Ok(())
    }

    async fn maybe_auto_checkpoint(&self) {
        let every = self.inner.config.snapshot_every_revisions;
        let count = self.inner.revisions_since_checkpoint.fetch_add(1, Ordering::Relaxed) + 1;
        if every == 0 || count < every || self.inner.persist_tx.is_none() {
            return;
        }
        if let Err(err) = self.send_checkpoint().await {
            tracing::error!(error = %err, "automatic checkpoint failed");
        }
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn RevisionSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    events_tx: broadcast::Sender<StoreEvent>,
    initial_durable: RevNum,
    config: StoreConfig,
) {
    let sink: SharedSink = Arc::new(tokio::sync::Mutex::new(sink));
    let latency = Duration::from_millis(config.batch_max_latency_ms);
    tokio::spawn(async move {
        let mut buf = Vec::<StoredRevision>::new();
        let mut deadline = Instant::now() + latency;
        let mut last_durable = initial_durable;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &events_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Revision(stored) => {
                            buf.push(stored);
                            if buf.len() >= config.batch_max_revisions {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &events_tx, true).await;
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &events_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Checkpoint { snapshot, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &events_tx, true).await {
                                Ok(()) => write_checkpoint(&sink, snapshot, compact).await,
                                Err(err) => Err(err),
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &events_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &events_tx, false).await;
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

async fn write_checkpoint(sink: &SharedSink, snapshot: FileSnapshotV1, compact: bool) -> Result<(), PersistError> {
    let sink_ref = Arc::clone(sink);
    tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        sink.write_snapshot(&snapshot)?;
        if compact {
            let removed = sink.compact_through(snapshot.rev_num)?;
            tracing::debug!(rev_num = snapshot.rev_num, removed, "journal compacted");
        }
        Result::<(), PersistError>::Ok(())
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?
}

async fn flush_buf(
    sink: &SharedSink,
    buf: &mut Vec<StoredRevision>,
    last_durable: &mut RevNum,
    events_tx: &broadcast::Sender<StoreEvent>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || sink_ref.blocking_lock().flush())
                .await
                .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let revisions = std::mem::take(buf);
    let count = revisions.len();
    let sink_ref = Arc::clone(sink);
    let append_res: Result<RevNum, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let rev_num = sink.append_revisions(&revisions)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(rev_num)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(rev_num) => {
            *last_durable = (*last_durable).max(rev_num);
            let _ = events_tx.send(StoreEvent::DurableUpTo { rev_num: *last_durable });
            Ok(())
        }
        Err(err) => {
            tracing::error!(count, error = %err, "failed to persist revisions");
            Err(err)
        }
    }
}
