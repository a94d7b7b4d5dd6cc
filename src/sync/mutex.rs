use std::{collections::VecDeque, future::Future};

use tokio::sync::oneshot;

use super::lock_ignoring_poison;

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    queue: VecDeque<oneshot::Sender<()>>,
}

/// Non-reentrant async lock granted in strict FIFO order.
///
/// Release hands ownership directly to the oldest live waiter, so a caller
/// arriving later can never overtake one already queued.
#[derive(Debug, Default)]
pub struct Mutex {
    state: std::sync::Mutex<LockState>,
}

/// Releases the [`Mutex`] when dropped.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

/// A queued acquisition. Dropping it before it resolves gives up the slot,
/// or passes the lock on if it had already been granted.
struct PendingLock<'a> {
    mutex: &'a Mutex,
    rx: Option<oneshot::Receiver<()>>,
}

impl<'a> PendingLock<'a> {
    async fn acquire(mut self) -> MutexGuard<'a> {
        if let Some(rx) = self.rx.as_mut() {
            // Queued senders are only dropped after a send to a closed receiver.
            let _ = rx.await;
        }
        self.rx = None;
        MutexGuard { mutex: self.mutex }
    }
}

impl Drop for PendingLock<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.mutex.release();
            }
        }
    }
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock behind every earlier caller.
    pub async fn lock(&self) -> MutexGuard<'_> {
        let rx = {
            let mut state = lock_ignoring_poison(&self.state);
            if !state.held {
                state.held = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(tx);
                Some(rx)
            }
        };
        PendingLock { mutex: self, rx }.acquire().await
    }

    /// Takes the lock only if it is free and nobody is queued.
    pub fn try_lock(&self) -> Option<MutexGuard<'_>> {
        let mut state = lock_ignoring_poison(&self.state);
        if state.held {
            return None;
        }
        state.held = true;
        Some(MutexGuard { mutex: self })
    }

    /// Runs `f` with the lock held, releasing it however `f` finishes.
    pub async fn with_lock_held<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock().await;
        f().await
    }

    pub fn is_locked(&self) -> bool {
        lock_ignoring_poison(&self.state).held
    }

    /// Callers currently queued behind the holder.
    pub fn waiters(&self) -> usize {
        lock_ignoring_poison(&self.state)
            .queue
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    fn release(&self) {
        let mut state = lock_ignoring_poison(&self.state);
        while let Some(tx) = state.queue.pop_front() {
            if tx.send(()).is_ok() {
                return;
            }
        }
        state.held = false;
    }
}
