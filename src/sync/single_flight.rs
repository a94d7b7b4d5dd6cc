use std::{
    future::Future,
    sync::{Arc, Mutex as StdMutex},
};

use thiserror::Error;
use tokio::sync::watch;

use super::lock_ignoring_poison;

type Slot<T> = Arc<StdMutex<Option<watch::Receiver<Option<T>>>>>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SingleFlightError {
    /// The shared operation panicked or its task was cancelled.
    #[error("single-flight operation ended without a result")]
    Abandoned,
}

/// Shares one in-flight run of an operation among concurrent callers.
///
/// A call starts the operation only when none is outstanding; every caller
/// that arrives while it runs receives a clone of the same result.
#[derive(Debug)]
pub struct SingleFlight<T> {
    slot: Slot<T>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(StdMutex::new(None)),
        }
    }
}

/// Empties the slot when the operation's task finishes or unwinds.
struct ClearSlot<T>(Slot<T>);

impl<T> Drop for ClearSlot<T> {
    fn drop(&mut self) {
        lock_ignoring_poison(&self.0).take();
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        lock_ignoring_poison(&self.slot).is_some()
    }

    /// Joins the outstanding run, or starts `op` on a new task.
    pub async fn run<F, Fut>(&self, op: F) -> Result<T, SingleFlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut rx = {
            let mut slot = lock_ignoring_poison(&self.slot);
            match slot.as_ref() {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    let fut = op();
                    let clear = ClearSlot(Arc::clone(&self.slot));
                    tokio::spawn(async move {
                        let value = fut.await;
                        // Clear first so callers arriving after completion start a fresh run.
                        drop(clear);
                        let _ = tx.send(Some(value));
                    });
                    rx
                }
            }
        };
        let value = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SingleFlightError::Abandoned)?;
        value.clone().ok_or(SingleFlightError::Abandoned)
    }
}
