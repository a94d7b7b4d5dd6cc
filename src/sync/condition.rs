use std::future::Future;

use tokio::sync::oneshot;

use super::lock_ignoring_poison;

#[derive(Debug, Default)]
struct CondState {
    value: bool,
    true_waiters: Vec<oneshot::Sender<()>>,
    false_waiters: Vec<oneshot::Sender<()>>,
}

/// Boolean level trigger. Every transition wakes all waiters for the new state.
#[derive(Debug, Default)]
pub struct Condition {
    state: std::sync::Mutex<CondState>,
}

impl Condition {
    pub fn new(initial: bool) -> Self {
        Self {
            state: std::sync::Mutex::new(CondState {
                value: initial,
                ..CondState::default()
            }),
        }
    }

    pub fn value(&self) -> bool {
        lock_ignoring_poison(&self.state).value
    }

    pub fn set(&self, value: bool) {
        let mut state = lock_ignoring_poison(&self.state);
        if state.value == value {
            return;
        }
        state.value = value;
        let woken = if value {
            std::mem::take(&mut state.true_waiters)
        } else {
            std::mem::take(&mut state.false_waiters)
        };
        drop(state);
        for tx in woken {
            let _ = tx.send(());
        }
    }

    /// Pulses true then false, waking everyone currently waiting.
    pub fn on_off(&self) {
        self.set(true);
        self.set(false);
    }

    /// Resolves once the value is `true`. The waiter is registered before
    /// this returns, so a transition right after the call is not missed.
    pub fn when_true(&self) -> impl Future<Output = ()> + Send + use<> {
        self.when(true)
    }

    /// Resolves once the value is `false`. Registered eagerly like [`Self::when_true`].
    pub fn when_false(&self) -> impl Future<Output = ()> + Send + use<> {
        self.when(false)
    }

    fn when(&self, wanted: bool) -> impl Future<Output = ()> + Send + use<> {
        let rx = {
            let mut state = lock_ignoring_poison(&self.state);
            if state.value == wanted {
                None
            } else {
                let waiters = if wanted {
                    &mut state.true_waiters
                } else {
                    &mut state.false_waiters
                };
                waiters.retain(|tx| !tx.is_closed());
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            }
        };
        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
    }
}
