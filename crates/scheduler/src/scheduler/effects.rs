//! Serial queue for actor-level side effects (vibration and the like).
//!
//! Effects run one at a time, in submission order, on a dedicated thread.
//! Suspending the queue holds back everything not yet started; cancelling
//! discards it.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::error::PoolError;

type Effect = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Effect>,
    suspended: bool,
    closed: bool,
}

struct EffectShared {
    state: Mutex<QueueState>,
    signal: Condvar,
}

impl EffectShared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct EffectQueue {
    name: String,
    shared: Arc<EffectShared>,
    worker: Option<JoinHandle<()>>,
}

impl EffectQueue {
    pub fn new(name: impl Into<String>) -> Result<Self, PoolError> {
        let name = name.into();
        let shared = Arc::new(EffectShared {
            state: Mutex::new(QueueState::default()),
            signal: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_effects(&worker_shared))
            .map_err(|source| PoolError::Spawn {
                name: name.clone(),
                source,
            })?;
        Ok(Self {
            name,
            shared,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an effect behind everything already submitted.
    pub fn submit<F>(&self, effect: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.state().pending.push_back(Box::new(effect));
        self.shared.signal.notify_one();
    }

    /// Stop starting new effects. Queued effects are kept.
    pub fn suspend(&self) {
        self.shared.state().suspended = true;
    }

    pub fn resume(&self) {
        self.shared.state().suspended = false;
        self.shared.signal.notify_one();
    }

    /// Drop every effect that has not started yet.
    pub fn cancel_all(&self) {
        let dropped = {
            let mut state = self.shared.state();
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        if dropped > 0 {
            debug!(queue = %self.name, dropped, "cancelled queued effects");
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.state().suspended
    }

    /// Effects queued but not yet started.
    pub fn pending(&self) -> usize {
        self.shared.state().pending.len()
    }
}

fn run_effects(shared: &EffectShared) {
    loop {
        let effect = {
            let mut state = shared.state();
            loop {
                if state.closed {
                    return;
                }
                if !state.suspended {
                    if let Some(effect) = state.pending.pop_front() {
                        break effect;
                    }
                }
                state = shared
                    .signal
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        effect();
    }
}

impl Drop for EffectQueue {
    fn drop(&mut self) {
        self.shared.state().closed = true;
        self.shared.signal.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for EffectQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectQueue")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}
