//! Trailing-edge call coalescing.
//!
//! A [`Debouncer`] wraps a function and a quiet period. Each [`call`] replaces
//! the pending arguments and restarts the timer; the function runs once the
//! quiet period passes without another call, with the last arguments seen.
//!
//! The timer is a tokio task owned by the debouncer, so `call` must be made
//! from within a tokio runtime.
//!
//! [`call`]: Debouncer::call

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::lock;

struct DebounceState<T> {
    /// Bumped on every call/flush/cancel; a timer only fires if it still
    /// holds the current generation.
    generation: u64,
    pending: Option<T>,
    timer: Option<JoinHandle<()>>,
}

pub struct Debouncer<T> {
    delay: Duration,
    func: Arc<dyn Fn(T) + Send + Sync>,
    state: Arc<Mutex<DebounceState<T>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, func: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            func: Arc::new(func),
            state: Arc::new(Mutex::new(DebounceState {
                generation: 0,
                pending: None,
                timer: None,
            })),
        }
    }

    /// Schedule `args`, superseding any call still waiting for its quiet period.
    pub fn call(&self, args: T) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.pending = Some(args);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let func = Arc::clone(&self.func);
        let delay = self.delay;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let args = {
                let mut state = lock(&shared);
                if state.generation != generation {
                    return;
                }
                state.timer = None;
                state.pending.take()
            };
            if let Some(args) = args {
                trace!(generation, "Debounced call fired");
                func(args);
            }
        }));
    }

    /// Run the pending call now. Returns `false` if nothing was pending.
    pub fn flush(&self) -> bool {
        let args = self.take_pending();
        match args {
            Some(args) => {
                (self.func)(args);
                true
            }
            None => false,
        }
    }

    /// Drop the pending call. Returns `false` if nothing was pending.
    pub fn cancel(&self) -> bool {
        self.take_pending().is_some()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    fn take_pending(&self) -> Option<T> {
        let mut state = lock(&self.state);
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.pending.take()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.state).timer.take() {
            timer.abort();
        }
    }
}
