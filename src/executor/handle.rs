//! Cancellable completion handle for submitted work.
//!
//! A [`LoadHandle`] moves through
//!
//! ```text
//! Pending ──start──▶ Running ──finish──▶ Completed | Failed
//!    │
//!    └────cancel────▶ Cancelled
//! ```
//!
//! Cancellation only succeeds while the work has not started. Done callbacks
//! fire exactly once, on the thread that finished the handle, or immediately
//! on the registering thread if the handle is already done.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{error, trace};

use crate::error::{panic_message, LoadError};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

type Callback<T> = Box<dyn FnOnce(&LoadHandle<T>) + Send + 'static>;

/// Observable status of a [`LoadHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Queued, not started
    Pending,
    /// Work is executing on a worker
    Running,
    /// Work produced a value
    Completed,
    /// Cancelled before it started
    Cancelled,
    /// Work returned an error or panicked
    Failed,
}

impl HandleStatus {
    /// Whether the handle has reached a terminal status.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            HandleStatus::Completed | HandleStatus::Cancelled | HandleStatus::Failed
        )
    }
}

enum Outcome<T> {
    Pending,
    Running,
    Completed(Arc<T>),
    Cancelled,
    Failed(LoadError),
}

impl<T> Outcome<T> {
    fn status(&self) -> HandleStatus {
        match self {
            Outcome::Pending => HandleStatus::Pending,
            Outcome::Running => HandleStatus::Running,
            Outcome::Completed(_) => HandleStatus::Completed,
            Outcome::Cancelled => HandleStatus::Cancelled,
            Outcome::Failed(_) => HandleStatus::Failed,
        }
    }

    fn result(&self) -> Option<Result<Arc<T>, LoadError>> {
        match self {
            Outcome::Pending | Outcome::Running => None,
            Outcome::Completed(value) => Some(Ok(value.clone())),
            Outcome::Cancelled => Some(Err(LoadError::Cancelled)),
            Outcome::Failed(err) => Some(Err(err.clone())),
        }
    }
}

struct State<T> {
    outcome: Outcome<T>,
    callbacks: Vec<Callback<T>>,
}

struct Shared<T> {
    id: u64,
    state: Mutex<State<T>>,
    done: Condvar,
}

/// Handle to work submitted to an [`Executor`](super::Executor).
///
/// Cloning is cheap; all clones observe the same outcome.
pub struct LoadHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for LoadHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> LoadHandle<T> {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(State {
                    outcome: Outcome::Pending,
                    callbacks: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Process-unique id, used in log events.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current status.
    pub fn status(&self) -> HandleStatus {
        self.lock().outcome.status()
    }

    /// Whether the work completed, failed or was cancelled. Never blocks on
    /// the work itself.
    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }

    /// Whether the handle was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status() == HandleStatus::Cancelled
    }

    /// Request cancellation.
    ///
    /// Returns `true` if the handle is now cancelled. Work that is already
    /// running or finished is unaffected and `false` is returned.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        match state.outcome.status() {
            HandleStatus::Pending => {
                state.outcome = Outcome::Cancelled;
                trace!(handle = self.id(), "handle cancelled");
                self.settle(state);
                true
            }
            HandleStatus::Cancelled => true,
            _ => false,
        }
    }

    /// Register a callback to run once the handle is done.
    ///
    /// If the handle is already done the callback runs immediately on the
    /// calling thread. Panics inside the callback are caught and logged.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&LoadHandle<T>) + Send + 'static,
    {
        let mut state = self.lock();
        if state.outcome.status().is_done() {
            drop(state);
            self.invoke(Box::new(callback));
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Block until the handle is done and return its result.
    pub fn result(&self) -> Result<Arc<T>, LoadError> {
        let state = self.lock();
        let state = self
            .shared
            .done
            .wait_while(state, |s| !s.outcome.status().is_done())
            .unwrap_or_else(PoisonError::into_inner);
        state
            .outcome
            .result()
            .unwrap_or(Err(LoadError::Cancelled))
    }

    /// Result if the handle is done, without blocking.
    pub fn try_result(&self) -> Option<Result<Arc<T>, LoadError>> {
        self.lock().outcome.result()
    }

    /// Block until done or until `timeout` elapses. Returns whether the
    /// handle is done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .shared
            .done
            .wait_timeout_while(state, timeout, |s| !s.outcome.status().is_done())
            .unwrap_or_else(PoisonError::into_inner);
        state.outcome.status().is_done()
    }

    /// Mark the work as started. Returns `false` if it was cancelled first.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.lock();
        if state.outcome.status() != HandleStatus::Pending {
            return false;
        }
        state.outcome = Outcome::Running;
        true
    }

    /// Record the work's result and fire callbacks.
    pub(crate) fn finish(&self, result: Result<T, LoadError>) {
        let mut state = self.lock();
        if state.outcome.status().is_done() {
            return;
        }
        state.outcome = match result {
            Ok(value) => Outcome::Completed(Arc::new(value)),
            Err(err) => Outcome::Failed(err),
        };
        trace!(handle = self.id(), status = ?state.outcome.status(), "handle finished");
        self.settle(state);
    }

    /// Wake blocked waiters and run pending callbacks outside the lock.
    fn settle(&self, mut state: MutexGuard<'_, State<T>>) {
        let callbacks = std::mem::take(&mut state.callbacks);
        drop(state);
        self.shared.done.notify_all();

        for callback in callbacks {
            self.invoke(callback);
        }
    }

    fn invoke(&self, callback: Callback<T>) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
            error!(
                handle = self.id(),
                error = %panic_message(payload.as_ref()),
                "done callback panicked"
            );
        }
    }
}

impl<T> fmt::Debug for LoadHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .shared
            .state
            .lock()
            .map(|s| s.outcome.status())
            .unwrap_or_else(|poisoned| poisoned.into_inner().outcome.status());
        f.debug_struct("LoadHandle")
            .field("id", &self.shared.id)
            .field("status", &status)
            .finish()
    }
}
