//! Executor implementations.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::runtime::{Handle, TryCurrentError};

use super::{Executor, Job};

// =============================================================================
// TokioExecutor
// =============================================================================

/// Runs jobs on a tokio runtime's blocking thread pool.
///
/// Realizations are CPU-bound and may sleep, so they go through
/// `spawn_blocking` rather than the async worker threads. The pool size is
/// governed by the runtime's `max_blocking_threads`.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    runtime: Handle,
}

impl TokioExecutor {
    /// Create an executor bound to the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Create an executor bound to the runtime of the current context.
    ///
    /// Fails when called outside a tokio runtime.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) {
        // Detached: completion is observed through the LoadHandle.
        drop(self.runtime.spawn_blocking(job));
    }
}

// =============================================================================
// QueuedExecutor
// =============================================================================

/// Holds jobs in FIFO order until [`run_pending`](Self::run_pending) or
/// [`run_next`](Self::run_next) runs them on the calling thread.
///
/// Useful for deterministic rendering and tests: nothing runs behind the
/// caller's back, and every submission is counted.
#[derive(Default)]
pub struct QueuedExecutor {
    queue: Mutex<VecDeque<Job>>,
    submitted: AtomicUsize,
}

impl QueuedExecutor {
    /// Create an empty executor.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total number of jobs ever submitted.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Run the oldest queued job. Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        // Pop before running so the job may submit more work.
        let job = self.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run queued jobs until the queue is empty, including jobs submitted
    /// while running. Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }

    /// Drop every queued job without running it. Returns how many were
    /// dropped.
    pub fn discard_pending(&self) -> usize {
        let jobs: Vec<Job> = self.lock().drain(..).collect();
        let count = jobs.len();
        drop(jobs);
        count
    }
}

impl Executor for QueuedExecutor {
    fn execute(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.lock().push_back(job);
    }
}

impl fmt::Debug for QueuedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedExecutor")
            .field("pending", &self.pending())
            .field("submitted", &self.submitted())
            .finish()
    }
}
