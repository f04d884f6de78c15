//! Work submission.
//!
//! The slice machinery never runs realizations on the caller's thread. It
//! hands boxed jobs to an [`Executor`] shared by every source derived from one
//! root, and tracks each job through a [`LoadHandle`].
//!
//! # Components
//!
//! - [`Executor`]: trait for anything that can run a job somewhere else
//! - [`submit`]: wraps a fallible computation in a job and returns its handle
//! - [`LoadHandle`]: cancellable, blocking-waitable completion token
//! - [`TokioExecutor`]: runs jobs on a tokio runtime's blocking pool
//! - [`QueuedExecutor`]: holds jobs until told to run them (deterministic)

mod handle;
mod pool;

pub use handle::{HandleStatus, LoadHandle};
pub use pool::{QueuedExecutor, TokioExecutor};

use std::panic::{self, AssertUnwindSafe};

use tracing::trace;

use crate::error::{panic_message, LoadError};

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs off the calling thread.
///
/// Implementations must not block in [`execute`](Executor::execute). They may
/// drop a job without running it (e.g. on shutdown); the handle of a dropped
/// job resolves as cancelled.
pub trait Executor: Send + Sync {
    /// Schedule `job` for execution.
    fn execute(&self, job: Job);
}

/// Marks the handle cancelled if the job is dropped before it runs.
struct JobGuard<T: Send + Sync + 'static> {
    handle: Option<LoadHandle<T>>,
}

impl<T: Send + Sync + 'static> Drop for JobGuard<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            trace!(handle = handle.id(), "job dropped before running");
            handle.cancel();
        }
    }
}

/// Submit `work` to `executor` and return a handle to its result.
///
/// Exactly one job is scheduled per call. If the handle is cancelled before a
/// worker picks the job up, `work` never runs. Panics inside `work` resolve
/// the handle as [`LoadError::Panicked`].
pub fn submit<T, F>(executor: &dyn Executor, work: F) -> LoadHandle<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Result<T, LoadError> + Send + 'static,
{
    let handle = LoadHandle::new();
    let mut guard = JobGuard {
        handle: Some(handle.clone()),
    };

    trace!(handle = handle.id(), "submitting job");
    executor.execute(Box::new(move || {
        let Some(handle) = guard.handle.take() else {
            return;
        };
        if !handle.start() {
            trace!(handle = handle.id(), "skipping cancelled job");
            return;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|payload| Err(LoadError::Panicked(panic_message(payload.as_ref()))));
        handle.finish(result);
    }));

    handle
}
