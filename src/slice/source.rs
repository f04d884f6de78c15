//! Lazy array bound to an executor.

use std::fmt;
use std::sync::Arc;

use ndarray::ArrayD;
use tracing::debug;

use crate::array::{DType, LazyArray, Selector};
use crate::config::LoadConfig;
use crate::error::SelectorError;
use crate::executor::{self, Executor, LoadHandle};

/// A lazy array together with the executor that realizes it.
///
/// Every source sliced or transposed from a root shares the root's executor
/// and [`LoadConfig`]. None of the methods except [`submit`](Self::submit)
/// cause work, and `submit` only schedules it.
pub struct LazySource<A: LazyArray> {
    lazy: A,
    executor: Arc<dyn Executor>,
    config: LoadConfig,
}

impl<A: LazyArray> Clone for LazySource<A> {
    fn clone(&self) -> Self {
        Self {
            lazy: self.lazy.clone(),
            executor: Arc::clone(&self.executor),
            config: self.config,
        }
    }
}

impl<A: LazyArray> LazySource<A> {
    /// Wrap `lazy` with default load configuration.
    pub fn new(lazy: A, executor: Arc<dyn Executor>) -> Self {
        Self::with_config(lazy, executor, LoadConfig::default())
    }

    /// Wrap `lazy` with an explicit load configuration.
    pub fn with_config(lazy: A, executor: Arc<dyn Executor>, config: LoadConfig) -> Self {
        Self {
            lazy,
            executor,
            config,
        }
    }

    /// Shape of the realized array.
    pub fn shape(&self) -> &[usize] {
        self.lazy.shape()
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.lazy.ndim()
    }

    /// Element dtype.
    pub fn dtype(&self) -> DType {
        self.lazy.dtype()
    }

    /// The wrapped lazy value.
    pub fn lazy(&self) -> &A {
        &self.lazy
    }

    /// The shared executor.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Load configuration applied on submit.
    pub fn config(&self) -> LoadConfig {
        self.config
    }

    fn derive(&self, lazy: A) -> Self {
        Self {
            lazy,
            executor: Arc::clone(&self.executor),
            config: self.config,
        }
    }

    /// Compose a selection. No computation happens.
    pub fn slice(&self, selector: &Selector) -> Result<Self, SelectorError> {
        Ok(self.derive(self.lazy.slice(selector)?))
    }

    /// Compose an axis permutation. No computation happens.
    pub fn transpose(&self, order: &[usize]) -> Result<Self, SelectorError> {
        Ok(self.derive(self.lazy.transpose(order)?))
    }

    /// Schedule realization on the executor.
    ///
    /// Each call enqueues one independent job and never blocks. The simulated
    /// latency, if configured, is slept on the worker before computing.
    pub fn submit(&self) -> LoadHandle<ArrayD<A::Elem>> {
        let lazy = self.lazy.clone();
        let latency = self.config.simulated_latency;

        let handle = executor::submit(self.executor.as_ref(), move || {
            if let Some(latency) = latency {
                std::thread::sleep(latency);
            }
            lazy.compute()
        });

        debug!(
            handle = handle.id(),
            shape = ?self.shape(),
            dtype = %self.dtype(),
            "submitted realization"
        );
        handle
    }
}

impl<A: LazyArray> fmt::Debug for LazySource<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySource")
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .field("config", &self.config)
            .finish()
    }
}
