//! # Slice Loader
//!
//! Asynchronous, cancellable loading of slices from large lazy arrays.
//!
//! A viewer showing an n-dimensional array that is too large, too slow or too
//! remote to realize eagerly asks for one slice at a time. This library keeps
//! the render loop responsive: realization runs on a shared executor, the
//! render loop polls readiness without blocking, and slices the user has
//! scrolled past are cancelled before they waste a worker.
//!
//! ## Features
//!
//! - **Lazy submission**: nothing is computed until the first readiness check
//! - **At-most-once loads**: concurrent readiness checks submit exactly once
//! - **Cancellation**: pending loads are dropped, running loads are discarded
//! - **Deferred transpose**: an unsubmitted slice composes the transpose lazily
//! - **Push notification**: the owning layer hears about each completed load
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`array`] - Lazy array interface, selectors and an in-crate expression type
//! - [`executor`] - Executors and cancellable load handles
//! - [`slice`] - Per-slice state machine, loader strategy and registry
//! - [`config`] - Load configuration and CLI types
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use slice_loader::{AxisSelection, LazyExpr, LazySource, Selector, SliceData, TokioExecutor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = Arc::new(TokioExecutor::current().unwrap());
//!     let volume = LazyExpr::from_fn(vec![512, 512, 512], |idx: &[usize]| idx[0] as f32);
//!     let root = LazySource::new(volume, executor);
//!
//!     let indices = Selector::new(vec![AxisSelection::Index(100)]);
//!     let slice = SliceData::detached(indices.clone(), root.slice(&indices).unwrap(), None);
//!
//!     // Submits on first call; poll from the render loop.
//!     while !slice.is_ready() {
//!         tokio::task::yield_now().await;
//!     }
//! }
//! ```

pub mod array;
pub mod config;
pub mod error;
pub mod executor;
pub mod slice;

// Re-export commonly used types
pub use array::{AxisSelection, DType, Element, LazyArray, LazyExpr, Selector};
pub use config::{Config, LoadConfig, OutputFormat};
pub use error::{LoadError, SelectorError, SliceError};
pub use executor::{Executor, HandleStatus, LoadHandle, QueuedExecutor, TokioExecutor};
pub use slice::{
    ImageLoader, LazySource, LoadState, SliceData, SliceLayer, SliceLoader, SliceRegistry,
    ThumbnailSource,
};
