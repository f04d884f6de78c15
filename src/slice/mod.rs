//! Asynchronous slice loading.
//!
//! A layer displaying a large lazy array asks for one slice at a time. Each
//! slice owns its own load: the first readiness check submits the
//! realization to a shared executor, and the completion callback publishes
//! the concrete array and notifies the layer, so the render loop never blocks
//! on compute.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Layer (render thread)            │
//! │  SliceRegistry + SliceLoader strategy   │
//! └────────────────────┬────────────────────┘
//!                      │ is_ready / force_ready / cancel
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              SliceData                  │
//! │  (atomic phase, Waiting | Ready)        │
//! └──────────┬─────────────────────▲────────┘
//!            │ submit              │ done callback
//!            ▼                     │ (worker thread)
//! ┌─────────────────────────────────────────┐
//! │      LazySource ──▶ Executor            │
//! │            (LoadHandle)                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use slice_loader::array::{AxisSelection, LazyExpr, Selector};
//! use slice_loader::executor::QueuedExecutor;
//! use slice_loader::slice::{ImageLoader, LazySource, SliceData, SliceLayer, SliceLoader};
//!
//! #[derive(Default)]
//! struct Layer {
//!     loaded: Mutex<Vec<(u64, bool)>>,
//! }
//!
//! impl SliceLayer<LazyExpr<f32>> for Layer {
//!     fn on_data_loaded(&self, slice: &SliceData<LazyExpr<f32>>, sync: bool) {
//!         self.loaded.lock().unwrap().push((slice.id(), sync));
//!     }
//! }
//!
//! let executor = Arc::new(QueuedExecutor::new());
//! let volume = LazyExpr::from_fn(vec![4, 4, 4], |idx: &[usize]| idx.iter().sum::<usize>() as f32);
//! let root = LazySource::new(volume, executor.clone());
//!
//! let layer = Arc::new(Layer::default());
//! let owner: Arc<dyn SliceLayer<LazyExpr<f32>>> = layer.clone();
//! let indices = Selector::new(vec![AxisSelection::Index(1)]);
//! let slice = SliceData::new(Arc::downgrade(&owner), indices.clone(), root.slice(&indices)?, None);
//!
//! // Submits, but the worker has not run yet.
//! assert!(!ImageLoader.load(&slice)?);
//!
//! executor.run_pending();
//! assert!(ImageLoader.load(&slice)?);
//! assert_eq!(slice.image().unwrap().shape(), &[4, 4]);
//! assert_eq!(*layer.loaded.lock().unwrap(), vec![(slice.id(), false)]);
//! # Ok::<(), slice_loader::SliceError>(())
//! ```

mod data;
mod loader;
mod registry;
mod source;

pub use data::{LoadState, SliceData, SliceLayer, ThumbnailSource};
pub use loader::{ImageLoader, SliceLoader};
pub use registry::{SliceRegistry, DEFAULT_SLICE_CAPACITY};
pub use source::LazySource;
