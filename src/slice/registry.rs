//! Slice registry for the owning layer.
//!
//! The registry provides:
//! - LRU-bounded storage of slices keyed by their indices
//! - Explicit cancellation of every slice it lets go of (replaced, evicted,
//!   superseded, removed or cleared)
//!
//! Dropping a slice's last handle would cancel it anyway; the registry cancels
//! eagerly so a superseded load is dropped even while some other component
//! still holds a handle to it.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::debug;

use crate::array::{LazyArray, Selector};

use super::data::{LoadState, SliceData};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of slices kept.
pub const DEFAULT_SLICE_CAPACITY: usize = 16;

// =============================================================================
// SliceRegistry
// =============================================================================

/// Slices owned by one layer, keyed by indices.
pub struct SliceRegistry<A: LazyArray> {
    slices: Mutex<LruCache<Selector, SliceData<A>>>,
}

impl<A: LazyArray> Default for SliceRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: LazyArray> SliceRegistry<A> {
    /// Create a registry holding up to [`DEFAULT_SLICE_CAPACITY`] slices.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SLICE_CAPACITY)
    }

    /// Create a registry holding up to `capacity` slices (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            slices: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<Selector, SliceData<A>>> {
        self.slices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a slice and mark it most recently used.
    pub fn get(&self, indices: &Selector) -> Option<SliceData<A>> {
        self.lock().get(indices).cloned()
    }

    /// Look up a slice without touching its recency.
    pub fn peek(&self, indices: &Selector) -> Option<SliceData<A>> {
        self.lock().peek(indices).cloned()
    }

    /// Whether a slice is stored under `indices`.
    pub fn contains(&self, indices: &Selector) -> bool {
        self.lock().contains(indices)
    }

    /// Store `slice` under its indices.
    ///
    /// A different slice previously stored under the same indices, or the
    /// least recently used slice evicted to make room, is cancelled and
    /// returned.
    pub fn insert(&self, slice: SliceData<A>) -> Option<SliceData<A>> {
        let displaced = self.lock().push(slice.indices().clone(), slice.clone());
        let (_, old) = displaced?;
        if old.same_slice(&slice) {
            return None;
        }

        debug!(
            slice = old.id(),
            indices = %old.indices(),
            replaced_by = slice.id(),
            "releasing displaced slice"
        );
        old.cancel();
        Some(old)
    }

    /// Make `slice` the current one.
    ///
    /// Every other slice still waiting for its data is cancelled and removed,
    /// then `slice` is inserted. Ready slices stay cached. Returns the slices
    /// that were released.
    pub fn supersede(&self, slice: SliceData<A>) -> Vec<SliceData<A>> {
        let mut released: Vec<SliceData<A>> = {
            let mut slices = self.lock();
            let stale: Vec<Selector> = slices
                .iter()
                .filter(|(indices, other)| {
                    *indices != slice.indices() && other.load_state() != LoadState::Ready
                })
                .map(|(indices, _)| indices.clone())
                .collect();
            stale
                .iter()
                .filter_map(|indices| slices.pop(indices))
                .collect()
        };

        for old in &released {
            debug!(
                slice = old.id(),
                indices = %old.indices(),
                superseded_by = slice.id(),
                "cancelling superseded slice"
            );
            old.cancel();
        }

        released.extend(self.insert(slice));
        released
    }

    /// Remove and cancel the slice stored under `indices`.
    pub fn remove(&self, indices: &Selector) -> Option<SliceData<A>> {
        let slice = self.lock().pop(indices)?;
        slice.cancel();
        Some(slice)
    }

    /// Remove and cancel every slice.
    pub fn clear(&self) {
        let slices: Vec<SliceData<A>> = {
            let mut cache = self.lock();
            let mut drained = Vec::with_capacity(cache.len());
            while let Some((_, slice)) = cache.pop_lru() {
                drained.push(slice);
            }
            drained
        };
        for slice in &slices {
            slice.cancel();
        }
        debug!(count = slices.len(), "registry cleared");
    }

    /// Number of slices stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no slices are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of slices kept.
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }
}
