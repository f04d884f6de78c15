//! Loading strategies.

use tracing::trace;

use crate::array::LazyArray;
use crate::error::SliceError;

use super::data::SliceData;

/// A strategy for turning a slice's pending data into concrete data.
///
/// The layer asks each loader whether it [`matches`](SliceLoader::matches) a
/// slice and hands the slice to the first one that does.
pub trait SliceLoader<A: LazyArray>: Send + Sync {
    /// Try to finish loading `slice` without blocking on pending work.
    ///
    /// Returns `true` if the data is now concrete, `false` if the caller
    /// should check back later.
    fn load(&self, slice: &SliceData<A>) -> Result<bool, SliceError>;

    /// Whether this strategy handles `slice`.
    fn matches(&self, slice: &SliceData<A>) -> bool;
}

/// Polls readiness and finishes the load synchronously once the worker is done.
///
/// Never submits work itself (the first readiness check does that) and never
/// cancels. The layer is notified with `sync = true` only when this loader
/// performs the transition to ready; a slice the worker already published,
/// or one loaded by an earlier call, is not announced again.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageLoader;

impl ImageLoader {
    /// Create the loader.
    pub fn new() -> Self {
        Self
    }
}

impl<A: LazyArray> SliceLoader<A> for ImageLoader {
    fn load(&self, slice: &SliceData<A>) -> Result<bool, SliceError> {
        if !slice.is_ready() {
            trace!(slice = slice.id(), "not ready yet");
            return Ok(false);
        }

        if slice.publish()? {
            slice.notify_loaded(true);
        }
        Ok(true)
    }

    fn matches(&self, _slice: &SliceData<A>) -> bool {
        true
    }
}
