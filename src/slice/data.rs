//! The per-slice loading state machine.
//!
//! ```text
//!   Waiting(no handle) ──is_ready()──▶ Waiting(handle) ──done callback──▶ Ready
//!          │                                  │         └──force_ready()──▶ Ready
//!          └────────── cancel() ──────────────┘
//!                (no further submission; in-flight result discarded)
//! ```
//!
//! The discriminant lives in an atomic phase word so `is_ready()` on the
//! render thread and the completion callback on a worker agree on who
//! submits (compare-and-swap `IDLE → SUBMITTING`) and who publishes the
//! concrete array (compare-and-swap `SUBMITTED → READY` under the payload
//! lock). Callers never flip the payload themselves.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ndarray::{ArrayD, IxDyn};
use tracing::{debug, error, trace, warn};

use crate::array::{validate_axis_order, LazyArray, Selector};
use crate::error::{panic_message, LoadError, SelectorError, SliceError};
use crate::executor::{HandleStatus, LoadHandle};

use super::source::LazySource;

static NEXT_SLICE_ID: AtomicU64 = AtomicU64::new(1);

const IDLE: u8 = 0;
const SUBMITTING: u8 = 1;
const SUBMITTED: u8 = 2;
const READY: u8 = 3;

// =============================================================================
// Collaborator Types
// =============================================================================

/// The owner of displayed slices, told when their data arrives.
///
/// `sync` is `false` when the notification comes from a worker thread after
/// an asynchronous load, and `true` when it comes from a synchronous load on
/// the caller's thread. Implementations must tolerate being called from a
/// thread they do not own and marshal back to their own thread if needed.
pub trait SliceLayer<A: LazyArray>: Send + Sync {
    /// Data for `slice` is now concrete.
    fn on_data_loaded(&self, slice: &SliceData<A>, sync: bool);
}

/// Placeholder owner for slices created without a layer.
struct NoLayer;

impl<A: LazyArray> SliceLayer<A> for NoLayer {
    fn on_data_loaded(&self, _slice: &SliceData<A>, _sync: bool) {}
}

/// Source for a slice's thumbnail.
///
/// Thumbnails are realized synchronously alongside the image rather than
/// through the executor.
pub enum ThumbnailSource<A: LazyArray> {
    /// Not yet computed
    Lazy(A),
    /// Computed
    Concrete(ArrayD<A::Elem>),
}

impl<A: LazyArray> ThumbnailSource<A> {
    fn ndim(&self) -> usize {
        match self {
            ThumbnailSource::Lazy(lazy) => lazy.ndim(),
            ThumbnailSource::Concrete(array) => array.ndim(),
        }
    }

    fn materialize(&mut self) -> Result<(), LoadError> {
        if let ThumbnailSource::Lazy(lazy) = self {
            *self = ThumbnailSource::Concrete(lazy.compute()?);
        }
        Ok(())
    }

    fn transpose(&mut self, order: &[usize]) -> Result<(), SelectorError> {
        match self {
            ThumbnailSource::Lazy(lazy) => *lazy = lazy.transpose(order)?,
            ThumbnailSource::Concrete(array) => *array = permuted(array, order),
        }
        Ok(())
    }
}

/// Transposed copy of `array`. `order` must already be validated.
fn permuted<T: Clone>(array: &ArrayD<T>, order: &[usize]) -> ArrayD<T> {
    array.view().permuted_axes(IxDyn(order)).to_owned()
}

enum Payload<A: LazyArray> {
    Waiting {
        handle: Option<LoadHandle<ArrayD<A::Elem>>>,
        source: LazySource<A>,
    },
    Ready {
        array: Arc<ArrayD<A::Elem>>,
    },
}

/// Coarse view of where a slice is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing submitted yet
    Unsubmitted,
    /// Realization submitted, not yet published
    Loading,
    /// Concrete array available
    Ready,
}

// =============================================================================
// SliceData
// =============================================================================

struct SliceInner<A: LazyArray> {
    id: u64,
    layer: Weak<dyn SliceLayer<A>>,
    indices: Selector,
    phase: AtomicU8,
    wanted: AtomicBool,
    payload: Mutex<Payload<A>>,
    thumbnail: Mutex<Option<ThumbnailSource<A>>>,
    failure: Mutex<Option<LoadError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: LazyArray> Drop for SliceInner<A> {
    fn drop(&mut self) {
        let payload = self
            .payload
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Payload::Waiting {
            handle: Some(handle),
            ..
        } = payload
        {
            if handle.cancel() {
                trace!(slice = self.id, handle = handle.id(), "cancelled load of dropped slice");
            }
        }
    }
}

/// One displayed slice whose image may still be loading.
///
/// `SliceData` is a cheap, cloneable handle; clones refer to the same slice.
/// The first [`is_ready`](Self::is_ready) call submits the realization. When
/// it completes, a worker publishes the concrete array, realizes the
/// thumbnail and notifies the owning [`SliceLayer`] with `sync = false`.
///
/// Dropping the last handle cancels a load that has not started.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use slice_loader::array::{AxisSelection, LazyExpr, Selector};
/// use slice_loader::executor::QueuedExecutor;
/// use slice_loader::slice::{LazySource, SliceData};
///
/// let executor = Arc::new(QueuedExecutor::new());
/// let volume = LazyExpr::from_fn(vec![4, 4, 4], |idx: &[usize]| idx[0] as f32);
/// let indices = Selector::new(vec![AxisSelection::Index(2)]);
/// let image = LazySource::new(volume, executor.clone()).slice(&indices).unwrap();
///
/// let slice = SliceData::detached(indices, image, None);
/// assert!(!slice.is_ready());
/// executor.run_pending();
/// assert!(slice.is_ready());
/// assert_eq!(slice.image().unwrap()[[0usize, 0].as_slice()], 2.0);
/// ```
pub struct SliceData<A: LazyArray> {
    inner: Arc<SliceInner<A>>,
}

impl<A: LazyArray> Clone for SliceData<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: LazyArray> SliceData<A> {
    /// Create a slice owned by `layer`.
    ///
    /// `image` should already be sliced to `indices`; nothing is submitted
    /// until the first [`is_ready`](Self::is_ready).
    pub fn new(
        layer: Weak<dyn SliceLayer<A>>,
        indices: Selector,
        image: LazySource<A>,
        thumbnail_source: Option<ThumbnailSource<A>>,
    ) -> Self {
        let id = NEXT_SLICE_ID.fetch_add(1, Ordering::Relaxed);
        trace!(slice = id, indices = %indices, shape = ?image.shape(), "new slice");

        Self {
            inner: Arc::new(SliceInner {
                id,
                layer,
                indices,
                phase: AtomicU8::new(IDLE),
                wanted: AtomicBool::new(true),
                payload: Mutex::new(Payload::Waiting {
                    handle: None,
                    source: image,
                }),
                thumbnail: Mutex::new(thumbnail_source),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Create a slice with no owning layer; notifications are dropped.
    pub fn detached(
        indices: Selector,
        image: LazySource<A>,
        thumbnail_source: Option<ThumbnailSource<A>>,
    ) -> Self {
        let layer: Weak<dyn SliceLayer<A>> = Weak::<NoLayer>::new();
        Self::new(layer, indices, image, thumbnail_source)
    }

    /// Process-unique id, used in log events.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The indices identifying this slice within the full array.
    pub fn indices(&self) -> &Selector {
        &self.inner.indices
    }

    /// Whether `other` is a handle to the same slice.
    pub fn same_slice(&self, other: &SliceData<A>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The owning layer, if it is still alive.
    pub fn layer(&self) -> Option<Arc<dyn SliceLayer<A>>> {
        self.inner.layer.upgrade()
    }

    /// Lifecycle stage.
    pub fn load_state(&self) -> LoadState {
        match self.inner.phase.load(Ordering::Acquire) {
            IDLE => LoadState::Unsubmitted,
            READY => LoadState::Ready,
            _ => LoadState::Loading,
        }
    }

    /// Whether [`cancel`](Self::cancel) took effect on this slice.
    pub fn is_cancelled(&self) -> bool {
        !self.inner.wanted.load(Ordering::Acquire)
    }

    /// Status of the submitted handle, if any.
    pub fn handle_status(&self) -> Option<HandleStatus> {
        match &*lock(&self.inner.payload) {
            Payload::Waiting {
                handle: Some(handle),
                ..
            } => Some(handle.status()),
            _ => None,
        }
    }

    /// The failure recorded by the completion callback, if any.
    pub fn failure(&self) -> Option<LoadError> {
        lock(&self.inner.failure).clone()
    }

    /// Shape of the image, concrete or pending.
    pub fn shape(&self) -> Vec<usize> {
        match &*lock(&self.inner.payload) {
            Payload::Waiting { source, .. } => source.shape().to_vec(),
            Payload::Ready { array } => array.shape().to_vec(),
        }
    }

    /// The concrete image, once ready.
    pub fn image(&self) -> Option<Arc<ArrayD<A::Elem>>> {
        match &*lock(&self.inner.payload) {
            Payload::Ready { array } => Some(Arc::clone(array)),
            Payload::Waiting { .. } => None,
        }
    }

    /// The concrete thumbnail, once realized.
    pub fn thumbnail(&self) -> Option<ArrayD<A::Elem>> {
        match &*lock(&self.inner.thumbnail) {
            Some(ThumbnailSource::Concrete(array)) => Some(array.clone()),
            _ => None,
        }
    }

    /// Readiness check, and the trigger for lazy submission.
    ///
    /// Returns `true` once the image is concrete, or once the submitted
    /// handle is done (including failed or cancelled handles, which
    /// [`force_ready`](Self::force_ready) then reports). The first call on an
    /// unsubmitted slice submits the realization and reports its progress.
    /// Never blocks on the load and submits at most once per slice, however
    /// many threads call it. A cancelled slice never submits.
    ///
    /// If the executor finishes the job before the completion callback is
    /// installed, the callback runs inline on the calling thread: the image is
    /// published, a lazy thumbnail is computed and the layer is notified (with
    /// `sync = false`) before this call returns.
    pub fn is_ready(&self) -> bool {
        loop {
            match self.inner.phase.load(Ordering::Acquire) {
                READY => return true,
                SUBMITTED => return self.handle_done(),
                SUBMITTING => return false,
                _ => {
                    if !self.inner.wanted.load(Ordering::Acquire) {
                        return false;
                    }
                    if self
                        .inner
                        .phase
                        .compare_exchange(IDLE, SUBMITTING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        trace!(slice = self.id(), "first readiness check, submitting");
                        self.trigger_load();
                    }
                }
            }
        }
    }

    fn handle_done(&self) -> bool {
        match &*lock(&self.inner.payload) {
            Payload::Ready { .. } => true,
            Payload::Waiting {
                handle: Some(handle),
                ..
            } => handle.is_done(),
            Payload::Waiting { handle: None, .. } => false,
        }
    }

    /// Submit the realization and install the completion callback.
    ///
    /// Only the thread that won `IDLE → SUBMITTING` gets here.
    fn trigger_load(&self) {
        let handle = {
            let mut payload = lock(&self.inner.payload);
            match &mut *payload {
                Payload::Waiting { handle: slot, source } if slot.is_none() => {
                    // cancel() clears `wanted` before taking this lock.
                    if !self.inner.wanted.load(Ordering::Acquire) {
                        self.inner.phase.store(IDLE, Ordering::Release);
                        return;
                    }
                    let handle = source.submit();
                    *slot = Some(handle.clone());
                    self.inner.phase.store(SUBMITTED, Ordering::Release);
                    handle
                }
                Payload::Waiting { .. } => {
                    self.inner.phase.store(SUBMITTED, Ordering::Release);
                    return;
                }
                Payload::Ready { .. } => {
                    self.inner.phase.store(READY, Ordering::Release);
                    return;
                }
            }
        };

        debug!(
            slice = self.id(),
            handle = handle.id(),
            indices = %self.indices(),
            "slice load submitted"
        );

        let slice = Arc::downgrade(&self.inner);
        handle.add_done_callback(move |handle| match slice.upgrade() {
            Some(inner) => SliceData { inner }.on_load_complete(handle),
            None => trace!(handle = handle.id(), "slice dropped before its load finished"),
        });
    }

    /// Completion callback body. Runs on the worker that finished the load.
    fn on_load_complete(&self, handle: &LoadHandle<ArrayD<A::Elem>>) {
        if self.is_cancelled() {
            debug!(
                slice = self.id(),
                handle = handle.id(),
                status = ?handle.status(),
                "discarding load of cancelled slice"
            );
            return;
        }

        let published = panic::catch_unwind(AssertUnwindSafe(|| self.publish()))
            .unwrap_or_else(|payload| {
                Err(LoadError::Panicked(panic_message(payload.as_ref())).into())
            });
        match published {
            Ok(_) => {}
            // Cancelled between the check above and publication.
            Err(SliceError::Load(LoadError::Cancelled)) if self.is_cancelled() => {
                debug!(slice = self.id(), "slice cancelled during load, skipping notification");
                return;
            }
            Err(err) => {
                error!(slice = self.id(), handle = handle.id(), error = %err, "slice load failed");
                self.record_failure(err);
                return;
            }
        }

        let notified = panic::catch_unwind(AssertUnwindSafe(|| self.notify_loaded(false)));
        if let Err(payload) = notified {
            error!(
                slice = self.id(),
                error = %panic_message(payload.as_ref()),
                "layer notification panicked"
            );
        }
    }

    fn record_failure(&self, err: SliceError) {
        let err = match err {
            SliceError::Load(err) => err,
            other => LoadError::Compute(other.to_string()),
        };
        *lock(&self.inner.failure) = Some(err);
    }

    /// Tell the owning layer the data is concrete. No-op if the layer is gone.
    pub(crate) fn notify_loaded(&self, sync: bool) {
        match self.inner.layer.upgrade() {
            Some(layer) => {
                trace!(slice = self.id(), sync, "notifying layer");
                layer.on_data_loaded(self, sync);
            }
            None => trace!(slice = self.id(), "owning layer dropped, not notifying"),
        }
    }

    /// Block until the submitted load finishes, then publish the concrete
    /// array and realize the thumbnail.
    ///
    /// Returns immediately if the slice is already ready.
    ///
    /// # Errors
    ///
    /// - [`SliceError::InvariantViolation`] if nothing has been submitted
    /// - [`SliceError::Load`] if the load failed, panicked or was cancelled,
    ///   or if an earlier completion callback recorded a failure. A slice
    ///   cancelled while its load was running reports
    ///   [`LoadError::Cancelled`] and never becomes ready.
    pub fn force_ready(&self) -> Result<(), SliceError> {
        self.publish().map(|_| ())
    }

    /// [`force_ready`](Self::force_ready), reporting whether this call
    /// performed the `Waiting → Ready` transition.
    pub(crate) fn publish(&self) -> Result<bool, SliceError> {
        if let Some(err) = self.failure() {
            return Err(err.into());
        }

        let handle = match &*lock(&self.inner.payload) {
            Payload::Ready { .. } => return Ok(false),
            Payload::Waiting { handle: None, .. } => {
                error!(slice = self.id(), "force_ready called before the load was submitted");
                return Err(SliceError::InvariantViolation(
                    "force_ready called before the load was submitted",
                ));
            }
            Payload::Waiting {
                handle: Some(handle),
                ..
            } => handle.clone(),
        };

        let array = handle.result()?;
        if self.is_cancelled() {
            return Err(LoadError::Cancelled.into());
        }
        if let Some(thumbnail) = lock(&self.inner.thumbnail).as_mut() {
            thumbnail.materialize()?;
        }

        // cancel() flips `wanted` under this lock, so the check and the
        // transition cannot interleave with it.
        let mut payload = lock(&self.inner.payload);
        if let Payload::Ready { .. } = &*payload {
            return Ok(false);
        }
        if self.is_cancelled() {
            debug!(slice = self.id(), handle = handle.id(), "not publishing cancelled slice");
            return Err(LoadError::Cancelled.into());
        }
        if self
            .inner
            .phase
            .compare_exchange(SUBMITTED, READY, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }
        *payload = Payload::Ready { array };
        debug!(slice = self.id(), handle = handle.id(), "slice ready");
        Ok(true)
    }

    /// Stop wanting this slice.
    ///
    /// Cancels a load that has not started; a running load finishes but its
    /// result is discarded and the layer is not notified. A slice that has not
    /// submitted yet never will. Idempotent, and a no-op on a ready slice.
    pub fn cancel(&self) {
        let payload = lock(&self.inner.payload);
        if let Payload::Ready { .. } = &*payload {
            return;
        }

        let was_wanted = self.inner.wanted.swap(false, Ordering::AcqRel);
        if let Payload::Waiting {
            handle: Some(handle),
            ..
        } = &*payload
        {
            if !was_wanted {
                return;
            }
            if handle.cancel() {
                debug!(slice = self.id(), handle = handle.id(), "cancelled pending load");
            } else {
                debug!(
                    slice = self.id(),
                    handle = handle.id(),
                    "load already running, result will be discarded"
                );
            }
        } else if was_wanted {
            trace!(slice = self.id(), "cancelled before submission");
        }
    }

    /// Reorder the image's axes; axis `i` of the result is axis `order[i]`.
    ///
    /// A ready image is transposed directly. An unsubmitted image has the
    /// transpose composed into its lazy source, so the load stays
    /// asynchronous. A concrete thumbnail is transposed immediately and a lazy
    /// one is composed.
    ///
    /// # Errors
    ///
    /// - [`SliceError::InvalidState`] if the load is already in flight
    /// - [`SliceError::InvalidSelector`] if `order` is not a permutation of
    ///   the image's (or thumbnail's) axes
    ///
    /// Nothing is modified when an error is returned.
    pub fn transpose(&self, order: &[usize]) -> Result<(), SliceError> {
        let mut payload = lock(&self.inner.payload);
        let mut thumbnail = lock(&self.inner.thumbnail);

        match &*payload {
            Payload::Ready { array } => validate_axis_order(order, array.ndim())?,
            Payload::Waiting {
                handle: None,
                source,
            } if self.inner.phase.load(Ordering::Acquire) == IDLE => {
                validate_axis_order(order, source.ndim())?
            }
            Payload::Waiting { .. } => {
                warn!(slice = self.id(), ?order, "transpose requested while loading");
                return Err(SliceError::InvalidState {
                    operation: "transpose",
                    state: "loading",
                });
            }
        }
        if let Some(thumbnail) = thumbnail.as_ref() {
            validate_axis_order(order, thumbnail.ndim())?;
        }

        match &mut *payload {
            Payload::Ready { array } => *array = Arc::new(permuted(array, order)),
            Payload::Waiting { source, .. } => *source = source.transpose(order)?,
        }
        if let Some(thumbnail) = thumbnail.as_mut() {
            thumbnail.transpose(order)?;
        }

        trace!(slice = self.id(), ?order, "slice transposed");
        Ok(())
    }
}

impl<A: LazyArray> fmt::Debug for SliceData<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceData")
            .field("id", &self.id())
            .field("indices", self.indices())
            .field("state", &self.load_state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
