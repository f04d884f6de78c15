//! Slice lifecycle integration tests.
//!
//! Tests verify:
//! - Lazy submission and single notification for a plane of a volume
//! - At most one submission under concurrent readiness checks
//! - Cancellation before and after submission
//! - Deferred and concrete transposes
//! - Failure and panic propagation out of the worker, including thumbnail
//!   failures and panicking layers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::IxDyn;

use slice_loader::array::{LazyExpr, Selector};
use slice_loader::error::{LoadError, SliceError};
use slice_loader::executor::{HandleStatus, QueuedExecutor, TokioExecutor};
use slice_loader::slice::{LazySource, LoadState, SliceData, SliceLayer, ThumbnailSource};

use super::test_utils::{
    expected_plane, owner, plane, volume, Breakage, PanickingLayer, RecordingLayer, ScriptedArray,
};

fn plane_slice(
    layer: &Arc<RecordingLayer>,
    executor: &Arc<QueuedExecutor>,
    generated: &Arc<AtomicUsize>,
    z: usize,
) -> SliceData<LazyExpr<u32>> {
    let indices = plane(z);
    let image = volume(executor.clone(), generated.clone())
        .slice(&indices)
        .unwrap();
    SliceData::new(owner(layer), indices, image, None)
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_plane_loads_once_and_notifies_async() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let generated = Arc::new(AtomicUsize::new(0));
    let slice = plane_slice(&layer, &executor, &generated, 2);

    assert!(!slice.is_ready());
    assert_eq!(executor.submitted(), 1);
    assert_eq!(generated.load(Ordering::SeqCst), 0);

    executor.run_pending();

    assert_eq!(layer.events(), vec![(slice.id(), false)]);
    assert!(slice.is_ready());
    assert_eq!(*slice.image().unwrap(), expected_plane(2));
    // Only the selected plane is generated.
    assert_eq!(generated.load(Ordering::SeqCst), 16);
}

#[test]
fn test_ready_slice_never_resubmits() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = plane_slice(&layer, &executor, &Arc::default(), 0);

    assert!(!slice.is_ready());
    executor.run_pending();
    for _ in 0..10 {
        assert!(slice.is_ready());
    }
    slice.force_ready().unwrap();

    assert_eq!(executor.submitted(), 1);
    assert_eq!(slice.load_state(), LoadState::Ready);
    assert_eq!(layer.count(), 1);
}

#[test]
fn test_concurrent_readiness_checks_submit_once() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = plane_slice(&layer, &executor, &Arc::default(), 1);

    std::thread::scope(|scope| {
        for _ in 0..16 {
            let slice = slice.clone();
            scope.spawn(move || slice.is_ready());
        }
    });

    assert_eq!(executor.submitted(), 1);
    executor.run_pending();
    assert!(slice.is_ready());
    assert_eq!(layer.count(), 1);
}

#[test]
fn test_force_ready_before_submission_fails() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = plane_slice(&layer, &executor, &Arc::default(), 0);

    let result = slice.force_ready();
    assert!(matches!(result, Err(SliceError::InvariantViolation(_))));
    assert_eq!(slice.load_state(), LoadState::Unsubmitted);
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancel_right_after_construction() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let generated = Arc::new(AtomicUsize::new(0));
    let slice = plane_slice(&layer, &executor, &generated, 3);

    slice.cancel();
    for _ in 0..3 {
        assert!(!slice.is_ready());
    }
    executor.run_pending();

    assert_eq!(executor.submitted(), 0);
    assert_eq!(generated.load(Ordering::SeqCst), 0);
    assert_eq!(layer.count(), 0);
}

#[test]
fn test_cancel_twice_and_after_completion() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());

    let pending = plane_slice(&layer, &executor, &Arc::default(), 0);
    assert!(!pending.is_ready());
    pending.cancel();
    pending.cancel();
    assert_eq!(pending.handle_status(), Some(HandleStatus::Cancelled));

    let done = plane_slice(&layer, &executor, &Arc::default(), 1);
    assert!(!done.is_ready());
    executor.run_pending();
    done.cancel();
    done.cancel();

    assert_eq!(layer.events(), vec![(done.id(), false)]);
    assert_eq!(*done.image().unwrap(), expected_plane(1));
    assert_eq!(
        pending.force_ready(),
        Err(SliceError::Load(LoadError::Cancelled))
    );
}

#[test]
fn test_dropped_slice_does_not_run() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let generated = Arc::new(AtomicUsize::new(0));

    let slice = plane_slice(&layer, &executor, &generated, 2);
    assert!(!slice.is_ready());
    drop(slice);
    executor.run_pending();

    assert_eq!(generated.load(Ordering::SeqCst), 0);
    assert_eq!(layer.count(), 0);
}

// =============================================================================
// Transpose
// =============================================================================

#[test]
fn test_transpose_before_load_matches_transposed_result() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = plane_slice(&layer, &executor, &Arc::default(), 1);

    slice.transpose(&[1, 0]).unwrap();
    assert!(!slice.is_ready());
    executor.run_pending();

    let expected = expected_plane(1).permuted_axes(IxDyn(&[1, 0]));
    assert_eq!(*slice.image().unwrap(), expected);
    assert_eq!(layer.count(), 1);
}

#[test]
fn test_transpose_ready_equals_direct_transpose() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = plane_slice(&layer, &executor, &Arc::default(), 3);
    assert!(!slice.is_ready());
    executor.run_pending();

    slice.transpose(&[1, 0]).unwrap();
    assert_eq!(
        *slice.image().unwrap(),
        expected_plane(3).reversed_axes()
    );
    // Transposing back restores the original.
    slice.transpose(&[1, 0]).unwrap();
    assert_eq!(*slice.image().unwrap(), expected_plane(3));
}

#[test]
fn test_transpose_in_flight_is_rejected() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = plane_slice(&layer, &executor, &Arc::default(), 0);
    assert!(!slice.is_ready());

    let result = slice.transpose(&[1, 0]);
    assert!(matches!(result, Err(SliceError::InvalidState { .. })));
    assert_eq!(
        result.unwrap_err().to_string(),
        "Cannot transpose while slice is loading"
    );
}

// =============================================================================
// Failures
// =============================================================================

fn scripted_slice(
    layer: &Arc<RecordingLayer>,
    executor: &Arc<QueuedExecutor>,
    image: ScriptedArray,
    thumbnail: Option<ScriptedArray>,
) -> SliceData<ScriptedArray> {
    let source = LazySource::new(image, executor.clone());
    let indices = plane(0);
    let image = source.slice(&indices).unwrap();
    SliceData::new(owner(layer), indices, image, thumbnail.map(ThumbnailSource::Lazy))
}

fn broken_slice(
    layer: &Arc<RecordingLayer>,
    executor: &Arc<QueuedExecutor>,
    breakage: Breakage,
) -> SliceData<ScriptedArray> {
    scripted_slice(layer, executor, ScriptedArray::broken(vec![2, 3, 3], breakage), None)
}

#[test]
fn test_compute_failure_surfaces_as_load_error() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = broken_slice(&layer, &executor, Breakage::Fails);

    assert!(!slice.is_ready());
    executor.run_pending();

    assert!(slice.is_ready());
    assert_eq!(slice.load_state(), LoadState::Loading);
    assert_eq!(layer.count(), 0);
    assert!(matches!(slice.failure(), Some(LoadError::Compute(_))));
    // Deterministic on every call.
    for _ in 0..2 {
        assert!(matches!(
            slice.force_ready(),
            Err(SliceError::Load(LoadError::Compute(_)))
        ));
    }
}

#[test]
fn test_compute_panic_does_not_escape_worker() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = broken_slice(&layer, &executor, Breakage::Panics);

    assert!(!slice.is_ready());
    executor.run_pending();

    assert_eq!(slice.handle_status(), Some(HandleStatus::Failed));
    assert_eq!(
        slice.force_ready(),
        Err(SliceError::Load(LoadError::Panicked("codec crashed".to_string())))
    );
    assert_eq!(layer.count(), 0);
}

#[test]
fn test_thumbnail_failure_fails_the_slice() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let slice = scripted_slice(
        &layer,
        &executor,
        ScriptedArray::ok(vec![2, 3, 3]),
        Some(ScriptedArray::broken(vec![3, 3], Breakage::Fails)),
    );

    assert!(!slice.is_ready());
    executor.run_pending();

    // The image itself loaded; the slice is still not usable.
    assert_eq!(slice.handle_status(), Some(HandleStatus::Completed));
    assert!(matches!(slice.failure(), Some(LoadError::Compute(_))));
    for _ in 0..2 {
        assert!(matches!(
            slice.force_ready(),
            Err(SliceError::Load(LoadError::Compute(_)))
        ));
    }
    assert!(slice.image().is_none());
    assert!(slice.thumbnail().is_none());
    assert_eq!(layer.count(), 0);

    // The worker keeps serving other slices.
    let healthy = scripted_slice(&layer, &executor, ScriptedArray::ok(vec![2, 3, 3]), None);
    assert!(!healthy.is_ready());
    executor.run_pending();
    assert!(healthy.is_ready());
    assert_eq!(healthy.image().unwrap().shape(), &[3, 3]);
    assert_eq!(layer.events(), vec![(healthy.id(), false)]);
}

#[test]
fn test_panicking_layer_does_not_undo_publication() {
    let layer = Arc::new(PanickingLayer::default());
    let owner: Arc<dyn SliceLayer<ScriptedArray>> = layer.clone();
    let executor = Arc::new(QueuedExecutor::new());
    let indices = plane(1);
    let image = LazySource::new(ScriptedArray::ok(vec![2, 3, 3]), executor.clone())
        .slice(&indices)
        .unwrap();
    let slice = SliceData::new(Arc::downgrade(&owner), indices, image, None);

    assert!(!slice.is_ready());
    assert_eq!(executor.run_pending(), 1);

    assert_eq!(layer.calls(), 1);
    assert!(slice.is_ready());
    assert_eq!(slice.load_state(), LoadState::Ready);
    assert_eq!(slice.handle_status(), Some(HandleStatus::Completed));
    assert!(slice.failure().is_none());
    assert_eq!(slice.force_ready(), Ok(()));
    assert_eq!(slice.image().unwrap().shape(), &[3, 3]);

    // Already published, so nothing is redelivered.
    assert_eq!(layer.calls(), 1);
}

// =============================================================================
// Tokio Executor
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_tokio_executor_notifies_from_worker() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(TokioExecutor::current().unwrap());
    let generated = Arc::new(AtomicUsize::new(0));

    let slices: Vec<_> = (0..4)
        .map(|z| {
            let indices = plane(z);
            let image = volume(executor.clone(), generated.clone())
                .slice(&indices)
                .unwrap();
            SliceData::new(owner(&layer), indices, image, None)
        })
        .collect();

    for slice in &slices {
        slice.is_ready();
    }

    let waiter = layer.clone();
    let arrived = tokio::task::spawn_blocking(move || waiter.wait_for(4, Duration::from_secs(10)))
        .await
        .unwrap();
    assert!(arrived);

    for (z, slice) in slices.iter().enumerate() {
        assert!(slice.is_ready());
        assert_eq!(*slice.image().unwrap(), expected_plane(z));
    }
    assert!(layer.events().iter().all(|&(_, sync)| !sync));
    assert_eq!(generated.load(Ordering::SeqCst), 64);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_selector_loads_whole_volume() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(TokioExecutor::current().unwrap());
    let source = volume(executor, Arc::default());

    let slice = SliceData::new(owner(&layer), Selector::full(), source, None);
    slice.is_ready();

    let waiter = slice.clone();
    tokio::task::spawn_blocking(move || waiter.force_ready())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(slice.shape(), vec![4, 4, 4]);
    assert_eq!(
        *slice.image().unwrap(),
        super::test_utils::cube().into_dyn()
    );
}
