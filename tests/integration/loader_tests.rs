//! Loader and registry integration tests.
//!
//! Tests verify:
//! - The image loader drives a slice from unsubmitted to ready without blocking
//! - A loaded slice is announced to its layer exactly once
//! - Superseding pending slices cancels their loads
//! - Thumbnails are realized alongside the image

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use slice_loader::array::{AxisSelection, LazyArray, LazyExpr, Selector};
use slice_loader::executor::QueuedExecutor;
use slice_loader::slice::{
    ImageLoader, LoadState, SliceData, SliceLoader, SliceRegistry, ThumbnailSource,
};

use super::test_utils::{expected_plane, owner, plane, volume, RecordingLayer};

#[test]
fn test_loader_polls_then_completes_synchronously() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let indices = plane(1);
    let image = volume(executor.clone(), Arc::default()).slice(&indices).unwrap();
    let slice = SliceData::new(owner(&layer), indices, image, None);
    let loader = ImageLoader::new();

    assert!(loader.matches(&slice));
    assert!(!loader.load(&slice).unwrap());
    assert!(!loader.load(&slice).unwrap());
    assert_eq!(executor.submitted(), 1);
    assert_eq!(layer.count(), 0);

    executor.run_pending();
    assert!(loader.load(&slice).unwrap());
    assert_eq!(*slice.image().unwrap(), expected_plane(1));

    // The worker already published, so the loader has nothing to announce.
    assert_eq!(layer.events(), vec![(slice.id(), false)]);
}

#[test]
fn test_thumbnail_realized_with_image() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let indices = plane(2);
    let image = volume(executor.clone(), Arc::default()).slice(&indices).unwrap();
    let thumbnail = image
        .lazy()
        .slice(&Selector::new(vec![
            AxisSelection::stepped(0..4, 2),
            AxisSelection::stepped(0..4, 2),
        ]))
        .unwrap();
    let slice = SliceData::new(
        owner(&layer),
        indices,
        image,
        Some(ThumbnailSource::Lazy(thumbnail)),
    );

    assert!(slice.thumbnail().is_none());
    assert!(!ImageLoader.load(&slice).unwrap());
    executor.run_pending();
    assert!(ImageLoader.load(&slice).unwrap());

    let thumbnail = slice.thumbnail().unwrap();
    assert_eq!(thumbnail.shape(), &[2, 2]);
    let full = expected_plane(2);
    assert_eq!(thumbnail[[1usize, 1].as_slice()], full[[2usize, 2].as_slice()]);
}

#[test]
fn test_scrolling_supersedes_pending_slices() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let generated = Arc::new(AtomicUsize::new(0));
    let root = volume(executor.clone(), generated.clone());
    let registry = SliceRegistry::with_capacity(8);
    let loader = ImageLoader::new();

    // Scroll through every plane before any worker runs.
    let mut shown = Vec::new();
    for z in 0..4 {
        let indices = plane(z);
        let slice = SliceData::new(owner(&layer), indices.clone(), root.slice(&indices).unwrap(), None);
        registry.supersede(slice.clone());
        assert!(!loader.load(&slice).unwrap());
        shown.push(slice);
    }

    assert_eq!(executor.submitted(), 4);
    assert_eq!(registry.len(), 1);
    assert!(shown[..3].iter().all(SliceData::is_cancelled));

    executor.run_pending();

    // Only the current plane was computed and delivered.
    assert_eq!(generated.load(Ordering::SeqCst), 16);
    assert!(loader.load(&shown[3]).unwrap());
    assert_eq!(layer.events(), vec![(shown[3].id(), false)]);
    assert!(shown[..3]
        .iter()
        .all(|slice| slice.load_state() == LoadState::Loading && slice.image().is_none()));
}

#[test]
fn test_registry_reuses_ready_slice() {
    let layer = RecordingLayer::new();
    let executor = Arc::new(QueuedExecutor::new());
    let root = volume(executor.clone(), Arc::default());
    let registry: SliceRegistry<LazyExpr<u32>> = SliceRegistry::new();

    let indices = plane(0);
    let slice = SliceData::new(owner(&layer), indices.clone(), root.slice(&indices).unwrap(), None);
    registry.supersede(slice.clone());
    assert!(!slice.is_ready());
    executor.run_pending();

    // Moving away keeps the ready plane cached.
    let next = SliceData::new(owner(&layer), plane(1), root.slice(&plane(1)).unwrap(), None);
    registry.supersede(next);

    let cached = registry.get(&indices).unwrap();
    assert!(cached.same_slice(&slice));
    assert!(cached.is_ready());
    assert_eq!(executor.submitted(), 1);
}
