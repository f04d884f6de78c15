//! Test utilities for integration tests.
//!
//! This module provides a recording layer, a panicking layer, a lazy array
//! that can fail or panic on compute, and helpers for building a small test
//! volume.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use ndarray::{Array3, ArrayD, IxDyn};

use slice_loader::array::{validate_axis_order, AxisSelection, LazyArray, LazyExpr, Selector};
use slice_loader::error::{LoadError, SelectorError};
use slice_loader::executor::Executor;
use slice_loader::slice::{LazySource, SliceData, SliceLayer};

// =============================================================================
// Recording Layer
// =============================================================================

/// A layer that records every notification as `(slice id, sync)`.
#[derive(Default)]
pub struct RecordingLayer {
    events: Mutex<Vec<(u64, bool)>>,
    changed: Condvar,
}

impl RecordingLayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(u64, bool)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Block until at least `count` notifications arrived or `timeout` passed.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().unwrap();
        while events.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            events = self.changed.wait_timeout(events, remaining).unwrap().0;
        }
        true
    }
}

impl<A: LazyArray> SliceLayer<A> for RecordingLayer {
    fn on_data_loaded(&self, slice: &SliceData<A>, sync: bool) {
        assert!(slice.image().is_some(), "notified before data was ready");
        self.events.lock().unwrap().push((slice.id(), sync));
        self.changed.notify_all();
    }
}

/// Weak owner handle for slices created in tests.
pub fn owner<A: LazyArray>(layer: &Arc<RecordingLayer>) -> Weak<dyn SliceLayer<A>> {
    let layer: Arc<dyn SliceLayer<A>> = layer.clone();
    Arc::downgrade(&layer)
}

// =============================================================================
// Test Volume
// =============================================================================

/// Value stored at `(z, y, x)` of the test volume.
pub fn voxel(z: usize, y: usize, x: usize) -> u32 {
    (z * 16 + y * 4 + x) as u32
}

/// The concrete (4, 4, 4) test volume.
pub fn cube() -> Array3<u32> {
    Array3::from_shape_fn((4, 4, 4), |(z, y, x)| voxel(z, y, x))
}

/// The (4, 4, 4) test volume as a lazy source, counting generated elements.
pub fn volume(executor: Arc<dyn Executor>, generated: Arc<AtomicUsize>) -> LazySource<LazyExpr<u32>> {
    let lazy = LazyExpr::from_fn(vec![4, 4, 4], move |idx: &[usize]| {
        generated.fetch_add(1, Ordering::SeqCst);
        voxel(idx[0], idx[1], idx[2])
    });
    LazySource::new(lazy, executor)
}

/// Indices of plane `z` of the test volume.
pub fn plane(z: usize) -> Selector {
    Selector::new(vec![AxisSelection::Index(z)])
}

/// Concrete plane `z` of the test volume.
pub fn expected_plane(z: usize) -> ArrayD<u32> {
    cube().index_axis(ndarray::Axis(0), z).to_owned().into_dyn()
}

// =============================================================================
// Misbehaving Arrays
// =============================================================================

/// How a [`ScriptedArray`] misbehaves on compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breakage {
    Fails,
    Panics,
}

/// A lazy array of zeros that can be told to fail or panic on compute.
#[derive(Debug, Clone)]
pub struct ScriptedArray {
    shape: Vec<usize>,
    breakage: Option<Breakage>,
}

impl ScriptedArray {
    /// Computes to zeros.
    pub fn ok(shape: Vec<usize>) -> Self {
        Self {
            shape,
            breakage: None,
        }
    }

    /// Never computes successfully.
    pub fn broken(shape: Vec<usize>, breakage: Breakage) -> Self {
        Self {
            shape,
            breakage: Some(breakage),
        }
    }
}

impl LazyArray for ScriptedArray {
    type Elem = f32;

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn slice(&self, selector: &Selector) -> Result<Self, SelectorError> {
        Ok(Self {
            shape: selector.output_shape(&self.shape)?,
            breakage: self.breakage,
        })
    }

    fn transpose(&self, order: &[usize]) -> Result<Self, SelectorError> {
        validate_axis_order(order, self.shape.len())?;
        Ok(Self {
            shape: order.iter().map(|&axis| self.shape[axis]).collect(),
            breakage: self.breakage,
        })
    }

    fn compute(&self) -> Result<ArrayD<f32>, LoadError> {
        match self.breakage {
            None => Ok(ArrayD::zeros(IxDyn(&self.shape))),
            Some(Breakage::Fails) => Err(LoadError::Compute("chunk store unreachable".to_string())),
            Some(Breakage::Panics) => panic!("codec crashed"),
        }
    }
}

// =============================================================================
// Misbehaving Layers
// =============================================================================

/// A layer whose notification handler panics after counting the call.
#[derive(Default)]
pub struct PanickingLayer {
    calls: AtomicUsize,
}

impl PanickingLayer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<A: LazyArray> SliceLayer<A> for PanickingLayer {
    fn on_data_loaded(&self, _slice: &SliceData<A>, _sync: bool) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("layer redraw failed");
    }
}
