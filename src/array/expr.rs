//! In-crate lazy array expression.
//!
//! [`LazyExpr`] records selections and transposes against a base (an
//! in-memory array or an index generator) and only evaluates the elements of
//! the final view when computed. Composition is cheap: the base is shared
//! behind an `Arc` and the op list is cloned.

use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayD, Dimension, IxDyn};

use super::selector::{validate_axis_order, ResolvedAxis, Selector};
use super::{Element, LazyArray};
use crate::error::{LoadError, SelectorError};

type Generator<T> = dyn Fn(&[usize]) -> T + Send + Sync;

#[derive(Clone)]
enum Base<T> {
    Array(Arc<ArrayD<T>>),
    Generated {
        shape: Vec<usize>,
        f: Arc<Generator<T>>,
    },
}

impl<T: Clone> Base<T> {
    fn shape(&self) -> &[usize] {
        match self {
            Base::Array(array) => array.shape(),
            Base::Generated { shape, .. } => shape,
        }
    }

    fn get(&self, index: &[usize]) -> T {
        match self {
            Base::Array(array) => array[index].clone(),
            Base::Generated { f, .. } => f(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Select(Vec<ResolvedAxis>),
    Transpose(Vec<usize>),
}

impl Op {
    /// Map an index in this op's output to an index in its input.
    fn source_index(&self, out: &[usize]) -> Vec<usize> {
        match self {
            Op::Select(axes) => {
                let mut kept = out.iter();
                axes.iter()
                    .map(|axis| match *axis {
                        ResolvedAxis::Fixed(i) => i,
                        ResolvedAxis::Strided { start, step, .. } => {
                            // Output rank equals the number of strided axes.
                            start + kept.next().copied().unwrap_or(0) * step
                        }
                    })
                    .collect()
            }
            Op::Transpose(order) => {
                let mut input = vec![0; order.len()];
                for (i, &axis) in order.iter().enumerate() {
                    input[axis] = out[i];
                }
                input
            }
        }
    }
}

/// A lazy N-dimensional array expression.
///
/// # Example
///
/// ```
/// use slice_loader::array::{AxisSelection, LazyArray, LazyExpr, Selector};
///
/// let volume = LazyExpr::from_fn(vec![4, 4, 4], |idx: &[usize]| (idx[0] * 16 + idx[1] * 4 + idx[2]) as u32);
/// let plane = volume
///     .slice(&Selector::new(vec![AxisSelection::Index(2)]))
///     .unwrap();
/// assert_eq!(plane.shape(), &[4, 4]);
///
/// let array = plane.compute().unwrap();
/// assert_eq!(array[&[1usize, 3][..]], 39);
/// ```
#[derive(Clone)]
pub struct LazyExpr<T> {
    base: Base<T>,
    ops: Vec<Op>,
    shape: Vec<usize>,
}

impl<T: Element> LazyExpr<T> {
    /// Wrap an in-memory array.
    pub fn from_array(array: ArrayD<T>) -> Self {
        let shape = array.shape().to_vec();
        Self {
            base: Base::Array(Arc::new(array)),
            ops: Vec::new(),
            shape,
        }
    }

    /// Lazily generate each element from its index.
    pub fn from_fn<F>(shape: Vec<usize>, f: F) -> Self
    where
        F: Fn(&[usize]) -> T + Send + Sync + 'static,
    {
        Self {
            base: Base::Generated {
                shape: shape.clone(),
                f: Arc::new(f),
            },
            ops: Vec::new(),
            shape,
        }
    }

    /// Shape of the underlying base, before any composed ops.
    pub fn base_shape(&self) -> &[usize] {
        self.base.shape()
    }

    /// Number of ops composed onto the base.
    pub fn depth(&self) -> usize {
        self.ops.len()
    }

    fn with_op(&self, op: Op, shape: Vec<usize>) -> Self {
        let mut ops = self.ops.clone();
        ops.push(op);
        Self {
            base: self.base.clone(),
            ops,
            shape,
        }
    }

    fn base_index(&self, out: &[usize]) -> Vec<usize> {
        self.ops
            .iter()
            .rev()
            .fold(out.to_vec(), |index, op| op.source_index(&index))
    }
}

impl<T: Element> LazyArray for LazyExpr<T> {
    type Elem = T;

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn slice(&self, selector: &Selector) -> Result<Self, SelectorError> {
        let axes = selector.resolve(&self.shape)?;
        let shape = selector.output_shape(&self.shape)?;
        Ok(self.with_op(Op::Select(axes), shape))
    }

    fn transpose(&self, order: &[usize]) -> Result<Self, SelectorError> {
        validate_axis_order(order, self.shape.len())?;
        let shape = order.iter().map(|&axis| self.shape[axis]).collect();
        Ok(self.with_op(Op::Transpose(order.to_vec()), shape))
    }

    fn compute(&self) -> Result<ArrayD<T>, LoadError> {
        Ok(ArrayD::from_shape_fn(IxDyn(&self.shape), |idx| {
            self.base.get(&self.base_index(idx.slice()))
        }))
    }
}

impl<T> fmt::Debug for LazyExpr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match &self.base {
            Base::Array(_) => "array",
            Base::Generated { .. } => "generated",
        };
        f.debug_struct("LazyExpr")
            .field("base", &base)
            .field("shape", &self.shape)
            .field("ops", &self.ops)
            .finish()
    }
}
