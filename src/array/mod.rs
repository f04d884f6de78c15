//! Lazy array abstraction.
//!
//! This module defines the interface the slice machinery needs from a lazy,
//! chunked or derived array engine, plus a small in-crate implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          LazySource / SliceData         │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            LazyArray Trait              │
//! │  (shape, dtype, slice, transpose,       │
//! │   compute → ndarray::ArrayD)            │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               LazyExpr                  │
//! │  (in-memory or generated base +         │
//! │   composed selection/transpose ops)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Nothing in this interface may trigger computation except
//! [`LazyArray::compute`].

mod expr;
mod selector;

pub use expr::LazyExpr;
pub use selector::{validate_axis_order, AxisSelection, Selector};

use std::fmt;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, SelectorError};

// =============================================================================
// Element Types
// =============================================================================

/// Element type of an array, named after the NumPy dtype it corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn itemsize(&self) -> usize {
        match self {
            DType::Uint8 | DType::Int8 => 1,
            DType::Uint16 | DType::Int16 => 2,
            DType::Uint32 | DType::Int32 | DType::Float32 => 4,
            DType::Uint64 | DType::Int64 | DType::Float64 => 8,
        }
    }

    /// NumPy-style name (e.g. `float32`).
    pub fn name(&self) -> &'static str {
        match self {
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Uint64 => "uint64",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar type that can be stored in a lazy array.
pub trait Element: Clone + fmt::Debug + Send + Sync + 'static {
    /// The dtype describing this element type.
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element! {
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
}

// =============================================================================
// LazyArray Trait
// =============================================================================

/// A lazily evaluated N-dimensional array.
///
/// Implementations compose operations into a new lazy value instead of
/// computing them. Only [`compute`](LazyArray::compute) does real work, and
/// it may be called from any worker thread.
pub trait LazyArray: Clone + Send + Sync + 'static {
    /// Element type of the realized array.
    type Elem: Element;

    /// Shape of the array this value would realize to.
    fn shape(&self) -> &[usize];

    /// Number of axes.
    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Element dtype.
    fn dtype(&self) -> DType {
        <Self::Elem as Element>::DTYPE
    }

    /// Compose a selection, returning a new lazy value.
    fn slice(&self, selector: &Selector) -> Result<Self, SelectorError>;

    /// Compose an axis permutation, returning a new lazy value.
    ///
    /// Axis `i` of the result is axis `order[i]` of `self`.
    fn transpose(&self, order: &[usize]) -> Result<Self, SelectorError>;

    /// Realize the array.
    fn compute(&self) -> Result<ArrayD<Self::Elem>, LoadError>;
}
