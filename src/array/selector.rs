//! Per-axis selections.
//!
//! A [`Selector`] holds one [`AxisSelection`] per leading axis of an array.
//! Axes past the end of the selector are taken in full, so the empty selector
//! selects everything.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::SelectorError;

/// Selection along a single axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisSelection {
    /// The whole axis (`:`)
    Full,

    /// A single position; the axis is dropped from the result
    Index(usize),

    /// `start..stop` taking every `step`-th element
    Range {
        start: usize,
        stop: usize,
        step: usize,
    },
}

impl AxisSelection {
    /// Contiguous range selection.
    pub fn range(range: Range<usize>) -> Self {
        AxisSelection::Range {
            start: range.start,
            stop: range.end,
            step: 1,
        }
    }

    /// Strided range selection.
    pub fn stepped(range: Range<usize>, step: usize) -> Self {
        AxisSelection::Range {
            start: range.start,
            stop: range.end,
            step,
        }
    }

    /// Whether this selection keeps the axis in the result.
    pub fn keeps_axis(&self) -> bool {
        !matches!(self, AxisSelection::Index(_))
    }

    /// Check this selection against an axis of length `len`.
    pub(crate) fn resolve(&self, axis: usize, len: usize) -> Result<ResolvedAxis, SelectorError> {
        match *self {
            AxisSelection::Full => Ok(ResolvedAxis::Strided {
                start: 0,
                step: 1,
                len,
            }),
            AxisSelection::Index(index) => {
                if index >= len {
                    return Err(SelectorError::IndexOutOfBounds { axis, index, len });
                }
                Ok(ResolvedAxis::Fixed(index))
            }
            AxisSelection::Range { start, stop, step } => {
                if step == 0 {
                    return Err(SelectorError::ZeroStep { axis });
                }
                if start > stop || stop > len {
                    return Err(SelectorError::RangeOutOfBounds {
                        axis,
                        start,
                        stop,
                        len,
                    });
                }
                Ok(ResolvedAxis::Strided {
                    start,
                    step,
                    len: (stop - start).div_ceil(step),
                })
            }
        }
    }
}

impl fmt::Display for AxisSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisSelection::Full => f.write_str(":"),
            AxisSelection::Index(i) => write!(f, "{}", i),
            AxisSelection::Range {
                start,
                stop,
                step: 1,
            } => write!(f, "{}:{}", start, stop),
            AxisSelection::Range { start, stop, step } => {
                write!(f, "{}:{}:{}", start, stop, step)
            }
        }
    }
}

/// A selection validated against a concrete axis length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolvedAxis {
    /// Axis pinned to one position (dropped from the output)
    Fixed(usize),

    /// Output positions `0..len` map to `start + i * step`
    Strided { start: usize, step: usize, len: usize },
}

// =============================================================================
// Selector
// =============================================================================

/// Selection over the leading axes of an array.
///
/// Also serves as the identity of a displayed slice, so it is hashable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(Vec<AxisSelection>);

impl Selector {
    /// Create a selector from per-axis selections.
    pub fn new(axes: Vec<AxisSelection>) -> Self {
        Self(axes)
    }

    /// Selector that takes every axis in full.
    pub fn full() -> Self {
        Self(Vec::new())
    }

    /// Per-axis selections.
    pub fn axes(&self) -> &[AxisSelection] {
        &self.0
    }

    /// Number of explicitly selected axes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no axis is explicitly selected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate against `shape`, padding missing trailing axes with `Full`.
    pub(crate) fn resolve(&self, shape: &[usize]) -> Result<Vec<ResolvedAxis>, SelectorError> {
        if self.0.len() > shape.len() {
            return Err(SelectorError::RankMismatch {
                selector_rank: self.0.len(),
                array_rank: shape.len(),
            });
        }

        shape
            .iter()
            .enumerate()
            .map(|(axis, &len)| {
                self.0
                    .get(axis)
                    .unwrap_or(&AxisSelection::Full)
                    .resolve(axis, len)
            })
            .collect()
    }

    /// Shape of the result of applying this selector to `shape`.
    pub fn output_shape(&self, shape: &[usize]) -> Result<Vec<usize>, SelectorError> {
        Ok(self
            .resolve(shape)?
            .into_iter()
            .filter_map(|axis| match axis {
                ResolvedAxis::Fixed(_) => None,
                ResolvedAxis::Strided { len, .. } => Some(len),
            })
            .collect())
    }
}

impl From<Vec<AxisSelection>> for Selector {
    fn from(axes: Vec<AxisSelection>) -> Self {
        Self(axes)
    }
}

impl FromIterator<AxisSelection> for Selector {
    fn from_iter<I: IntoIterator<Item = AxisSelection>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, axis) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", axis)?;
        }
        f.write_str("]")
    }
}

/// Check that `order` is a permutation of `0..ndim`.
pub fn validate_axis_order(order: &[usize], ndim: usize) -> Result<(), SelectorError> {
    let invalid = || SelectorError::InvalidAxisOrder {
        order: order.to_vec(),
        ndim,
    };

    if order.len() != ndim {
        return Err(invalid());
    }

    let mut seen = vec![false; ndim];
    for &axis in order {
        if axis >= ndim || seen[axis] {
            return Err(invalid());
        }
        seen[axis] = true;
    }
    Ok(())
}
