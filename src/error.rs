use thiserror::Error;

/// Errors raised when a selection or axis order does not fit an array's shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    /// Selector addresses more axes than the array has
    #[error("Rank mismatch: selector has {selector_rank} axes, array has {array_rank}")]
    RankMismatch {
        selector_rank: usize,
        array_rank: usize,
    },

    /// Integer index past the end of an axis
    #[error("Index {index} out of bounds for axis {axis} of length {len}")]
    IndexOutOfBounds { axis: usize, index: usize, len: usize },

    /// Range reaching past the end of an axis, or with start > stop
    #[error("Range {start}..{stop} out of bounds for axis {axis} of length {len}")]
    RangeOutOfBounds {
        axis: usize,
        start: usize,
        stop: usize,
        len: usize,
    },

    /// Range with a step of zero
    #[error("Zero step in range for axis {axis}")]
    ZeroStep { axis: usize },

    /// Transpose order that is not a permutation of the array's axes
    #[error("Invalid axis order {order:?} for array of rank {ndim}")]
    InvalidAxisOrder { order: Vec<usize>, ndim: usize },
}

/// Errors produced while realizing a lazy array
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The load was cancelled before it produced a value
    #[error("Load cancelled")]
    Cancelled,

    /// The lazy array's compute step failed
    #[error("Compute failed: {0}")]
    Compute(String),

    /// The compute step or a completion callback panicked
    #[error("Load panicked: {0}")]
    Panicked(String),
}

/// Errors returned by slice operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SliceError {
    /// Selection or axis order incompatible with the array
    #[error("Invalid selector: {0}")]
    InvalidSelector(#[from] SelectorError),

    /// Realizing the slice failed or was cancelled
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Operation not allowed in the slice's current state
    #[error("Cannot {operation} while slice is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Internal misuse of the slice state machine
    #[error("Invariant violation: {0}")]
    InvariantViolation(&'static str),
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
