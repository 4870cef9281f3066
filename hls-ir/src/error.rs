//! Error types for the loop rewriter and the interpreter

use crate::graph::OpId;
use thiserror::Error;

/// Reasons a loop nest cannot be made perfect. The nest is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PerfectionError {
    /// A loop in the nest holds more than one inner loop
    #[error("in function '{function}': nest rooted at {root:?} has parallel inner loops")]
    ParallelInnerLoops {
        /// Function holding the nest
        function: String,
        /// Outermost loop of the nest
        root: OpId,
    },

    #[error("in function '{function}': loop {loop_op:?} has a non-constant lower bound")]
    NonConstantLowerBound { function: String, loop_op: OpId },

    #[error("in function '{function}': loop {loop_op:?} has a non-constant upper bound")]
    NonConstantUpperBound { function: String, loop_op: OpId },

    /// A statement to be sunk produces a value used outside the innermost
    /// loop body, e.g. by an inner loop's bound
    #[error("in function '{function}': result of {op:?} is used by {user:?} outside the innermost loop body")]
    EscapingResult {
        function: String,
        op: OpId,
        user: OpId,
    },
}

/// Interpreter failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    /// Access outside a buffer's shape
    ///
    /// **Triggered by:** an index that is negative or not below the
    /// dimension size
    #[error("out-of-bounds access to buffer {buffer} at {indices:?}")]
    OutOfBounds { buffer: usize, indices: Vec<i64> },

    #[error("unsupported operation: {0}")]
    UnsupportedOp(String),

    #[error("type mismatch in {0}")]
    TypeMismatch(String),

    #[error("use of freed buffer {0}")]
    UseOfFreedBuffer(usize),

    #[error("expected {expected} arguments, found {found}")]
    ArgumentCount { expected: usize, found: usize },

    /// An affine map or set could not be evaluated (division by zero or
    /// overflow)
    #[error("cannot evaluate affine expression of {0:?}")]
    InvalidAffineEval(OpId),

    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u64),

    #[error("loop {0:?} has a non-positive step")]
    NonPositiveStep(OpId),
}

/// Interpreter result type
pub type InterpResult<T> = Result<T, InterpError>;
