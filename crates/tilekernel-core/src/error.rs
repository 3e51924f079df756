//! Error types for kernel submission and execution.

use std::any::Any;

use thiserror::Error;

/// Result type for tilekernel operations.
pub type Result<T> = std::result::Result<T, TileKernelError>;

/// Errors raised while building index spaces, submitting kernels or
/// executing them.
///
/// Errors detected before a kernel starts (bad ranges, size mismatches)
/// are returned synchronously from the submitting call. Errors raised
/// while work-items run are collected by the queue and only surface from
/// `wait_and_throw` / `throw_asynchronous` as [`TileKernelError::Async`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileKernelError {
    /// Range with a zero extent or an unsupported dimensionality.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Global range not divisible by the local range, or a work-group
    /// larger than the device allows.
    #[error("Invalid nd-range: {0}")]
    InvalidNdRange(String),

    /// Host data does not match the buffer or operand size.
    #[error("Size mismatch: expected {expected} elements, got {actual}")]
    SizeMismatch {
        /// Expected element count.
        expected: usize,
        /// Provided element count.
        actual: usize,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No device matches the selector.
    #[error("No device available for selector: {0}")]
    NoDevice(String),

    /// Local memory request larger than the device provides.
    #[error("Local memory exhausted: requested {requested} bytes, device has {available}")]
    OutOfLocalMemory {
        /// Bytes requested per work-group.
        requested: usize,
        /// Bytes available per work-group.
        available: usize,
    },

    /// A work-item panicked while the kernel was running.
    #[error("Kernel '{kernel}' panicked: {message}")]
    KernelPanicked {
        /// Kernel name.
        kernel: String,
        /// Panic message.
        message: String,
    },

    /// A work-item read local memory written by another work-item of its
    /// group without an intervening group barrier.
    #[error(
        "Barrier violation: work-item {reader} read local slot {slot} written by work-item {writer} before the group barrier"
    )]
    BarrierViolation {
        /// Local linear id of the reading work-item.
        reader: usize,
        /// Local linear id of the writing work-item.
        writer: usize,
        /// Linear index of the local memory slot.
        slot: usize,
    },

    /// `barrier()` was called in a launch without a group barrier.
    #[error("Group barrier unavailable: {0}")]
    BarrierUnavailable(String),

    /// Some work-items of a group finished without reaching a barrier the
    /// others are waiting at.
    #[error(
        "Barrier divergence: {arrived} of {parties} work-items reached the barrier, the rest exited"
    )]
    BarrierDivergence {
        /// Work-items waiting at the barrier.
        arrived: usize,
        /// Work-items in the group.
        parties: usize,
    },

    /// Another work-item of the group failed, releasing everyone waiting at
    /// the barrier.
    #[error("Work-group aborted: another work-item failed")]
    GroupAborted,

    /// Errors collected from kernel execution.
    #[error("{} asynchronous error(s), first: {}", .0.len(), first_message(.0))]
    Async(Vec<TileKernelError>),

    /// Worker pool or thread creation failed.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

fn first_message(errors: &[TileKernelError]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl TileKernelError {
    /// Create an invalid range error.
    pub fn invalid_range(msg: impl Into<String>) -> Self {
        Self::InvalidRange(msg.into())
    }

    /// Create an invalid nd-range error.
    pub fn invalid_nd_range(msg: impl Into<String>) -> Self {
        Self::InvalidNdRange(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(expected: usize, actual: usize) -> Self {
        Self::SizeMismatch { expected, actual }
    }

    /// Convert a caught panic payload into an error.
    ///
    /// Payloads raised with [`std::panic::panic_any`] carrying a
    /// `TileKernelError` are returned unchanged; string payloads become
    /// [`TileKernelError::KernelPanicked`].
    pub fn from_panic(kernel: &str, payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<TileKernelError>() {
            Ok(err) => return *err,
            Err(other) => other,
        };

        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self::KernelPanicked {
            kernel: kernel.to_string(),
            message,
        }
    }

    /// Returns the errors inside an [`TileKernelError::Async`], or the
    /// error itself otherwise.
    pub fn flatten(self) -> Vec<TileKernelError> {
        match self {
            Self::Async(errors) => errors,
            other => vec![other],
        }
    }

    /// Check if this error was raised while the kernel was executing.
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            Self::KernelPanicked { .. }
                | Self::BarrierViolation { .. }
                | Self::BarrierUnavailable(_)
                | Self::BarrierDivergence { .. }
                | Self::GroupAborted
                | Self::Async(_)
        )
    }
}
