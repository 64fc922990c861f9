//! Error type shared by every layer and objective function.
//!
//! Nothing here is transient: every variant is caused by configuration or by the caller's
//! inputs, and retrying without changing them fails the same way.

use distnn_kernels::KernelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Tensor shapes disagree with each other or with the layer's configuration.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// An element index is outside the local block.
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    /// The neuron count cannot be split evenly into channels.
    #[error("Invalid channel partition: {rows} rows cannot be split into {channels} channels")]
    InvalidPartition { rows: usize, channels: usize },
    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Accelerator execution was requested from a build that cannot provide it.
    #[error("Accelerator support not available: {0}")]
    AcceleratorUnsupported(String),
    /// The accelerator runtime reported a failure.
    #[error("Accelerator error: {0}")]
    Accelerator(String),
    /// A collective operation could not complete.
    #[error("Communication error: {0}")]
    Comm(String),
    /// A configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<KernelError> for Error {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::ShapeMismatch { expected, got } => Error::ShapeMismatch { expected, got },
            KernelError::InvalidPartition { rows, channels } => {
                Error::InvalidPartition { rows, channels }
            }
            KernelError::InvalidParameter(msg) => Error::InvalidConfig(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
