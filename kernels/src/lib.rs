use num_traits::{Float, FromPrimitive, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_loss;
pub mod cpu_lrn;

pub use cpu_loss::{
    cpu_abs_error_sum, cpu_cross_entropy_gradient, cpu_cross_entropy_sum, cpu_sign_gradient,
    cpu_softmax_shortcut_gradient, cpu_squared_error_gradient, cpu_squared_error_sum,
};
pub use cpu_lrn::{cpu_lrn_backward, cpu_lrn_forward, LrnParams};

#[derive(Error, Debug, PartialEq)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Invalid channel partition: {rows} rows cannot be split into {channels} channels")]
    InvalidPartition { rows: usize, channels: usize },
    #[error("Invalid kernel parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// This mirrors `TensorElem` in the main crate to avoid circular dependencies.
pub trait KernelElem:
    Float + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive
{
}

impl<T> KernelElem for T where
    T: Float + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive
{
}

/// Checks that every buffer holds `expected` elements.
pub(crate) fn check_len(expected: usize, lens: &[usize]) -> Result<()> {
    if lens.iter().any(|&len| len != expected) {
        return Err(KernelError::ShapeMismatch {
            expected: vec![expected; lens.len()],
            got: lens.to_vec(),
        });
    }
    Ok(())
}
