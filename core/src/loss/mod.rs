//! Loss kernels and the objective function adapter.
//!
//! A [`LossKernel`] reduces a prediction block against ground truth into one global scalar,
//! and writes the elementwise gradient of that scalar. Values are accumulated in `f64` and
//! combined across ranks through the predictions' communicator, so every rank returns the
//! same value.
//!
//! Every operation validates the distribution of all matrices involved before touching any
//! element.

use crate::error::{Error, Result};
use crate::tensor::{DistMatrix, TensorElem};
use std::fmt::Debug;

pub mod cross_entropy;
pub mod mean_absolute_error;
pub mod mean_squared_error;
pub mod objective;

pub use cross_entropy::CrossEntropy;
pub use mean_absolute_error::MeanAbsoluteError;
pub use mean_squared_error::MeanSquaredError;
pub use objective::{ObjectiveFunction, ObjectiveStatistics};

/// Which gradient formula a loss kernel evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientMode {
    /// The derivative of the loss with respect to the predictions.
    #[default]
    Direct,
    /// `prediction - truth`: the combined gradient of a softmax followed by cross entropy,
    /// taken with respect to the softmax input.
    ///
    /// Only correct when the preceding layer is a softmax and ground truth is categorical.
    /// Kernels cannot verify either condition; the caller guarantees them.
    SoftmaxShortcut,
}

/// A reduction-based objective: one scalar value and its dense gradient.
pub trait LossKernel<T: TensorElem>: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// The loss over the whole distributed mini-batch.
    ///
    /// Blocks until every rank of the communicator has contributed its local part.
    fn value(&self, predictions: &DistMatrix<T>, ground_truth: &DistMatrix<T>) -> Result<f64>;

    /// Overwrites the local block of `gradient` with the loss gradient.
    fn gradient(
        &self,
        mode: GradientMode,
        predictions: &DistMatrix<T>,
        ground_truth: &DistMatrix<T>,
        gradient: &mut DistMatrix<T>,
    ) -> Result<()>;

    /// Whether [`GradientMode::SoftmaxShortcut`] is meaningful for this loss.
    fn supports_softmax_shortcut(&self) -> bool {
        false
    }
}

pub(crate) fn check_value_inputs<T: TensorElem>(
    predictions: &DistMatrix<T>,
    ground_truth: &DistMatrix<T>,
) -> Result<()> {
    predictions.check_same_distribution(ground_truth)
}

pub(crate) fn check_gradient_inputs<T: TensorElem>(
    predictions: &DistMatrix<T>,
    ground_truth: &DistMatrix<T>,
    gradient: &DistMatrix<T>,
) -> Result<()> {
    predictions.check_same_distribution(ground_truth)?;
    predictions.check_same_distribution(gradient)
}

pub(crate) fn shortcut_unsupported(name: &str) -> Error {
    Error::InvalidConfig(format!("{} does not support the softmax shortcut", name))
}

/// Divides a local sum by `count` and sums the result over all ranks.
///
/// An empty global matrix has a loss of zero.
pub(crate) fn reduce_normalized<T: TensorElem>(
    predictions: &DistMatrix<T>,
    local_sum: f64,
    count: usize,
) -> Result<f64> {
    let local = if count == 0 {
        0.0
    } else {
        local_sum / count as f64
    };
    predictions.all_reduce_sum(local)
}

/// Converts a scale factor into the element type.
pub(crate) fn element<T: TensorElem>(value: f64) -> Result<T> {
    T::from_f64(value)
        .ok_or_else(|| Error::InvalidConfig(format!("{} is not representable", value)))
}

/// `2 / global_height`, the gradient scale of the mean-error losses.
pub(crate) fn mean_error_scale<T: TensorElem>(predictions: &DistMatrix<T>) -> Result<T> {
    match predictions.height() {
        0 => Ok(T::zero()),
        height => element(2.0 / height as f64),
    }
}
