use super::{
    check_gradient_inputs, check_value_inputs, mean_error_scale, reduce_normalized,
    shortcut_unsupported, GradientMode, LossKernel,
};
use crate::error::Result;
use crate::tensor::{DistMatrix, TensorElem};
use distnn_kernels::{cpu_squared_error_gradient, cpu_squared_error_sum};
use tracing::trace;

/// Mean of `(truth - prediction)^2` over every element of the global matrix.
///
/// Gradient: `2 * (prediction - truth) / global_height`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    pub const NAME: &'static str = "mean squared error";

    pub fn new() -> Self {
        Self
    }
}

impl<T: TensorElem> LossKernel<T> for MeanSquaredError {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn value(&self, predictions: &DistMatrix<T>, ground_truth: &DistMatrix<T>) -> Result<f64> {
        check_value_inputs(predictions, ground_truth)?;
        let local_sum = cpu_squared_error_sum(
            predictions.locked_matrix().data(),
            ground_truth.locked_matrix().data(),
        )?;
        let count = predictions.height() * predictions.width();
        trace!(local_sum, count, "mean squared error reduction");
        reduce_normalized(predictions, local_sum, count)
    }

    fn gradient(
        &self,
        mode: GradientMode,
        predictions: &DistMatrix<T>,
        ground_truth: &DistMatrix<T>,
        gradient: &mut DistMatrix<T>,
    ) -> Result<()> {
        if mode == GradientMode::SoftmaxShortcut {
            return Err(shortcut_unsupported(Self::NAME));
        }
        check_gradient_inputs(predictions, ground_truth, gradient)?;
        let scale = mean_error_scale(predictions)?;
        cpu_squared_error_gradient(
            predictions.locked_matrix().data(),
            ground_truth.locked_matrix().data(),
            scale,
            gradient.matrix().data_mut(),
        )?;
        Ok(())
    }
}
