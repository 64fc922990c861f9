use super::{check_gradient_inputs, check_value_inputs, GradientMode, LossKernel};
use crate::error::Result;
use crate::tensor::{DistMatrix, TensorElem};
use distnn_kernels::{
    cpu_cross_entropy_gradient, cpu_cross_entropy_sum, cpu_softmax_shortcut_gradient,
};
use tracing::trace;

/// Categorical cross entropy, averaged over the mini-batch.
///
/// `value = -1/global_width * sum(truth * ln(prediction))`
///
/// Each column of `predictions` and `ground_truth` is expected to be a probability
/// distribution. That is not checked. Entries with zero truth are skipped in the value and
/// receive a zero direct gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl CrossEntropy {
    pub const NAME: &'static str = "cross entropy";

    pub fn new() -> Self {
        Self
    }
}

impl<T: TensorElem> LossKernel<T> for CrossEntropy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn value(&self, predictions: &DistMatrix<T>, ground_truth: &DistMatrix<T>) -> Result<f64> {
        check_value_inputs(predictions, ground_truth)?;
        let local_sum = cpu_cross_entropy_sum(
            predictions.locked_matrix().data(),
            ground_truth.locked_matrix().data(),
        )?;
        let mini_batch_size = predictions.width();
        trace!(local_sum, mini_batch_size, "cross entropy reduction");
        super::reduce_normalized(predictions, local_sum, mini_batch_size)
    }

    fn gradient(
        &self,
        mode: GradientMode,
        predictions: &DistMatrix<T>,
        ground_truth: &DistMatrix<T>,
        gradient: &mut DistMatrix<T>,
    ) -> Result<()> {
        check_gradient_inputs(predictions, ground_truth, gradient)?;
        let pred = predictions.locked_matrix().data();
        let truth = ground_truth.locked_matrix().data();
        let out = gradient.matrix().data_mut();
        match mode {
            GradientMode::Direct => cpu_cross_entropy_gradient(pred, truth, out)?,
            GradientMode::SoftmaxShortcut => cpu_softmax_shortcut_gradient(pred, truth, out)?,
        }
        Ok(())
    }

    fn supports_softmax_shortcut(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Mat;

    #[test]
    fn test_one_hot_value() {
        let pred = DistMatrix::single(Mat::<f64>::from_rows(&[&[0.7], &[0.3]]).unwrap());
        let truth = DistMatrix::single(Mat::<f64>::from_rows(&[&[1.0], &[0.0]]).unwrap());
        let value = CrossEntropy.value(&pred, &truth).unwrap();
        assert!((value + 0.7f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_value_averages_over_columns() {
        let pred =
            DistMatrix::single(Mat::<f64>::from_rows(&[&[0.5, 0.25], &[0.5, 0.75]]).unwrap());
        let truth =
            DistMatrix::single(Mat::<f64>::from_rows(&[&[1.0, 0.0], &[0.0, 1.0]]).unwrap());
        let value = CrossEntropy.value(&pred, &truth).unwrap();
        let expected = -(0.5f64.ln() + 0.75f64.ln()) / 2.0;
        assert!((value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_prediction_with_zero_truth_is_finite() {
        let pred = DistMatrix::single(Mat::<f32>::from_rows(&[&[1.0], &[0.0]]).unwrap());
        let truth = DistMatrix::single(Mat::<f32>::from_rows(&[&[1.0], &[0.0]]).unwrap());
        assert_eq!(CrossEntropy.value(&pred, &truth).unwrap(), 0.0);

        let mut grad = pred.zeros_like();
        CrossEntropy
            .gradient(GradientMode::Direct, &pred, &truth, &mut grad)
            .unwrap();
        assert_eq!(grad.locked_matrix().data(), &[-1.0, 0.0]);
    }
}
