use super::{GradientMode, LossKernel};
use crate::error::{Error, Result};
use crate::tensor::{DistMatrix, TensorElem};
use tracing::debug;

/// Running record of the values an objective produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveStatistics {
    num_minibatches: usize,
    total: f64,
    last_value: Option<f64>,
}

impl ObjectiveStatistics {
    pub fn record(&mut self, value: f64) {
        self.num_minibatches += 1;
        self.total += value;
        self.last_value = Some(value);
    }

    pub fn num_minibatches(&self) -> usize {
        self.num_minibatches
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    /// Mean over every recorded mini-batch, `None` before the first one.
    pub fn mean_value(&self) -> Option<f64> {
        (self.num_minibatches > 0).then(|| self.total / self.num_minibatches as f64)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The uniform contract the training loop uses for any loss.
///
/// Owns one [`LossKernel`] plus the gradient mode it is evaluated in. The mode is chosen once
/// per training configuration; switching to [`GradientMode::SoftmaxShortcut`] is only allowed
/// for kernels that support it.
///
/// # Example
///
/// ```rust
/// use distnn::loss::{CrossEntropy, ObjectiveFunction};
/// use distnn::tensor::{DistMatrix, Mat};
///
/// let mut objective = ObjectiveFunction::<f64>::new(CrossEntropy);
/// objective.set_softmax_shortcut(true).unwrap();
///
/// let pred = DistMatrix::single(Mat::from_rows(&[&[0.7], &[0.3]]).unwrap());
/// let truth = DistMatrix::single(Mat::from_rows(&[&[1.0], &[0.0]]).unwrap());
/// let value = objective.compute_value(&pred, &truth).unwrap();
/// assert!((value + 0.7f64.ln()).abs() < 1e-12);
///
/// let grad = objective.compute_gradient(&pred, &truth).unwrap();
/// assert!((grad.get(0, 0).unwrap() + 0.3).abs() < 1e-12);
/// ```
#[derive(Debug)]
pub struct ObjectiveFunction<T: TensorElem> {
    kernel: Box<dyn LossKernel<T>>,
    mode: GradientMode,
    statistics: ObjectiveStatistics,
}

impl<T: TensorElem> ObjectiveFunction<T> {
    pub fn new(kernel: impl LossKernel<T> + 'static) -> Self {
        Self::from_boxed(Box::new(kernel))
    }

    pub fn from_boxed(kernel: Box<dyn LossKernel<T>>) -> Self {
        debug!(objective = kernel.name(), "created objective function");
        Self {
            kernel,
            mode: GradientMode::Direct,
            statistics: ObjectiveStatistics::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kernel.name()
    }

    pub fn gradient_mode(&self) -> GradientMode {
        self.mode
    }

    /// # Errors
    ///
    /// `Error::InvalidConfig` when asking for the softmax shortcut on a kernel without one.
    pub fn set_gradient_mode(&mut self, mode: GradientMode) -> Result<()> {
        if mode == GradientMode::SoftmaxShortcut && !self.kernel.supports_softmax_shortcut() {
            return Err(Error::InvalidConfig(format!(
                "{} does not support the softmax shortcut",
                self.kernel.name()
            )));
        }
        debug!(objective = self.kernel.name(), ?mode, "gradient mode set");
        self.mode = mode;
        Ok(())
    }

    pub fn set_softmax_shortcut(&mut self, enabled: bool) -> Result<()> {
        self.set_gradient_mode(if enabled {
            GradientMode::SoftmaxShortcut
        } else {
            GradientMode::Direct
        })
    }

    /// Evaluates the loss over the mini-batch and records it in the statistics.
    pub fn compute_value(
        &mut self,
        predictions: &DistMatrix<T>,
        ground_truth: &DistMatrix<T>,
    ) -> Result<f64> {
        let value = self.kernel.value(predictions, ground_truth)?;
        self.statistics.record(value);
        debug!(
            objective = self.kernel.name(),
            value,
            minibatch = self.statistics.num_minibatches(),
            "objective value"
        );
        Ok(value)
    }

    /// Returns a new gradient matrix distributed like `predictions`.
    pub fn compute_gradient(
        &self,
        predictions: &DistMatrix<T>,
        ground_truth: &DistMatrix<T>,
    ) -> Result<DistMatrix<T>> {
        let mut gradient = predictions.zeros_like();
        self.compute_gradient_into(predictions, ground_truth, &mut gradient)?;
        Ok(gradient)
    }

    pub fn compute_gradient_into(
        &self,
        predictions: &DistMatrix<T>,
        ground_truth: &DistMatrix<T>,
        gradient: &mut DistMatrix<T>,
    ) -> Result<()> {
        self.kernel
            .gradient(self.mode, predictions, ground_truth, gradient)
    }

    pub fn statistics(&self) -> &ObjectiveStatistics {
        &self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
    }
}
