//! Local response normalization across channels.
//!
//! ```text
//! scale_factor(c) = k + alpha / window_width * sum(x(j) ^ 2, j in window(c))
//! y(c)            = x(c) * scale_factor(c) ^ -beta
//! ```
//!
//! `window(c)` spans channels `c - window_width / 2 ..= c + window_width / 2`, clamped to the
//! channels that exist. The same normalization is applied independently at every spatial
//! position of every sample.
//!
//! Exactly one [`LrnKernel`] computes each pass. A layer starts on [`CpuLrn`];
//! [`LocalResponseNorm::with_accelerator`] replaces it with [`AcceleratedLrn`].

use crate::accel::Accelerator;
use crate::config::LrnConfig;
use crate::error::{Error, Result};
use crate::nn::Layer;
use crate::tensor::{DistMatrix, Mat, TensorElem};
use distnn_kernels::LrnParams;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::debug;

pub mod accelerated;
pub mod cpu;

pub use accelerated::AcceleratedLrn;
pub use cpu::CpuLrn;

/// One way of computing LRN over a local block.
///
/// Blocks are column-major with `num_channels * num_per_channel` rows; every argument has the
/// same shape. `backward` overwrites `error_signal`.
pub trait LrnKernel<T: TensorElem>: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn forward(&self, input: &Mat<T>, output: &mut Mat<T>) -> Result<()>;

    fn backward(
        &self,
        prev_activations: &Mat<T>,
        activations: &Mat<T>,
        prev_error_signal: &Mat<T>,
        error_signal: &mut Mat<T>,
    ) -> Result<()>;
}

/// Cross-channel local response normalization layer.
pub struct LocalResponseNorm<T: TensorElem> {
    config: LrnConfig,
    num_channels: usize,
    num_neurons: usize,
    kernel: Box<dyn LrnKernel<T>>,
}

fn convert<T: TensorElem>(name: &str, value: f64) -> Result<T> {
    T::from_f64(value).ok_or_else(|| {
        Error::InvalidConfig(format!("LRN {} = {} is not representable", name, value))
    })
}

fn kernel_params<T: TensorElem>(config: &LrnConfig) -> Result<LrnParams<T>> {
    Ok(LrnParams {
        window_width: config.window_width,
        alpha: convert("alpha", config.alpha)?,
        beta: convert("beta", config.beta)?,
        k: convert("k", config.k)?,
    })
}

impl<T: TensorElem> LocalResponseNorm<T> {
    pub const NAME: &'static str = "local response normalization";

    /// Builds a CPU-backed layer over `num_neurons` features split into `num_channels`
    /// equally sized channels.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidConfig` if the configuration fails validation.
    /// * `Error::InvalidPartition` if `num_channels` is zero or does not divide `num_neurons`.
    pub fn new(config: LrnConfig, num_channels: usize, num_neurons: usize) -> Result<Self> {
        config.validate()?;
        if num_channels == 0 || num_neurons == 0 || num_neurons % num_channels != 0 {
            return Err(Error::InvalidPartition {
                rows: num_neurons,
                channels: num_channels,
            });
        }
        let kernel = CpuLrn::new(kernel_params(&config)?, num_channels);
        debug!(
            num_channels,
            num_neurons,
            window_width = config.window_width,
            backend = kernel.name(),
            "created local response normalization"
        );
        Ok(Self {
            config,
            num_channels,
            num_neurons,
            kernel: Box::new(kernel),
        })
    }

    pub fn config(&self) -> &LrnConfig {
        &self.config
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_neurons(&self) -> usize {
        self.num_neurons
    }

    /// Spatial positions per channel.
    pub fn num_per_channel(&self) -> usize {
        self.num_neurons / self.num_channels
    }

    /// Name of the kernel computing the passes.
    pub fn backend_name(&self) -> &str {
        self.kernel.name()
    }

    fn check_input(&self, m: &DistMatrix<T>) -> Result<()> {
        if m.height() != self.num_neurons {
            return Err(Error::ShapeMismatch {
                expected: vec![self.num_neurons, m.width()],
                got: vec![m.height(), m.width()],
            });
        }
        Ok(())
    }
}

impl LocalResponseNorm<f32> {
    /// Moves both passes onto `accelerator`.
    ///
    /// Creates the LRN descriptor now; it is destroyed when the layer is dropped.
    pub fn with_accelerator<A: Accelerator + 'static>(
        mut self,
        accelerator: Arc<A>,
    ) -> Result<Self> {
        let kernel = AcceleratedLrn::new(
            accelerator,
            kernel_params(&self.config)?,
            self.num_channels,
        )?;
        debug!(backend = kernel.name(), "local response normalization uses accelerator");
        self.kernel = Box::new(kernel);
        Ok(self)
    }
}

impl<T: TensorElem> Layer<T> for LocalResponseNorm<T> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn forward(&self, prev_activations: &DistMatrix<T>) -> Result<DistMatrix<T>> {
        self.check_input(prev_activations)?;
        let mut activations = prev_activations.zeros_like();
        self.kernel
            .forward(prev_activations.locked_matrix(), activations.matrix())?;
        Ok(activations)
    }

    fn backward(
        &self,
        prev_activations: &DistMatrix<T>,
        activations: &DistMatrix<T>,
        prev_error_signal: &DistMatrix<T>,
    ) -> Result<DistMatrix<T>> {
        self.check_input(prev_activations)?;
        prev_activations.check_same_distribution(activations)?;
        prev_activations.check_same_distribution(prev_error_signal)?;

        let mut error_signal = prev_activations.zeros_like();
        self.kernel.backward(
            prev_activations.locked_matrix(),
            activations.locked_matrix(),
            prev_error_signal.locked_matrix(),
            error_signal.matrix(),
        )?;
        Ok(error_signal)
    }
}

impl<T: TensorElem> Debug for LocalResponseNorm<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalResponseNorm")
            .field("config", &self.config)
            .field("num_channels", &self.num_channels)
            .field("num_neurons", &self.num_neurons)
            .field("backend", &self.kernel.name())
            .finish()
    }
}
