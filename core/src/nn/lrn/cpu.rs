use super::LrnKernel;
use crate::error::Result;
use crate::tensor::{Mat, TensorElem};
use distnn_kernels::{cpu_lrn_backward, cpu_lrn_forward, LrnParams};

/// Sliding-window LRN on the host, parallel over sample columns.
#[derive(Debug, Clone)]
pub struct CpuLrn<T: TensorElem> {
    params: LrnParams<T>,
    num_channels: usize,
}

impl<T: TensorElem> CpuLrn<T> {
    pub fn new(params: LrnParams<T>, num_channels: usize) -> Self {
        Self {
            params,
            num_channels,
        }
    }
}

impl<T: TensorElem> LrnKernel<T> for CpuLrn<T> {
    fn name(&self) -> &str {
        "cpu"
    }

    fn forward(&self, input: &Mat<T>, output: &mut Mat<T>) -> Result<()> {
        cpu_lrn_forward(
            input.data(),
            output.data_mut(),
            input.height(),
            self.num_channels,
            &self.params,
        )?;
        Ok(())
    }

    fn backward(
        &self,
        prev_activations: &Mat<T>,
        activations: &Mat<T>,
        prev_error_signal: &Mat<T>,
        error_signal: &mut Mat<T>,
    ) -> Result<()> {
        cpu_lrn_backward(
            prev_activations.data(),
            activations.data(),
            prev_error_signal.data(),
            error_signal.data_mut(),
            prev_activations.height(),
            self.num_channels,
            &self.params,
        )?;
        Ok(())
    }
}
