use super::LrnKernel;
use crate::accel::{device_columns, Accelerator, LrnDescriptor, NchwShape, Scaling};
use crate::error::{Error, Result};
use crate::tensor::Mat;
use distnn_kernels::LrnParams;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// LRN through the accelerator's cross-channel primitive.
///
/// The mini-batch columns are split into one contiguous range per device. Each device gets
/// one primitive call, issued in device order, and the host waits once for all of them.
///
/// The LRN descriptor lives as long as this kernel.
pub struct AcceleratedLrn<A: Accelerator> {
    accelerator: Arc<A>,
    descriptor: LrnDescriptor,
    num_channels: usize,
}

impl<A: Accelerator> AcceleratedLrn<A> {
    pub fn new(accelerator: Arc<A>, params: LrnParams<f32>, num_channels: usize) -> Result<Self> {
        if accelerator.num_devices() == 0 {
            return Err(Error::Accelerator(format!(
                "{} exposes no devices",
                accelerator.name()
            )));
        }
        let descriptor = accelerator.create_lrn_descriptor(&params)?;
        debug!(
            accelerator = accelerator.name(),
            devices = accelerator.num_devices(),
            ?descriptor,
            "created LRN descriptor"
        );
        Ok(Self {
            accelerator,
            descriptor,
            num_channels,
        })
    }

    fn shape(&self, height: usize, cols: &Range<usize>) -> NchwShape {
        NchwShape {
            n: cols.len(),
            c: self.num_channels,
            h: height / self.num_channels,
            w: 1,
        }
    }

    /// Runs `op` on each device's column range, then synchronizes.
    fn dispatch(
        &self,
        height: usize,
        width: usize,
        mut op: impl FnMut(usize, NchwShape, Range<usize>) -> Result<()>,
    ) -> Result<()> {
        if height % self.num_channels != 0 {
            return Err(Error::InvalidPartition {
                rows: height,
                channels: self.num_channels,
            });
        }
        for (device, cols) in device_columns(width, self.accelerator.num_devices())
            .into_iter()
            .enumerate()
        {
            if cols.is_empty() {
                continue;
            }
            self.accelerator.set_device(device)?;
            self.accelerator.bind_stream(device)?;
            let shape = self.shape(height, &cols);
            trace!(device, ?shape, "LRN primitive");
            op(device, shape, cols)?;
        }
        self.accelerator.synchronize()
    }
}

impl<A: Accelerator> LrnKernel<f32> for AcceleratedLrn<A> {
    fn name(&self) -> &str {
        self.accelerator.name()
    }

    fn forward(&self, input: &Mat<f32>, output: &mut Mat<f32>) -> Result<()> {
        if input.shape() != output.shape() {
            return Err(Error::ShapeMismatch {
                expected: input.shape().to_vec(),
                got: output.shape().to_vec(),
            });
        }
        self.dispatch(input.height(), input.width(), |device, shape, cols| {
            self.accelerator.lrn_cross_channel_forward(
                device,
                self.descriptor,
                shape,
                Scaling::OVERWRITE,
                input.columns(cols.clone())?,
                output.columns_mut(cols)?,
            )
        })
    }

    fn backward(
        &self,
        prev_activations: &Mat<f32>,
        activations: &Mat<f32>,
        prev_error_signal: &Mat<f32>,
        error_signal: &mut Mat<f32>,
    ) -> Result<()> {
        let shape = prev_activations.shape();
        for other in [
            activations.shape(),
            prev_error_signal.shape(),
            error_signal.shape(),
        ] {
            if other != shape {
                return Err(Error::ShapeMismatch {
                    expected: shape.to_vec(),
                    got: other.to_vec(),
                });
            }
        }
        self.dispatch(
            prev_activations.height(),
            prev_activations.width(),
            |device, shape, cols| {
                self.accelerator.lrn_cross_channel_backward(
                    device,
                    self.descriptor,
                    shape,
                    Scaling::OVERWRITE,
                    activations.columns(cols.clone())?,
                    prev_error_signal.columns(cols.clone())?,
                    prev_activations.columns(cols.clone())?,
                    error_signal.columns_mut(cols)?,
                )
            },
        )
    }
}

impl<A: Accelerator> Drop for AcceleratedLrn<A> {
    fn drop(&mut self) {
        match self.accelerator.destroy_lrn_descriptor(self.descriptor) {
            Ok(()) => debug!(descriptor = ?self.descriptor, "destroyed LRN descriptor"),
            Err(err) => {
                warn!(descriptor = ?self.descriptor, %err, "failed to destroy LRN descriptor")
            }
        }
    }
}

impl<A: Accelerator> fmt::Debug for AcceleratedLrn<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratedLrn")
            .field("accelerator", &self.accelerator.name())
            .field("devices", &self.accelerator.num_devices())
            .field("descriptor", &self.descriptor)
            .field("num_channels", &self.num_channels)
            .finish()
    }
}
