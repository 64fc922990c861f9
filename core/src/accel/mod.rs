//! Accelerator runtime seam.
//!
//! Layers never talk to a vendor library directly. They hold an [`Accelerator`], which exposes
//! the handful of calls a cross-channel normalization needs: device selection, stream binding,
//! descriptor lifecycle, and the forward/backward primitive. [`CudnnAccelerator`] implements it
//! on top of cuDNN when the crate is built with the `cudnn` feature.
//!
//! Calls on one device are issued on that device's stream and complete asynchronously; results
//! are only observable after [`Accelerator::synchronize`].

use crate::error::Result;
use distnn_kernels::LrnParams;
use std::ops::Range;

pub mod cudnn;

pub use cudnn::CudnnAccelerator;

/// Opaque handle to an LRN descriptor owned by the accelerator runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LrnDescriptor(pub u64);

/// Blend coefficients applied by a primitive: `dst = alpha * op(src) + beta * dst`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub alpha: f32,
    pub beta: f32,
}

impl Scaling {
    /// `dst = op(src)`
    pub const OVERWRITE: Scaling = Scaling {
        alpha: 1.0,
        beta: 0.0,
    };
}

/// NCHW shape of the batch slice handed to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NchwShape {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl NchwShape {
    pub const fn len(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The vendor operations consumed by accelerated layers.
///
/// Buffers are host slices in NCHW order; an implementation is free to stage them through
/// device memory.
pub trait Accelerator: Send + Sync {
    fn name(&self) -> &str;

    /// Number of devices the mini-batch is spread over.
    fn num_devices(&self) -> usize;

    /// Makes `device` current for the calling thread.
    fn set_device(&self, device: usize) -> Result<()>;

    /// Binds the vendor handle of `device` to that device's stream.
    fn bind_stream(&self, device: usize) -> Result<()>;

    fn create_lrn_descriptor(&self, params: &LrnParams<f32>) -> Result<LrnDescriptor>;

    fn destroy_lrn_descriptor(&self, descriptor: LrnDescriptor) -> Result<()>;

    /// `y = scaling.alpha * lrn(x) + scaling.beta * y`
    fn lrn_cross_channel_forward(
        &self,
        device: usize,
        descriptor: LrnDescriptor,
        shape: NchwShape,
        scaling: Scaling,
        x: &[f32],
        y: &mut [f32],
    ) -> Result<()>;

    /// `dx = scaling.alpha * lrn_grad(y, dy, x) + scaling.beta * dx`
    #[allow(clippy::too_many_arguments)]
    fn lrn_cross_channel_backward(
        &self,
        device: usize,
        descriptor: LrnDescriptor,
        shape: NchwShape,
        scaling: Scaling,
        y: &[f32],
        dy: &[f32],
        x: &[f32],
        dx: &mut [f32],
    ) -> Result<()>;

    /// Waits until every operation issued on every device has completed.
    fn synchronize(&self) -> Result<()>;
}

/// Splits `width` mini-batch columns into contiguous per-device ranges.
///
/// The first `width % num_devices` devices receive one extra column. Devices left without
/// columns get an empty range.
pub fn device_columns(width: usize, num_devices: usize) -> Vec<Range<usize>> {
    if num_devices == 0 {
        return Vec::new();
    }
    let base = width / num_devices;
    let extra = width % num_devices;
    let mut start = 0;
    (0..num_devices)
        .map(|device| {
            let len = base + usize::from(device < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_device_columns_even() {
        assert_eq!(device_columns(8, 2), vec![0..4, 4..8]);
    }

    #[test]
    fn test_device_columns_uneven() {
        assert_eq!(device_columns(7, 3), vec![0..3, 3..5, 5..7]);
        assert_eq!(device_columns(1, 3), vec![0..1, 1..1, 1..1]);
        assert!(device_columns(4, 0).is_empty());
    }

    #[test]
    fn test_nchw_len() {
        let shape = NchwShape {
            n: 2,
            c: 3,
            h: 4,
            w: 1,
        };
        assert_eq!(shape.len(), 24);
        assert!(!shape.is_empty());
    }

    proptest! {
        #[test]
        fn prop_device_columns_partition_batch(width in 0usize..200, devices in 1usize..9) {
            let ranges = device_columns(width, devices);
            prop_assert_eq!(ranges.len(), devices);
            let mut next = 0;
            for range in &ranges {
                prop_assert_eq!(range.start, next);
                prop_assert!(range.len() == width / devices || range.len() == width / devices + 1);
                next = range.end;
            }
            prop_assert_eq!(next, width);
        }
    }
}
