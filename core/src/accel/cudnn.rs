//! cuDNN implementation of [`Accelerator`](super::Accelerator).
//!
//! Only available with the `cudnn` feature. Without it [`CudnnAccelerator::new`] fails with
//! `Error::AcceleratorUnsupported`, so a layer configured for accelerator execution stops at
//! setup instead of silently falling back to the CPU.

#[cfg(feature = "cudnn")]
pub use imp::CudnnAccelerator;
#[cfg(not(feature = "cudnn"))]
pub use unsupported::CudnnAccelerator;

#[cfg(not(feature = "cudnn"))]
mod unsupported {
    use crate::accel::{Accelerator, LrnDescriptor, NchwShape, Scaling};
    use crate::error::{Error, Result};
    use distnn_kernels::LrnParams;

    fn not_detected() -> Error {
        Error::AcceleratorUnsupported(
            "cuDNN not detected; rebuild with the `cudnn` feature".to_string(),
        )
    }

    /// Placeholder that cannot be constructed in builds without cuDNN.
    #[derive(Debug)]
    pub struct CudnnAccelerator {
        _private: (),
    }

    impl CudnnAccelerator {
        pub fn new(_ordinals: &[usize]) -> Result<Self> {
            Err(not_detected())
        }
    }

    impl Accelerator for CudnnAccelerator {
        fn name(&self) -> &str {
            "cudnn"
        }

        fn num_devices(&self) -> usize {
            0
        }

        fn set_device(&self, _device: usize) -> Result<()> {
            Err(not_detected())
        }

        fn bind_stream(&self, _device: usize) -> Result<()> {
            Err(not_detected())
        }

        fn create_lrn_descriptor(&self, _params: &LrnParams<f32>) -> Result<LrnDescriptor> {
            Err(not_detected())
        }

        fn destroy_lrn_descriptor(&self, _descriptor: LrnDescriptor) -> Result<()> {
            Err(not_detected())
        }

        fn lrn_cross_channel_forward(
            &self,
            _device: usize,
            _descriptor: LrnDescriptor,
            _shape: NchwShape,
            _scaling: Scaling,
            _x: &[f32],
            _y: &mut [f32],
        ) -> Result<()> {
            Err(not_detected())
        }

        fn lrn_cross_channel_backward(
            &self,
            _device: usize,
            _descriptor: LrnDescriptor,
            _shape: NchwShape,
            _scaling: Scaling,
            _y: &[f32],
            _dy: &[f32],
            _x: &[f32],
            _dx: &mut [f32],
        ) -> Result<()> {
            Err(not_detected())
        }

        fn synchronize(&self) -> Result<()> {
            Err(not_detected())
        }
    }

}

#[cfg(feature = "cudnn")]
mod imp {
    use crate::accel::{Accelerator, LrnDescriptor, NchwShape, Scaling};
    use crate::error::{Error, Result};
    use cudarc::cudnn::{result, sys};
    use cudarc::driver::{CudaDevice, DevicePtr, DevicePtrMut};
    use distnn_kernels::LrnParams;
    use std::collections::HashMap;
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing::debug;

    fn accel_err(err: impl std::fmt::Debug) -> Error {
        Error::Accelerator(format!("{:?}", err))
    }

    fn check(status: sys::cudnnStatus_t) -> Result<()> {
        status.result().map_err(accel_err)
    }

    struct DeviceContext {
        device: Arc<CudaDevice>,
        handle: sys::cudnnHandle_t,
    }

    /// cuDNN handles and LRN descriptors for a set of CUDA devices.
    pub struct CudnnAccelerator {
        devices: Vec<DeviceContext>,
        descriptors: Mutex<HashMap<u64, sys::cudnnLRNDescriptor_t>>,
        next_descriptor: AtomicU64,
    }

    // cuDNN handles are raw pointers. Each handle is only used after binding its device, and
    // descriptor access goes through the mutex.
    unsafe impl Send for CudnnAccelerator {}
    unsafe impl Sync for CudnnAccelerator {}

    impl CudnnAccelerator {
        /// Opens one cuDNN handle per CUDA device ordinal.
        pub fn new(ordinals: &[usize]) -> Result<Self> {
            if ordinals.is_empty() {
                return Err(Error::InvalidConfig(
                    "at least one CUDA device is required".to_string(),
                ));
            }
            let mut devices = Vec::with_capacity(ordinals.len());
            for &ordinal in ordinals {
                let device = CudaDevice::new(ordinal).map_err(accel_err)?;
                let handle = result::create_handle().map_err(accel_err)?;
                debug!(ordinal, "opened cuDNN handle");
                devices.push(DeviceContext { device, handle });
            }
            Ok(Self {
                devices,
                descriptors: Mutex::new(HashMap::new()),
                next_descriptor: AtomicU64::new(1),
            })
        }

        fn context(&self, device: usize) -> Result<&DeviceContext> {
            self.devices.get(device).ok_or_else(|| {
                Error::Accelerator(format!(
                    "device {} out of range ({} devices)",
                    device,
                    self.devices.len()
                ))
            })
        }

        fn raw_descriptor(&self, descriptor: LrnDescriptor) -> Result<sys::cudnnLRNDescriptor_t> {
            let map = self
                .descriptors
                .lock()
                .map_err(|_| Error::Accelerator("descriptor table poisoned".to_string()))?;
            map.get(&descriptor.0)
                .copied()
                .ok_or_else(|| Error::Accelerator(format!("unknown descriptor {:?}", descriptor)))
        }
    }

    /// 4-d float tensor descriptor, destroyed on drop.
    struct TensorDesc(sys::cudnnTensorDescriptor_t);

    impl TensorDesc {
        fn nchw(shape: NchwShape) -> Result<Self> {
            let mut dims = [0i32; 4];
            for (dim, len) in dims.iter_mut().zip([shape.n, shape.c, shape.h, shape.w]) {
                *dim = i32::try_from(len).map_err(|_| {
                    Error::Accelerator(format!(
                        "tensor dimension {} exceeds the cuDNN limit",
                        len
                    ))
                })?;
            }
            let desc = result::create_tensor_descriptor().map_err(accel_err)?;
            // SAFETY: `desc` was just created and is exclusively owned here.
            unsafe {
                result::set_tensor4d_descriptor(
                    desc,
                    sys::cudnnTensorFormat_t::CUDNN_TENSOR_NCHW,
                    sys::cudnnDataType_t::CUDNN_DATA_FLOAT,
                    dims,
                )
                .map_err(accel_err)?;
            }
            Ok(Self(desc))
        }
    }

    impl Drop for TensorDesc {
        fn drop(&mut self) {
            // SAFETY: the descriptor is owned by this wrapper and not used afterwards.
            let _ = unsafe { result::destroy_tensor_descriptor(self.0) };
        }
    }

    impl Accelerator for CudnnAccelerator {
        fn name(&self) -> &str {
            "cudnn"
        }

        fn num_devices(&self) -> usize {
            self.devices.len()
        }

        fn set_device(&self, device: usize) -> Result<()> {
            self.context(device)?
                .device
                .bind_to_thread()
                .map_err(accel_err)
        }

        fn bind_stream(&self, device: usize) -> Result<()> {
            let ctx = self.context(device)?;
            let stream = *ctx.device.cu_stream() as sys::cudaStream_t;
            // SAFETY: the handle belongs to this device and the stream outlives the device.
            unsafe { result::set_stream(ctx.handle, stream) }.map_err(accel_err)
        }

        fn create_lrn_descriptor(&self, params: &LrnParams<f32>) -> Result<LrnDescriptor> {
            let window_width = u32::try_from(params.window_width).map_err(|_| {
                Error::InvalidConfig(format!(
                    "LRN window width {} exceeds the cuDNN limit",
                    params.window_width
                ))
            })?;
            let mut raw: sys::cudnnLRNDescriptor_t = std::ptr::null_mut();
            // SAFETY: `raw` is a valid out-pointer; the descriptor is registered below.
            unsafe {
                check(sys::lib().cudnnCreateLRNDescriptor(&mut raw))?;
                check(sys::lib().cudnnSetLRNDescriptor(
                    raw,
                    window_width,
                    f64::from(params.alpha),
                    f64::from(params.beta),
                    f64::from(params.k),
                ))?;
            }
            let id = self.next_descriptor.fetch_add(1, Ordering::Relaxed);
            self.descriptors
                .lock()
                .map_err(|_| Error::Accelerator("descriptor table poisoned".to_string()))?
                .insert(id, raw);
            Ok(LrnDescriptor(id))
        }

        fn destroy_lrn_descriptor(&self, descriptor: LrnDescriptor) -> Result<()> {
            let raw = self
                .descriptors
                .lock()
                .map_err(|_| Error::Accelerator("descriptor table poisoned".to_string()))?
                .remove(&descriptor.0);
            match raw {
                // SAFETY: removed from the table, so no other call can still use it.
                Some(raw) => unsafe { check(sys::lib().cudnnDestroyLRNDescriptor(raw)) },
                None => Ok(()),
            }
        }

        fn lrn_cross_channel_forward(
            &self,
            device: usize,
            descriptor: LrnDescriptor,
            shape: NchwShape,
            scaling: Scaling,
            x: &[f32],
            y: &mut [f32],
        ) -> Result<()> {
            let ctx = self.context(device)?;
            let lrn = self.raw_descriptor(descriptor)?;
            let desc = TensorDesc::nchw(shape)?;

            let x_dev = ctx.device.htod_sync_copy(x).map_err(accel_err)?;
            let mut y_dev = ctx.device.htod_sync_copy(y).map_err(accel_err)?;
            // SAFETY: both buffers hold `shape.len()` floats matching `desc`.
            unsafe {
                check(sys::lib().cudnnLRNCrossChannelForward(
                    ctx.handle,
                    lrn,
                    sys::cudnnLRNMode_t::CUDNN_LRN_CROSS_CHANNEL_DIM1,
                    &scaling.alpha as *const f32 as *const c_void,
                    desc.0,
                    *x_dev.device_ptr() as *const c_void,
                    &scaling.beta as *const f32 as *const c_void,
                    desc.0,
                    *y_dev.device_ptr_mut() as *mut c_void,
                ))?;
            }
            ctx.device
                .dtoh_sync_copy_into(&y_dev, y)
                .map_err(accel_err)
        }

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
        ) -> Result<()> {
            let ctx = self.context(device)?;
            let lrn = self.raw_descriptor(descriptor)?;
            let desc = TensorDesc::nchw(shape)?;

            let y_dev = ctx.device.htod_sync_copy(y).map_err(accel_err)?;
            let dy_dev = ctx.device.htod_sync_copy(dy).map_err(accel_err)?;
            let x_dev = ctx.device.htod_sync_copy(x).map_err(accel_err)?;
            let mut dx_dev = ctx.device.htod_sync_copy(dx).map_err(accel_err)?;
            // SAFETY: all four buffers hold `shape.len()` floats matching `desc`.
            unsafe {
                check(sys::lib().cudnnLRNCrossChannelBackward(
                    ctx.handle,
                    lrn,
                    sys::cudnnLRNMode_t::CUDNN_LRN_CROSS_CHANNEL_DIM1,
                    &scaling.alpha as *const f32 as *const c_void,
                    desc.0,
                    *y_dev.device_ptr() as *const c_void,
                    desc.0,
                    *dy_dev.device_ptr() as *const c_void,
                    desc.0,
                    *x_dev.device_ptr() as *const c_void,
                    &scaling.beta as *const f32 as *const c_void,
                    desc.0,
                    *dx_dev.device_ptr_mut() as *mut c_void,
                ))?;
            }
            ctx.device
                .dtoh_sync_copy_into(&dx_dev, dx)
                .map_err(accel_err)
        }

        fn synchronize(&self) -> Result<()> {
            for ctx in &self.devices {
                ctx.device.synchronize().map_err(accel_err)?;
            }
            Ok(())
        }
    }

    impl Drop for CudnnAccelerator {
        fn drop(&mut self) {
            if let Ok(map) = self.descriptors.get_mut() {
                for (_, raw) in map.drain() {
                    // SAFETY: no layer can reach the table once the accelerator is dropped.
                    let _ = unsafe { sys::lib().cudnnDestroyLRNDescriptor(raw) };
                }
            }
            for ctx in &self.devices {
                // SAFETY: handles are owned by this accelerator.
                let _ = unsafe { result::destroy_handle(ctx.handle) };
            }
        }
    }
}
