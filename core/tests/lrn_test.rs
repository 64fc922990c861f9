use distnn::accel::{Accelerator, LrnDescriptor, NchwShape, Scaling};
use distnn::config::LrnConfig;
use distnn::nn::{Layer, LocalResponseNorm};
use distnn::tensor::{DistMatrix, Mat};
use distnn::{Error, Result};
use distnn_kernels::{cpu_lrn_backward, cpu_lrn_forward, LrnParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

fn config(window_width: usize) -> LrnConfig {
    LrnConfig {
        window_width,
        alpha: 0.4,
        beta: 0.75,
        k: 1.5,
    }
}

fn random_matrix(rng: &mut StdRng, height: usize, width: usize) -> DistMatrix<f64> {
    DistMatrix::single(Mat::from_fn([height, width], |_, _| rng.gen_range(-1.0..1.0)))
}

#[test]
fn test_gradient_matches_finite_differences() {
    let mut rng = StdRng::seed_from_u64(7);
    let (num_channels, num_per_channel, width) = (5, 3, 2);
    let height = num_channels * num_per_channel;
    let layer = LocalResponseNorm::<f64>::new(config(3), num_channels, height).unwrap();

    let x = random_matrix(&mut rng, height, width);
    let dy = random_matrix(&mut rng, height, width);
    let y = layer.forward(&x).unwrap();
    let dx = layer.backward(&x, &y, &dy).unwrap();

    // Scalar objective L = sum(dy * y), so dL/dx is exactly the backward output.
    let objective = |input: &DistMatrix<f64>| -> f64 {
        let out = layer.forward(input).unwrap();
        out.locked_matrix()
            .data()
            .iter()
            .zip(dy.locked_matrix().data())
            .map(|(a, b)| a * b)
            .sum()
    };

    let h = 1e-6;
    for col in 0..width {
        for row in 0..height {
            let mut plus = x.clone();
            plus.update(row, col, h).unwrap();
            let mut minus = x.clone();
            minus.update(row, col, -h).unwrap();
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * h);
            let analytic = dx.get(row, col).unwrap();
            let tol = 1e-4 * analytic.abs().max(1.0);
            assert!(
                (numeric - analytic).abs() < tol,
                "({}, {}): numeric {} vs analytic {}",
                row,
                col,
                numeric,
                analytic
            );
        }
    }
}

#[test]
fn test_window_wider_than_channels_normalizes_over_all_channels() {
    let num_channels = 4;
    let x = DistMatrix::single(
        Mat::<f64>::from_rows(&[&[1.0], &[-2.0], &[0.5], &[3.0]]).unwrap(),
    );
    let sum_sq: f64 = x.locked_matrix().data().iter().map(|v| v * v).sum();

    for window_width in [2 * num_channels, 2 * num_channels + 1] {
        let cfg = config(window_width);
        let layer = LocalResponseNorm::<f64>::new(cfg, num_channels, num_channels).unwrap();
        let y = layer.forward(&x).unwrap();
        let scale = cfg.k + cfg.alpha / window_width as f64 * sum_sq;
        for (out, inp) in y.locked_matrix().data().iter().zip(x.locked_matrix().data()) {
            assert!((out - inp * scale.powf(-cfg.beta)).abs() < 1e-12);
        }
    }
}

#[test]
fn test_huge_window_width_behaves_like_full_window() {
    let x = random_matrix(&mut StdRng::seed_from_u64(5), 4, 3);
    let full = LocalResponseNorm::<f64>::new(config(9), 4, 4).unwrap();
    let huge = LocalResponseNorm::<f64>::new(config(usize::MAX), 4, 4).unwrap();

    let y = huge.forward(&x).unwrap();
    let dx = huge.backward(&x, &y, &x).unwrap();
    assert!(dx.locked_matrix().data().iter().all(|g| g.is_finite()));

    // Both windows see every channel; only the alpha / window_width scale differs.
    let y_full = full.forward(&x).unwrap();
    assert_ne!(y.locked_matrix(), y_full.locked_matrix());
    for (out, inp) in y.locked_matrix().data().iter().zip(x.locked_matrix().data()) {
        assert!((out - inp * 1.5f64.powf(-0.75)).abs() < 1e-12);
    }
}

#[test]
fn test_invalid_partition() {
    let err = LocalResponseNorm::<f32>::new(LrnConfig::default(), 4, 18);
    assert!(matches!(
        err,
        Err(Error::InvalidPartition {
            rows: 18,
            channels: 4
        })
    ));
}

#[test]
fn test_layer_from_json_config() {
    let cfg =
        LrnConfig::from_json(r#"{ "window_width": 3, "alpha": 0.3, "beta": 1.0, "k": 1.0 }"#)
            .unwrap();
    let layer = LocalResponseNorm::<f32>::new(cfg, 3, 3).unwrap();
    let x = DistMatrix::single(Mat::from_rows(&[&[1.0f32], &[2.0], &[3.0]]).unwrap());
    let y = layer.forward(&x).unwrap();
    assert!((y.get(1, 0).unwrap() - 2.0 / 2.4).abs() < 1e-6);
}

#[cfg(not(feature = "cudnn"))]
#[test]
fn test_cudnn_unavailable_without_feature() {
    use distnn::accel::CudnnAccelerator;

    assert!(matches!(
        CudnnAccelerator::new(&[0]),
        Err(Error::AcceleratorUnsupported(_))
    ));
}

/// Host-only stand-in for a vendor runtime, recording every call it receives.
#[derive(Default)]
struct RecordingAccelerator {
    devices: usize,
    params: Mutex<Option<LrnParams<f32>>>,
    calls: Mutex<Vec<String>>,
    live_descriptors: Mutex<Vec<LrnDescriptor>>,
}

impl RecordingAccelerator {
    fn new(devices: usize) -> Arc<Self> {
        Arc::new(Self {
            devices,
            ..Self::default()
        })
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn params(&self) -> LrnParams<f32> {
        self.params.lock().unwrap().unwrap()
    }
}

impl Accelerator for RecordingAccelerator {
    fn name(&self) -> &str {
        "recording"
    }

    fn num_devices(&self) -> usize {
        self.devices
    }

    fn set_device(&self, device: usize) -> Result<()> {
        self.log(format!("set_device {}", device));
        Ok(())
    }

    fn bind_stream(&self, device: usize) -> Result<()> {
        self.log(format!("bind_stream {}", device));
        Ok(())
    }

    fn create_lrn_descriptor(&self, params: &LrnParams<f32>) -> Result<LrnDescriptor> {
        *self.params.lock().unwrap() = Some(*params);
        let descriptor = LrnDescriptor(42);
        self.live_descriptors.lock().unwrap().push(descriptor);
        Ok(descriptor)
    }

    fn destroy_lrn_descriptor(&self, descriptor: LrnDescriptor) -> Result<()> {
        self.live_descriptors
            .lock()
            .unwrap()
            .retain(|d| *d != descriptor);
        self.log("destroy".to_string());
        Ok(())
    }

    fn lrn_cross_channel_forward(
        &self,
        device: usize,
        _descriptor: LrnDescriptor,
        shape: NchwShape,
        scaling: Scaling,
        x: &[f32],
        y: &mut [f32],
    ) -> Result<()> {
        assert_eq!(scaling, Scaling::OVERWRITE);
        assert_eq!(x.len(), shape.len());
        self.log(format!("forward {} n={}", device, shape.n));
        cpu_lrn_forward(x, y, shape.c * shape.h * shape.w, shape.c, &self.params())?;
        Ok(())
    }

    fn lrn_cross_channel_backward(
        &self,
        device: usize,
        _descriptor: LrnDescriptor,
        shape: NchwShape,
        _scaling: Scaling,
        y: &[f32],
        dy: &[f32],
        x: &[f32],
        dx: &mut [f32],
    ) -> Result<()> {
        self.log(format!("backward {} n={}", device, shape.n));
        cpu_lrn_backward(x, y, dy, dx, shape.c * shape.h * shape.w, shape.c, &self.params())?;
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.log("synchronize".to_string());
        Ok(())
    }
}

#[test]
fn test_accelerated_path_matches_cpu_and_splits_batch() {
    let (num_channels, num_per_channel, width) = (3, 2, 5);
    let height = num_channels * num_per_channel;
    let mut rng = StdRng::seed_from_u64(3);
    let mut random = || {
        DistMatrix::single(Mat::from_fn([height, width], |_, _| {
            rng.gen_range(-1.0f32..1.0)
        }))
    };
    let x = random();
    let dy = random();

    let cpu = LocalResponseNorm::<f32>::new(config(3), num_channels, height).unwrap();
    let accelerator = RecordingAccelerator::new(2);
    let accelerated = LocalResponseNorm::<f32>::new(config(3), num_channels, height)
        .unwrap()
        .with_accelerator(Arc::clone(&accelerator))
        .unwrap();
    assert_eq!(accelerated.backend_name(), "recording");

    let y_cpu = cpu.forward(&x).unwrap();
    let y_acc = accelerated.forward(&x).unwrap();
    assert_eq!(y_cpu.locked_matrix(), y_acc.locked_matrix());

    let dx_cpu = cpu.backward(&x, &y_cpu, &dy).unwrap();
    let dx_acc = accelerated.backward(&x, &y_acc, &dy).unwrap();
    assert_eq!(dx_cpu.locked_matrix(), dx_acc.locked_matrix());

    assert_eq!(
        accelerator.calls(),
        vec![
            "set_device 0",
            "bind_stream 0",
            "forward 0 n=3",
            "set_device 1",
            "bind_stream 1",
            "forward 1 n=2",
            "synchronize",
            "set_device 0",
            "bind_stream 0",
            "backward 0 n=3",
            "set_device 1",
            "bind_stream 1",
            "backward 1 n=2",
            "synchronize",
        ]
    );

    drop(accelerated);
    assert!(accelerator.live_descriptors.lock().unwrap().is_empty());
    assert_eq!(accelerator.calls().last().map(String::as_str), Some("destroy"));
}

#[test]
fn test_accelerator_without_devices_is_rejected() {
    let layer = LocalResponseNorm::<f32>::new(config(3), 2, 4).unwrap();
    let err = layer.with_accelerator(RecordingAccelerator::new(0));
    assert!(matches!(err, Err(Error::Accelerator(_))));
}
