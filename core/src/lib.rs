//! # distnn
//!
//! Compute core for data-parallel neural network training: per-layer forward/backward kernels
//! and reduction-based objective functions over a column-distributed mini-batch.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: column-major local blocks and the distributed matrix view.
//! - [`distributed`]: collective backends (single process, CPU ring all-reduce).
//! - [`accel`]: accelerator seam and the cuDNN implementation (`cudnn` feature).
//! - [`nn`]: layers; currently local response normalization.
//! - [`loss`]: loss kernels and the objective function adapter.
//! - [`config`]: serde configuration for layers and objectives.
//! - [`telemetry`]: `tracing` subscriber setup.
//!
//! ## Example
//!
//! ```rust
//! use distnn::config::{LrnConfig, ObjectiveConfig};
//! use distnn::nn::{Layer, LocalResponseNorm};
//! use distnn::tensor::{DistMatrix, Mat};
//!
//! // 2 channels x 2 positions, mini-batch of 3
//! let layer = LocalResponseNorm::<f32>::new(LrnConfig::default(), 2, 4).unwrap();
//! let x = DistMatrix::single(Mat::from_fn([4, 3], |r, c| (r + c) as f32 * 0.1));
//! let y = layer.forward(&x).unwrap();
//!
//! let mut objective = ObjectiveConfig::MeanSquaredError.build::<f32>().unwrap();
//! let loss = objective.compute_value(&y, &x).unwrap();
//! assert!(loss >= 0.0);
//! ```

pub mod accel;
pub mod config;
pub mod distributed;
pub mod error;
pub mod loss;
pub mod nn;
pub mod telemetry;
pub mod tensor;

pub use error::{Error, Result};
