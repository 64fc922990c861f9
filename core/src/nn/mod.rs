pub mod layer;
pub mod lrn;

pub use layer::Layer;
pub use lrn::{AcceleratedLrn, CpuLrn, LocalResponseNorm, LrnKernel};
