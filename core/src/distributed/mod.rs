//! # Collective communication
//!
//! The layers in this crate are **data parallel**: every rank holds a replica of the layer and
//! a slice of the mini-batch columns. The only point where ranks meet is the reduction of an
//! objective value, a sum **All-Reduce** that blocks until every rank contributed once.
//!
//! *   [`CollectiveBackend`](backend::CollectiveBackend): the interface the distributed matrix
//!     uses for reductions.
//! *   [`SingleProcess`](backend::SingleProcess): a one-rank communicator, reductions are the
//!     identity.
//! *   [`CpuBackend`](cpu_backend::CpuBackend): Ring All-Reduce between threads over
//!     `crossbeam` channels, used to simulate several ranks in one process.

pub mod backend;
pub mod cpu_backend;

pub use backend::{CollectiveBackend, SingleProcess};
pub use cpu_backend::CpuBackend;
