use crate::error::Result;

/// Abstraction for a distributed communication backend.
///
/// This trait allows swapping between different communication implementations:
/// - **SingleProcess**: one rank, nothing to exchange.
/// - **CPU/Ring**: threads connected by channels.
///
/// Objective values are reduced in `f64` whatever the element type of the tensors.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the rank of the current process/thread.
    fn rank(&self) -> usize;

    /// Returns the total number of processes/threads.
    fn world_size(&self) -> usize;

    /// Replaces `buf` with its elementwise sum over all ranks.
    ///
    /// Every rank must call this with a buffer of the same length.
    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<()>;

    /// Sums a single value over all ranks.
    fn all_reduce_scalar(&self, value: f64) -> Result<f64> {
        let mut buf = [value];
        self.all_reduce_sum(&mut buf)?;
        Ok(buf[0])
    }
}

/// Communicator for a job with exactly one rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl CollectiveBackend for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buf: &mut [f64]) -> Result<()> {
        Ok(())
    }
}
