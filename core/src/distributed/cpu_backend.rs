use super::backend::CollectiveBackend;
use crate::error::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::ops::Range;
use tracing::trace;

/// A CPU-based collective backend connecting ranks that live on different threads.
///
/// Implements the **Ring All-Reduce** algorithm using `crossbeam` channels: each rank only
/// talks to its left and right neighbour, and every element crosses the ring twice
/// (once while reducing, once while gathering).
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<Vec<f64>>, // Receive from rank - 1
    right_tx: Sender<Vec<f64>>,  // Send to rank + 1
}

impl CpuBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<Vec<f64>>,
        right_tx: Sender<Vec<f64>>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
        }
    }

    /// Builds a connected ring of `world_size` backends, indexed by rank.
    ///
    /// Channel `i` carries data from rank `i` to rank `i + 1`.
    pub fn ring(world_size: usize) -> Vec<Self> {
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| unbounded()).unzip();
        (0..world_size)
            .map(|rank| {
                let right_tx = txs[rank].clone();
                let left_rx = rxs[(rank + world_size - 1) % world_size].clone();
                Self::new(rank, world_size, left_rx, right_tx)
            })
            .collect()
    }

    /// Chunk owned by `rank + offset` (mod world size).
    fn chunk(&self, offset: isize, chunk_size: usize, total: usize) -> Range<usize> {
        let idx = (self.rank as isize + offset).rem_euclid(self.world_size as isize) as usize;
        // Trailing chunks are empty when the buffer is shorter than the ring.
        let start = (idx * chunk_size).min(total);
        let end = (start + chunk_size).min(total);
        start..end
    }

    /// Sends `outgoing` to the right neighbour and receives the left neighbour's chunk.
    fn exchange(&self, outgoing: &[f64], expected_len: usize) -> Result<Vec<f64>> {
        self.right_tx.send(outgoing.to_vec()).map_err(|_| {
            Error::Comm(format!("rank {}: right neighbour disconnected", self.rank))
        })?;
        let incoming = self.left_rx.recv().map_err(|_| {
            Error::Comm(format!("rank {}: left neighbour disconnected", self.rank))
        })?;
        if incoming.len() != expected_len {
            return Err(Error::Comm(format!(
                "rank {}: expected chunk of {} elements, received {}",
                self.rank,
                expected_len,
                incoming.len()
            )));
        }
        Ok(incoming)
    }
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&self, data: &mut [f64]) -> Result<()> {
        if self.world_size <= 1 || data.is_empty() {
            return Ok(());
        }

        let total_elements = data.len();
        let chunk_size = total_elements.div_ceil(self.world_size);
        trace!(
            rank = self.rank,
            world_size = self.world_size,
            elements = total_elements,
            "ring all-reduce"
        );

        // --- Phase 1: Scatter-Reduce ---
        // At step s, rank r sends chunk (r - s) and accumulates chunk (r - s - 1) from the left.
        // Afterwards rank r holds the complete sum of chunk (r + 1).
        for step in 0..self.world_size - 1 {
            let step = step as isize;
            let send = self.chunk(-step, chunk_size, total_elements);
            let recv = self.chunk(-step - 1, chunk_size, total_elements);

            let incoming = self.exchange(&data[send], recv.len())?;
            for (dst, val) in data[recv].iter_mut().zip(incoming) {
                *dst += val;
            }
        }

        // --- Phase 2: All-Gather ---
        // Circulate the completed chunks so every rank ends with the full result.
        for step in 0..self.world_size - 1 {
            let step = step as isize;
            let send = self.chunk(1 - step, chunk_size, total_elements);
            let recv = self.chunk(-step, chunk_size, total_elements);

            let incoming = self.exchange(&data[send], recv.len())?;
            data[recv].copy_from_slice(&incoming);
        }

        Ok(())
    }
}
