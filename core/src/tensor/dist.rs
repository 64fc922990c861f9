//! Data-parallel distributed matrix.
//!
//! Each rank owns a contiguous subset of the mini-batch columns and every feature row, so the
//! local height always equals the global height. Kernels touch only the local block;
//! cross-rank results flow through [`DistMatrix::all_reduce_sum`].

use super::{Mat, TensorElem};
use crate::distributed::backend::{CollectiveBackend, SingleProcess};
use crate::error::{Error, Result};
use std::fmt::Debug;
use std::sync::Arc;

/// A global `[height, width]` matrix of which this rank holds a local block.
#[derive(Clone)]
pub struct DistMatrix<T: TensorElem> {
    local: Mat<T>,
    global_height: usize,
    global_width: usize,
    comm: Arc<dyn CollectiveBackend>,
}

impl<T: TensorElem> DistMatrix<T> {
    /// Wraps a local block of a `[global_height, global_width]` matrix.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShapeMismatch` if the local block has a different height or is wider
    /// than the global matrix.
    pub fn new(
        local: Mat<T>,
        global_height: usize,
        global_width: usize,
        comm: Arc<dyn CollectiveBackend>,
    ) -> Result<Self> {
        if local.height() != global_height || local.width() > global_width {
            return Err(Error::ShapeMismatch {
                expected: vec![global_height, global_width],
                got: local.shape().to_vec(),
            });
        }
        Ok(Self {
            local,
            global_height,
            global_width,
            comm,
        })
    }

    /// A matrix owned entirely by one process.
    pub fn single(local: Mat<T>) -> Self {
        let [global_height, global_width] = local.shape();
        Self {
            local,
            global_height,
            global_width,
            comm: Arc::new(SingleProcess),
        }
    }

    /// A zero matrix with the same global shape, local shape and communicator.
    pub fn zeros_like(&self) -> Self {
        Self {
            local: Mat::zeros(self.local.shape()),
            global_height: self.global_height,
            global_width: self.global_width,
            comm: Arc::clone(&self.comm),
        }
    }

    /// Global height.
    pub const fn height(&self) -> usize {
        self.global_height
    }

    /// Global width.
    pub const fn width(&self) -> usize {
        self.global_width
    }

    pub const fn local_height(&self) -> usize {
        self.local.height()
    }

    pub const fn local_width(&self) -> usize {
        self.local.width()
    }

    /// Read-only local block.
    pub fn locked_matrix(&self) -> &Mat<T> {
        &self.local
    }

    /// Mutable local block.
    pub fn matrix(&mut self) -> &mut Mat<T> {
        &mut self.local
    }

    /// Consumes the view and returns the local block.
    pub fn into_local(self) -> Mat<T> {
        self.local
    }

    /// Reads a local entry.
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.local.get(row, col)
    }

    /// Adds `delta` to a local entry.
    pub fn update(&mut self, row: usize, col: usize, delta: T) -> Result<()> {
        self.local.update(row, col, delta)
    }

    pub fn comm(&self) -> &Arc<dyn CollectiveBackend> {
        &self.comm
    }

    /// Sums `value` over every rank of the communicator. Blocks until all ranks contribute.
    pub fn all_reduce_sum(&self, value: f64) -> Result<f64> {
        self.comm.all_reduce_scalar(value)
    }

    /// `true` when both matrices have the same global and local shapes.
    pub fn same_distribution<U: TensorElem>(&self, other: &DistMatrix<U>) -> bool {
        self.global_height == other.global_height
            && self.global_width == other.global_width
            && self.local.shape() == other.local.shape()
    }

    /// Fails with `Error::ShapeMismatch` unless `other` matches this matrix's distribution.
    pub fn check_same_distribution<U: TensorElem>(&self, other: &DistMatrix<U>) -> Result<()> {
        if self.same_distribution(other) {
            return Ok(());
        }
        Err(Error::ShapeMismatch {
            expected: vec![
                self.global_height,
                self.global_width,
                self.local_height(),
                self.local_width(),
            ],
            got: vec![
                other.global_height,
                other.global_width,
                other.local_height(),
                other.local_width(),
            ],
        })
    }
}

impl<T: TensorElem> Debug for DistMatrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistMatrix")
            .field("global", &[self.global_height, self.global_width])
            .field("local", &self.local.shape())
            .field("rank", &self.comm.rank())
            .field("world_size", &self.comm.world_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_process_matrix() {
        let m = DistMatrix::single(Mat::<f32>::zeros([4, 3]));
        assert_eq!(m.height(), 4);
        assert_eq!(m.width(), 3);
        assert_eq!(m.local_width(), 3);
        assert_eq!(m.comm().world_size(), 1);
        assert_eq!(m.all_reduce_sum(2.5).unwrap(), 2.5);
    }

    #[test]
    fn test_local_block_must_fit() {
        let comm: Arc<dyn CollectiveBackend> = Arc::new(SingleProcess);
        let ok = DistMatrix::new(Mat::<f32>::zeros([4, 2]), 4, 8, Arc::clone(&comm));
        assert!(ok.is_ok());

        let taller = DistMatrix::new(Mat::<f32>::zeros([5, 2]), 4, 8, Arc::clone(&comm));
        assert!(matches!(taller, Err(Error::ShapeMismatch { .. })));

        let wider = DistMatrix::new(Mat::<f32>::zeros([4, 9]), 4, 8, comm);
        assert!(matches!(wider, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_zeros_like_and_distribution() {
        let mut a = DistMatrix::single(Mat::<f64>::from_fn([2, 2], |r, c| (r + c) as f64));
        let b = a.zeros_like();
        assert!(a.same_distribution(&b));
        assert_eq!(b.locked_matrix().data(), &[0.0; 4]);

        a.update(0, 0, 1.5).unwrap();
        assert_eq!(a.get(0, 0).unwrap(), 1.5);

        let c = DistMatrix::single(Mat::<f64>::zeros([2, 3]));
        assert!(!a.same_distribution(&c));
        assert!(matches!(
            a.check_same_distribution(&c),
            Err(Error::ShapeMismatch { .. })
        ));

        let local = a.into_local();
        assert_eq!(local.shape(), [2, 2]);
        assert_eq!(local.data(), &[1.5, 1.0, 1.0, 2.0]);
    }
}
