//! Local matrix blocks.
//!
//! # Layout
//!
//! A [`Mat`] is the part of a distributed matrix that one rank owns. Rows index features,
//! columns index mini-batch samples, and storage is **column-major**: each sample is a
//! contiguous run of `height` elements.
//!
//! For a layer with `num_channels` channels and `num_per_channel` spatial positions per
//! channel, feature row `pos + num_per_channel * channel` holds `(channel, pos)`. A column is
//! therefore laid out exactly like one `C x H x W` image, and a run of columns like an NCHW
//! batch.
//!
//! ```rust
//! use distnn::tensor::Mat;
//!
//! // 3 features x 2 samples
//! let m = Mat::<f32>::from_rows(&[&[1.0, 4.0], &[2.0, 5.0], &[3.0, 6.0]]).unwrap();
//! assert_eq!(m.shape(), [3, 2]);
//! assert_eq!(m.column(1).unwrap(), &[4.0, 5.0, 6.0]);
//! ```

use crate::error::{Error, Result};
use distnn_kernels::KernelElem;
use std::fmt::Debug;
use std::ops::Range;

pub mod dist;

pub use dist::DistMatrix;

/// Trait bound for elements that can be stored in a [`Mat`].
///
/// Same requirements as the kernel crate's `KernelElem`: floating point arithmetic and
/// `Send + Sync` for `rayon`. `'static` so layers can hold boxed kernels over `T`.
pub trait TensorElem: KernelElem + 'static {}

impl<T: KernelElem + 'static> TensorElem for T {}

/// A dense, column-major local block.
#[derive(Clone, PartialEq)]
pub struct Mat<T: TensorElem> {
    height: usize,
    width: usize,
    data: Vec<T>,
}

impl<T: TensorElem> Mat<T> {
    /// Wraps column-major `data` as a `[height, width]` block.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShapeMismatch` if `data.len() != height * width`.
    pub fn new(data: Vec<T>, shape: [usize; 2]) -> Result<Self> {
        let [height, width] = shape;
        if data.len() != height * width {
            return Err(Error::ShapeMismatch {
                expected: vec![height * width],
                got: vec![data.len()],
            });
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    /// Creates a block filled with zeros.
    pub fn zeros(shape: [usize; 2]) -> Self {
        let [height, width] = shape;
        Self {
            height,
            width,
            data: vec![T::zero(); height * width],
        }
    }

    /// Builds a block from `f(row, col)`.
    pub fn from_fn(shape: [usize; 2], mut f: impl FnMut(usize, usize) -> T) -> Self {
        let [height, width] = shape;
        let mut data = Vec::with_capacity(height * width);
        for col in 0..width {
            for row in 0..height {
                data.push(f(row, col));
            }
        }
        Self {
            height,
            width,
            data,
        }
    }

    /// Builds a block from row slices, as a matrix would be written on paper.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShapeMismatch` if the rows have different lengths.
    pub fn from_rows(rows: &[&[T]]) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, |r| r.len());
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(Error::ShapeMismatch {
                expected: vec![width],
                got: vec![bad.len()],
            });
        }
        Ok(Self::from_fn([height, width], |row, col| rows[row][col]))
    }

    pub const fn height(&self) -> usize {
        self.height
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    /// `[height, width]`
    pub const fn shape(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    /// Total number of elements.
    pub const fn size(&self) -> usize {
        self.height * self.width
    }

    /// The column-major backing slice.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.height || col >= self.width {
            return Err(Error::IndexOutOfBounds {
                index: vec![row, col],
                shape: vec![self.height, self.width],
            });
        }
        Ok(row + col * self.height)
    }

    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        let i = self.offset(row, col)?;
        Ok(self.data[i])
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let i = self.offset(row, col)?;
        self.data[i] = value;
        Ok(())
    }

    /// Adds `delta` to the entry at `(row, col)`.
    pub fn update(&mut self, row: usize, col: usize, delta: T) -> Result<()> {
        let i = self.offset(row, col)?;
        self.data[i] += delta;
        Ok(())
    }

    /// One sample column.
    pub fn column(&self, col: usize) -> Result<&[T]> {
        self.columns(col..col + 1)
    }

    /// A contiguous run of sample columns.
    pub fn columns(&self, cols: Range<usize>) -> Result<&[T]> {
        let span = self.column_span(&cols)?;
        Ok(&self.data[span])
    }

    pub fn columns_mut(&mut self, cols: Range<usize>) -> Result<&mut [T]> {
        let span = self.column_span(&cols)?;
        Ok(&mut self.data[span])
    }

    fn column_span(&self, cols: &Range<usize>) -> Result<Range<usize>> {
        if cols.start > cols.end || cols.end > self.width {
            return Err(Error::IndexOutOfBounds {
                index: vec![cols.start, cols.end],
                shape: vec![self.height, self.width],
            });
        }
        Ok(cols.start * self.height..cols.end * self.height)
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(T::zero());
    }
}

impl<T: TensorElem> Debug for Mat<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mat")
            .field("height", &self.height)
            .field("width", &self.width)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat_creation() {
        let m = Mat::<f32>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [3, 2]).unwrap();
        assert_eq!(m.shape(), [3, 2]);
        assert_eq!(m.size(), 6);
        // Column-major: (row 0, col 1) is the fourth element.
        assert_eq!(m.get(0, 1).unwrap(), 4.0);

        let err = Mat::<f32>::new(vec![1.0, 2.0, 3.0], [2, 2]);
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_from_rows() {
        let m = Mat::<f64>::from_rows(&[&[1.0, 2.0], &[3.0, 4.0]]).unwrap();
        assert_eq!(m.data(), &[1.0, 3.0, 2.0, 4.0]);
        assert_eq!(m.get(1, 0).unwrap(), 3.0);

        let err = Mat::<f64>::from_rows(&[&[1.0, 2.0], &[3.0]]);
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_set_and_update() {
        let mut m = Mat::<f32>::zeros([2, 2]);
        m.set(1, 1, 2.0).unwrap();
        m.update(1, 1, 0.5).unwrap();
        m.update(1, 1, 0.5).unwrap();
        assert_eq!(m.get(1, 1).unwrap(), 3.0);

        m.fill_zero();
        assert_eq!(m.data(), &[0.0; 4]);
    }

    #[test]
    fn test_out_of_bounds() {
        let m = Mat::<f32>::zeros([2, 3]);
        assert!(matches!(
            m.get(2, 0),
            Err(Error::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            m.columns(1..4),
            Err(Error::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_column_ranges() {
        let mut m = Mat::<f32>::from_fn([2, 3], |r, c| (10 * c + r) as f32);
        assert_eq!(m.column(2).unwrap(), &[20.0, 21.0]);
        assert_eq!(m.columns(0..2).unwrap(), &[0.0, 1.0, 10.0, 11.0]);
        assert!(m.columns(1..1).unwrap().is_empty());

        m.columns_mut(1..2).unwrap().fill(-1.0);
        assert_eq!(m.data(), &[0.0, 1.0, -1.0, -1.0, 20.0, 21.0]);
    }

    #[test]
    fn test_mat_debug() {
        let m = Mat::<f32>::zeros([4, 2]);
        let debug_str = format!("{:?}", m);
        assert!(debug_str.contains("Mat"));
        assert!(debug_str.contains("height"));
    }
}
