use std::fmt;

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, LinalgScalar};
use num_traits::Float;

use crate::error::{Error, Result};
use crate::layout::tensor_layout::BlockShape;

/// Element types the convolution kernels operate on.
///
/// Implemented for `f32` and `f64`. The `LinalgScalar` bound lets the parallel
/// backend hand blocks straight to `ndarray::linalg::general_mat_mul`.
pub trait Scalar: Float + LinalgScalar + Send + Sync + fmt::Debug {}

impl Scalar for f32 {}
impl Scalar for f64 {}

/// Dense row-major 2D buffer.
///
/// Image, filter and output tensors are all stored as a `Matrix` whose rows
/// hold a run of equally sized blocks (see [`BlockShape`]). The backing array
/// is always kept in standard (C-contiguous) layout so that a single row can
/// be reinterpreted as a stacked `(blocks * height) x width` matrix.
#[derive(Clone, PartialEq)]
pub struct Matrix<T = f32> {
    data: Array2<T>,
}

impl<T: Scalar> fmt::Debug for Matrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("rows", &self.rows())
            .field("cols", &self.cols())
            .finish()
    }
}

impl<T: Scalar> Matrix<T> {
    /// Create a `rows x cols` matrix with every element set to `value`.
    pub fn new(rows: usize, cols: usize, value: T) -> Self {
        Self {
            data: Array2::from_elem((rows, cols), value),
        }
    }

    /// Create a zero-filled `rows x cols` matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
        }
    }

    /// [`Matrix::zeros`] for sizes derived from caller-supplied descriptors.
    pub fn try_zeros(rows: usize, cols: usize) -> Result<Self> {
        match rows.checked_mul(cols) {
            Some(len) if len <= isize::MAX as usize => Ok(Self::zeros(rows, cols)),
            _ => Err(Error::InvalidShape(format!(
                "A {}x{} matrix overflows the address space",
                rows, cols
            ))),
        }
    }

    /// Build a matrix from row-major values.
    pub fn from_shape_vec(rows: usize, cols: usize, values: Vec<T>) -> Result<Self> {
        let data = Array2::from_shape_vec((rows, cols), values).map_err(|e| {
            Error::InvalidShape(format!("Cannot build a {}x{} matrix: {}", rows, cols, e))
        })?;
        Ok(Self { data })
    }

    /// Wrap an existing ndarray, copying it into standard layout if needed.
    pub fn from_array(data: Array2<T>) -> Self {
        if data.is_standard_layout() {
            Self { data }
        } else {
            Self {
                data: data.as_standard_layout().into_owned(),
            }
        }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read element `(row, col)`. Panics when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[[row, col]]
    }

    /// Write element `(row, col)`. Panics when out of bounds.
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[[row, col]] = value;
    }

    /// Rows `start..end` as a view.
    pub fn row_range(&self, start: usize, end: usize) -> ArrayView2<'_, T> {
        self.data.slice(s![start..end, ..])
    }

    /// Rectangular block `rows start1..end1`, `cols start2..end2`.
    pub fn subrange(
        &self,
        start1: usize,
        end1: usize,
        start2: usize,
        end2: usize,
    ) -> ArrayView2<'_, T> {
        self.data.slice(s![start1..end1, start2..end2])
    }

    /// Mutable rectangular block `rows start1..end1`, `cols start2..end2`.
    pub fn subrange_mut(
        &mut self,
        start1: usize,
        end1: usize,
        start2: usize,
        end2: usize,
    ) -> ArrayViewMut2<'_, T> {
        self.data.slice_mut(s![start1..end1, start2..end2])
    }

    /// View row `row` as its `shape.blocks` blocks stacked on top of each
    /// other, i.e. a `(blocks * height) x width` matrix.
    pub fn row_blocks(&self, row: usize, shape: &BlockShape) -> Result<ArrayView2<'_, T>> {
        shape.check_row_length(self.cols())?;
        self.data
            .row(row)
            .into_shape((shape.blocks * shape.height, shape.width))
            .map_err(|e| Error::InvalidShape(format!("Cannot view row {} as blocks: {}", row, e)))
    }

    /// Mutable counterpart of [`Matrix::row_blocks`].
    pub fn row_blocks_mut(
        &mut self,
        row: usize,
        shape: &BlockShape,
    ) -> Result<ArrayViewMut2<'_, T>> {
        shape.check_row_length(self.cols())?;
        self.data
            .row_mut(row)
            .into_shape((shape.blocks * shape.height, shape.width))
            .map_err(|e| Error::InvalidShape(format!("Cannot view row {} as blocks: {}", row, e)))
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn as_array(&self) -> &Array2<T> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }
}
