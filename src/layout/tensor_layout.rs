use std::fmt;

use ndarray::s;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::ops::tensor::{Matrix, Scalar};

/// Order in which the blocks of a 4D image tensor are laid out in a 2D buffer.
///
/// Every tensor buffer enumerates one logical axis along its rows and the
/// other along the blocks inside each row:
/// - `NCHW` (outer-major): rows are samples (or filters), blocks are channels
/// - `CNHW` (channel-major): rows are channels, blocks are samples (or filters)
#[allow(clippy::upper_case_acronyms)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
pub enum ImageFormat {
    #[default]
    #[strum(to_string = "NCHW", serialize = "nchw")]
    NCHW,
    #[strum(to_string = "CNHW", serialize = "cnhw")]
    CNHW,
}

impl ImageFormat {
    /// Map a logical `(outer, channel)` pair to `(buffer row, block in row)`.
    #[inline]
    pub fn locate(self, outer: usize, channel: usize) -> (usize, usize) {
        match self {
            ImageFormat::NCHW => (outer, channel),
            ImageFormat::CNHW => (channel, outer),
        }
    }

    /// Split a buffer's row count and block count into `(outer, channels)`.
    #[inline]
    pub fn axis_sizes(self, rows: usize, blocks: usize) -> (usize, usize) {
        match self {
            ImageFormat::NCHW => (rows, blocks),
            ImageFormat::CNHW => (blocks, rows),
        }
    }
}

/// Block descriptor: each buffer row holds `blocks` blocks of
/// `height x width` elements, one after the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockShape {
    pub blocks: usize,
    pub height: usize,
    pub width: usize,
}

impl BlockShape {
    pub const fn new(blocks: usize, height: usize, width: usize) -> Self {
        Self {
            blocks,
            height,
            width,
        }
    }

    /// Number of elements in one block.
    pub const fn block_len(&self) -> usize {
        self.height * self.width
    }

    /// Number of elements in one buffer row.
    pub const fn row_len(&self) -> usize {
        self.blocks * self.height * self.width
    }

    /// The same blocks grown by `pad_height` rows and `pad_width` columns.
    pub fn padded(&self, pad_height: usize, pad_width: usize) -> Result<Self> {
        match (
            self.height.checked_add(pad_height),
            self.width.checked_add(pad_width),
        ) {
            (Some(height), Some(width)) => Ok(Self::new(self.blocks, height, width)),
            _ => Err(Error::InvalidShape(format!(
                "Padding {} by ({}, {}) overflows",
                self, pad_height, pad_width
            ))),
        }
    }

    /// [`BlockShape::row_len`] for caller-supplied extents; a product that
    /// does not fit in `usize` is an [`Error::InvalidShape`].
    pub fn checked_row_len(&self) -> Result<usize> {
        self.height
            .checked_mul(self.width)
            .and_then(|block_len| block_len.checked_mul(self.blocks))
            .ok_or_else(|| Error::InvalidShape(format!("{} overflows the address space", self)))
    }

    /// Ensure a buffer row of `cols` elements holds exactly these blocks.
    pub fn check_row_length(&self, cols: usize) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(Error::InvalidShape(format!(
                "Block extent must be non-zero, got {}",
                self
            )));
        }
        let row_len = self.checked_row_len()?;
        if cols != row_len {
            return Err(Error::InvalidShape(format!(
                "Row of {} elements does not hold {} ({} elements expected)",
                cols, self, row_len
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BlockShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} blocks of {}x{}", self.blocks, self.height, self.width)
    }
}

/// A block descriptor together with its ordering. This is the single place
/// where logical tensor coordinates turn into buffer coordinates; images,
/// filters and outputs all go through [`TensorLayout::position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorLayout {
    pub format: ImageFormat,
    pub shape: BlockShape,
}

impl TensorLayout {
    pub const fn new(format: ImageFormat, shape: BlockShape) -> Self {
        Self { format, shape }
    }

    /// Buffer `(row, col)` of element `(y, x)` in the block of logical
    /// sample/filter `outer` and channel `channel`.
    #[inline]
    pub fn position(&self, outer: usize, channel: usize, y: usize, x: usize) -> (usize, usize) {
        let (row, block) = self.format.locate(outer, channel);
        (row, (block * self.shape.height + y) * self.shape.width + x)
    }

    /// Logical `(outer, channels)` sizes of a buffer with `rows` rows.
    pub fn axis_sizes(&self, rows: usize) -> (usize, usize) {
        self.format.axis_sizes(rows, self.shape.blocks)
    }
}

/// Regroup the blocks of `tensor` so that block `c` of row `f` ends up as
/// block `f` of row `c`.
///
/// This converts between [`ImageFormat::NCHW`] and [`ImageFormat::CNHW`] in
/// either direction and is its own inverse. Returns the reordered buffer,
/// which has `shape.blocks` rows, and its block descriptor.
pub fn reorder_blocks<T: Scalar>(
    tensor: &Matrix<T>,
    shape: BlockShape,
) -> Result<(Matrix<T>, BlockShape)> {
    shape.check_row_length(tensor.cols())?;

    let rows = tensor.rows();
    let block_len = shape.block_len();
    let reordered_shape = BlockShape::new(rows, shape.height, shape.width);
    let mut reordered = Matrix::zeros(shape.blocks, reordered_shape.row_len());

    log::trace!(
        "Reordering {} rows of {} into {} rows",
        rows,
        shape,
        shape.blocks
    );

    for f in 0..rows {
        for c in 0..shape.blocks {
            let source = tensor
                .as_array()
                .slice(s![f, c * block_len..(c + 1) * block_len]);
            reordered
                .as_array_mut()
                .slice_mut(s![c, f * block_len..(f + 1) * block_len])
                .assign(&source);
        }
    }

    Ok((reordered, reordered_shape))
}

/// Convert an outer-major (NCHW) buffer to channel-major (CNHW).
pub fn to_channel_major<T: Scalar>(
    tensor: &Matrix<T>,
    shape: BlockShape,
) -> Result<(Matrix<T>, BlockShape)> {
    reorder_blocks(tensor, shape)
}

/// Convert a channel-major (CNHW) buffer to outer-major (NCHW).
pub fn to_outer_major<T: Scalar>(
    tensor: &Matrix<T>,
    shape: BlockShape,
) -> Result<(Matrix<T>, BlockShape)> {
    reorder_blocks(tensor, shape)
}
