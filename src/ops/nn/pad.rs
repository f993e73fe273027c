//! Explicit zero padding of image blocks.
//!
//! The convolution kernels never materialise padding; they read zeros outside
//! the image instead. This transform produces the padded buffer explicitly so
//! that an unpadded convolution of its result can be compared against the
//! kernel's built-in padding. Both sides use [`PaddingSplit`] to decide where
//! an odd padding remainder goes.

use ndarray::s;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layout::tensor_layout::BlockShape;
use crate::ops::tensor::{Matrix, Scalar};

/// How a total padding amount is divided between the two opposing borders.
///
/// - `Standard`: `top = pad / 2`, `bottom = pad - top` (the larger half goes
///   to the bottom/right border)
/// - `Flipped`: top/bottom and left/right swapped, which is the split that
///   matches a spatially flipped kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaddingSplit {
    #[default]
    Standard,
    Flipped,
}

impl PaddingSplit {
    /// Split used together with a kernel whose flip flag is `flip`.
    pub fn for_flip(flip: bool) -> Self {
        if flip {
            PaddingSplit::Flipped
        } else {
            PaddingSplit::Standard
        }
    }

    /// `(leading, trailing)` border sizes for a total padding of `pad`.
    pub fn borders(self, pad: usize) -> (usize, usize) {
        let leading = pad / 2;
        let trailing = pad - leading;
        match self {
            PaddingSplit::Standard => (leading, trailing),
            PaddingSplit::Flipped => (trailing, leading),
        }
    }

    /// `(top, left)` offsets of the original data inside a padded block.
    pub fn offsets(self, pad_height: usize, pad_width: usize) -> (usize, usize) {
        (self.borders(pad_height).0, self.borders(pad_width).0)
    }
}

/// Surround every block of every row of `tensor` with a zero border.
///
/// Each `height x width` block becomes `(height + pad_height) x
/// (width + pad_width)`, with the original data placed at the offsets given
/// by `split`. The transform works per block, so it applies to images in
/// either block ordering. Returns the padded buffer and its block descriptor.
pub fn pad_zero<T: Scalar>(
    tensor: &Matrix<T>,
    shape: BlockShape,
    pad_height: usize,
    pad_width: usize,
    split: PaddingSplit,
) -> Result<(Matrix<T>, BlockShape)> {
    shape.check_row_length(tensor.cols())?;

    let padded_shape = shape.padded(pad_height, pad_width)?;
    let padded_row_len = padded_shape.checked_row_len()?;
    let (top, left) = split.offsets(pad_height, pad_width);
    let bottom = top + shape.height;
    let right = left + shape.width;

    log::trace!(
        "Padding {} by ({}, {}) with {:?} split",
        shape,
        pad_height,
        pad_width,
        split
    );

    let mut padded = Matrix::try_zeros(tensor.rows(), padded_row_len)?;
    for row in 0..tensor.rows() {
        let source = tensor.row_blocks(row, &shape)?;
        let mut target = padded.row_blocks_mut(row, &padded_shape)?;
        for block in 0..shape.blocks {
            let block_in = source.slice(s![block * shape.height..(block + 1) * shape.height, ..]);
            let start = block * padded_shape.height;
            target
                .slice_mut(s![start + top..start + bottom, left..right])
                .assign(&block_in);
        }
    }

    Ok((padded, padded_shape))
}
