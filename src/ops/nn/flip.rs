use crate::error::Result;
use crate::layout::tensor_layout::BlockShape;
use crate::ops::tensor::{Matrix, Scalar};

/// Rotate every `height x width` block of every row of `filter` by 180°.
///
/// Element `(i, j)` of a block moves to `(height - 1 - i, width - 1 - j)`.
/// This turns a cross-correlation kernel into a true convolution kernel and
/// back; applying it twice returns the input exactly.
pub fn flip_filter<T: Scalar>(filter: &Matrix<T>, shape: BlockShape) -> Result<Matrix<T>> {
    shape.check_row_length(filter.cols())?;

    log::trace!("Flipping {} rows of {}", filter.rows(), shape);

    let mut flipped = Matrix::zeros(filter.rows(), filter.cols());
    for f in 0..filter.rows() {
        for c in 0..shape.blocks {
            for i in 0..shape.height {
                for j in 0..shape.width {
                    let i_flipped = shape.height - i - 1;
                    let j_flipped = shape.width - j - 1;
                    flipped.set(
                        f,
                        (c * shape.height + i_flipped) * shape.width + j_flipped,
                        filter.get(f, (c * shape.height + i) * shape.width + j),
                    );
                }
            }
        }
    }
    Ok(flipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_flip_single_block() {
        let filter = Matrix::from_shape_vec(1, 6, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let flipped = flip_filter(&filter, BlockShape::new(1, 2, 3)).unwrap();
        assert_eq!(
            flipped.as_array().iter().copied().collect::<Vec<_>>(),
            vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]
        );
    }

    #[test]
    fn test_flip_keeps_blocks_apart() {
        // two filters, two channels of 2x2 each
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let filter = Matrix::from_shape_vec(2, 8, values).unwrap();
        let flipped = flip_filter(&filter, BlockShape::new(2, 2, 2)).unwrap();

        assert_eq!(flipped.get(0, 0), 3.0);
        assert_eq!(flipped.get(0, 3), 0.0);
        assert_eq!(flipped.get(0, 4), 7.0);
        assert_eq!(flipped.get(1, 4), 15.0);
        assert_eq!(flipped.get(1, 7), 12.0);
    }

    #[test]
    fn test_flip_is_an_involution() {
        for &(height, width) in &[(1, 1), (3, 3), (4, 4), (3, 8), (7, 2)] {
            let shape = BlockShape::new(3, height, width);
            let values: Vec<f64> = (0..2 * shape.row_len()).map(|v| (v as f64).sin()).collect();
            let filter = Matrix::from_shape_vec(2, shape.row_len(), values).unwrap();

            let twice = flip_filter(&flip_filter(&filter, shape).unwrap(), shape).unwrap();
            assert_eq!(twice, filter);
        }
    }

    #[test]
    fn test_flip_rejects_shape_mismatch() {
        let filter = Matrix::<f32>::zeros(2, 9);
        let err = flip_filter(&filter, BlockShape::new(2, 2, 2)).unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }
}
