use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execution::backend::ConvolutionBackend;
use crate::layout::tensor_layout::BlockShape;
use crate::ops::nn::conv::Conv2d;
use crate::ops::tensor::{Matrix, Scalar};

/// Default relative tolerance between two backends' outputs
pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e-2;

/// Absolute slack for elements whose true value is close to zero, where a
/// purely relative check is meaningless.
const ABSOLUTE_FLOOR: f64 = 1e-4;

/// Metrics for measuring numerical agreement between two outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectnessMetrics {
    /// Whether every element matches within tolerance
    pub outputs_match: bool,
    /// Maximum absolute difference
    pub max_abs_difference: f64,
    /// Maximum relative difference
    pub max_rel_difference: f64,
    /// Root mean square error
    pub rmse: f64,
    /// Number of elements outside tolerance
    pub mismatches: usize,
    /// First element outside tolerance as `(row, col)`
    pub first_mismatch: Option<(usize, usize)>,
    /// Relative tolerance the comparison used
    pub tolerance: f64,
}

/// Compare `actual` against `expected` elementwise.
///
/// An element matches when `|a - e| <= tolerance * max(|a|, |e|)` or the
/// difference is below a small absolute floor.
pub fn compare_matrices<T: Scalar>(
    actual: &Matrix<T>,
    expected: &Matrix<T>,
    tolerance: f64,
) -> Result<CorrectnessMetrics> {
    if actual.rows() != expected.rows() || actual.cols() != expected.cols() {
        return Err(Error::InvalidShape(format!(
            "Cannot compare {}x{} with {}x{}",
            actual.rows(),
            actual.cols(),
            expected.rows(),
            expected.cols()
        )));
    }

    let mut max_abs_difference = 0.0f64;
    let mut max_rel_difference = 0.0f64;
    let mut squared_sum = 0.0f64;
    let mut mismatches = 0;
    let mut first_mismatch = None;

    for ((index, &a), &e) in actual.as_array().indexed_iter().zip(expected.as_array().iter()) {
        let a = a.to_f64().unwrap_or(f64::NAN);
        let e = e.to_f64().unwrap_or(f64::NAN);
        let diff = (a - e).abs();
        let scale = a.abs().max(e.abs());
        let rel = if scale > 0.0 { diff / scale } else { 0.0 };

        max_abs_difference = max_abs_difference.max(diff);
        max_rel_difference = max_rel_difference.max(rel);
        squared_sum += diff * diff;

        // NaN fails both comparisons
        if !(diff <= tolerance * scale || diff <= ABSOLUTE_FLOOR) {
            mismatches += 1;
            first_mismatch.get_or_insert(index);
        }
    }

    let count = actual.len().max(1) as f64;
    Ok(CorrectnessMetrics {
        outputs_match: mismatches == 0,
        max_abs_difference,
        max_rel_difference,
        rmse: (squared_sum / count).sqrt(),
        mismatches,
        first_mismatch,
        tolerance,
    })
}

/// Run the same convolution on two backends and compare the outputs,
/// treating `reference` as ground truth.
#[allow(clippy::too_many_arguments)]
pub fn compare_backends<T: Scalar>(
    conv: &Conv2d,
    reference: &dyn ConvolutionBackend<T>,
    candidate: &dyn ConvolutionBackend<T>,
    image: &Matrix<T>,
    image_shape: BlockShape,
    filter: &Matrix<T>,
    filter_shape: BlockShape,
    tolerance: f64,
) -> Result<CorrectnessMetrics> {
    let (mut expected, output_shape) =
        conv.allocate_output(image, image_shape, filter, filter_shape)?;
    let mut actual = expected.clone();

    conv.compute(reference, image, filter, &mut expected, image_shape, filter_shape, output_shape)?;
    conv.compute(candidate, image, filter, &mut actual, image_shape, filter_shape, output_shape)?;

    let metrics = compare_matrices(&actual, &expected, tolerance)?;
    if !metrics.outputs_match {
        log::warn!(
            "{} disagrees with {} on {} elements (max rel diff {:.3e})",
            candidate.name(),
            reference.name(),
            metrics.mismatches,
            metrics.max_rel_difference
        );
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::backend::{ParallelBackend, ReferenceBackend};

    #[test]
    fn test_identical_matrices_match() {
        let m = Matrix::from_shape_vec(2, 2, vec![1.0f32, -2.0, 0.0, 3.0]).unwrap();
        let metrics = compare_matrices(&m, &m, DEFAULT_RELATIVE_TOLERANCE).unwrap();
        assert!(metrics.outputs_match);
        assert_eq!(metrics.max_abs_difference, 0.0);
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.first_mismatch, None);
    }

    #[test]
    fn test_relative_tolerance() {
        let expected = Matrix::from_shape_vec(1, 3, vec![100.0f64, 1.0, 0.0]).unwrap();
        let close = Matrix::from_shape_vec(1, 3, vec![100.5f64, 1.005, 0.00001]).unwrap();
        assert!(compare_matrices(&close, &expected, 1e-2).unwrap().outputs_match);

        let far = Matrix::from_shape_vec(1, 3, vec![100.5f64, 1.5, 0.0]).unwrap();
        let metrics = compare_matrices(&far, &expected, 1e-2).unwrap();
        assert!(!metrics.outputs_match);
        assert_eq!(metrics.mismatches, 1);
        assert_eq!(metrics.first_mismatch, Some((0, 1)));
        assert!((metrics.max_abs_difference - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_nan_never_matches() {
        let expected = Matrix::new(1, 1, 1.0f32);
        let actual = Matrix::new(1, 1, f32::NAN);
        assert!(!compare_matrices(&actual, &expected, 1.0).unwrap().outputs_match);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Matrix::<f32>::zeros(2, 3);
        let b = Matrix::<f32>::zeros(3, 2);
        assert!(matches!(compare_matrices(&a, &b, 1e-2), Err(Error::InvalidShape(_))));
    }

    #[test]
    fn test_compare_backends() {
        let image_shape = BlockShape::new(2, 5, 4);
        let filter_shape = BlockShape::new(2, 2, 3);
        let image = Matrix::from_shape_vec(
            3,
            image_shape.row_len(),
            (0..3 * image_shape.row_len()).map(|v| (v as f32 * 0.37).cos()).collect(),
        )
        .unwrap();
        let filter = Matrix::from_shape_vec(
            2,
            filter_shape.row_len(),
            (0..2 * filter_shape.row_len()).map(|v| (v as f32 * 0.71).sin()).collect(),
        )
        .unwrap();

        let parallel = ParallelBackend::new(2, 0).unwrap();
        let conv = Conv2d::new().with_padding(1, 2).with_flip(true);
        let metrics = compare_backends(
            &conv,
            &ReferenceBackend,
            &parallel,
            &image,
            image_shape,
            &filter,
            filter_shape,
            DEFAULT_RELATIVE_TOLERANCE,
        )
        .unwrap();
        assert!(metrics.outputs_match, "{:?}", metrics);
    }
}
