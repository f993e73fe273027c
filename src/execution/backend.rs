use std::fmt;
use std::mem;

use ndarray::{linalg::general_mat_mul, Array2, ArrayView2, ArrayViewMut2};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};
use crate::layout::tensor_layout::{reorder_blocks, BlockShape, ImageFormat};
use crate::memory::device::{to_device, to_host, DeviceMatrix};
use crate::ops::nn::conv::ConvProblem;
use crate::ops::tensor::{Matrix, Scalar};

/// An execution target for [`ConvProblem`]s.
///
/// Every backend must produce the result of [`ReferenceBackend`] up to
/// floating-point reordering.
pub trait ConvolutionBackend<T: Scalar>: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Reject problems this backend cannot run, before any work is done.
    fn supports(&self, _problem: &ConvProblem) -> Result<()> {
        Ok(())
    }

    /// Compute the convolution, overwriting `output`.
    fn run_convolution(
        &self,
        problem: &ConvProblem,
        image: &Matrix<T>,
        filter: &Matrix<T>,
        output: &mut Matrix<T>,
    ) -> Result<()>;
}

/// Sequential nested-loop convolution on the host.
///
/// Deterministic: it accumulates filter by filter, then channel by channel,
/// then over the kernel taps. Other backends are checked against it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBackend;

impl<T: Scalar> ConvolutionBackend<T> for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn run_convolution(
        &self,
        problem: &ConvProblem,
        image: &Matrix<T>,
        filter: &Matrix<T>,
        output: &mut Matrix<T>,
    ) -> Result<()> {
        problem.check_buffers(image, filter, output)?;

        let filter_height = problem.filter_height();
        let filter_width = problem.filter_width();

        output.fill(T::zero());
        for n in 0..problem.batch {
            for f in 0..problem.filters {
                for c in 0..problem.channels {
                    for i in 0..problem.output_height() {
                        for j in 0..problem.output_width() {
                            let mut sum = T::zero();
                            for i0 in 0..filter_height {
                                for j0 in 0..filter_width {
                                    // zero padding contributes nothing
                                    if let Some((row, col)) = problem.image_position(n, c, i + i0, j + j0) {
                                        let (f_row, f_col) = problem.filter_position(f, c, i0, j0);
                                        sum = sum + image.get(row, col) * filter.get(f_row, f_col);
                                    }
                                }
                            }
                            let (o_row, o_col) = problem.output_position(n, f, i, j);
                            output.set(o_row, o_col, output.get(o_row, o_col) + sum);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Data-parallel convolution on accelerator memory.
///
/// Inputs are staged into [`DeviceMatrix`] buffers. Each sample is one unit
/// of work: its image patches are unrolled (im2col) and multiplied with the
/// unrolled kernel matrix, and the product is written straight into that
/// sample's own chunk of a canonical `NCHW` output buffer. The chunks are
/// disjoint, so no synchronisation is needed. The result is reordered to the
/// requested output format and transferred back to the host.
#[derive(Debug)]
pub struct ParallelBackend {
    pool: ThreadPool,
    /// Upper bound for the unrolled patch and kernel matrices, 0 for none
    workspace_limit_bytes: usize,
}

impl ParallelBackend {
    /// Create a backend running on `thread_count` worker threads (0 lets
    /// rayon choose).
    pub fn new(thread_count: usize, workspace_limit_bytes: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .thread_name(|index| format!("conv-worker-{}", index))
            .build()
            .map_err(|e| Error::Device(format!("Failed to start worker pool: {}", e)))?;

        log::debug!(
            "Started parallel convolution backend with {} threads",
            pool.current_num_threads()
        );

        Ok(Self {
            pool,
            workspace_limit_bytes,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Bytes of scratch memory a problem needs: the unrolled kernel plus one
    /// patch matrix per worker thread.
    pub fn workspace_bytes<T: Scalar>(&self, problem: &ConvProblem) -> Result<usize> {
        let concurrent = self.thread_count().min(problem.batch).max(1);
        problem
            .patch_len()
            .checked_mul(problem.output.shape.block_len())
            .and_then(|patch_elems| patch_elems.checked_mul(concurrent))
            .and_then(|patches| {
                problem
                    .filters
                    .checked_mul(problem.patch_len())
                    .and_then(|kernel_elems| kernel_elems.checked_add(patches))
            })
            .and_then(|elems| elems.checked_mul(mem::size_of::<T>()))
            .ok_or_else(|| {
                Error::UnsupportedConfiguration(
                    "Convolution workspace overflows the address space".to_string(),
                )
            })
    }
}

impl<T: Scalar> ConvolutionBackend<T> for ParallelBackend {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn supports(&self, problem: &ConvProblem) -> Result<()> {
        let needed = self.workspace_bytes::<T>(problem)?;
        if self.workspace_limit_bytes != 0 && needed > self.workspace_limit_bytes {
            return Err(Error::UnsupportedConfiguration(format!(
                "Convolution needs {} bytes of workspace, limit is {}",
                needed, self.workspace_limit_bytes
            )));
        }
        Ok(())
    }

    fn run_convolution(
        &self,
        problem: &ConvProblem,
        image: &Matrix<T>,
        filter: &Matrix<T>,
        output: &mut Matrix<T>,
    ) -> Result<()> {
        problem.check_buffers(image, filter, output)?;
        ConvolutionBackend::<T>::supports(self, problem)?;

        let image_device = to_device(image)?;
        let filter_device = to_device(filter)?;

        let out_len = problem.output.shape.block_len();
        let sample_len = problem.filters * out_len;
        let mut output_device = DeviceMatrix::zeros(problem.batch, sample_len)?;

        let kernel = unroll_kernel(problem, &filter_device.view()?);
        let image_view = image_device.view()?;

        self.pool.install(|| {
            output_device
                .as_mut_slice()
                .par_chunks_mut(sample_len)
                .enumerate()
                .try_for_each(|(n, chunk)| -> Result<()> {
                    let patches = unroll_patches(problem, &image_view, n);
                    let mut product = ArrayViewMut2::from_shape((problem.filters, out_len), chunk)
                        .map_err(|e| Error::Device(format!("Invalid output chunk: {}", e)))?;
                    general_mat_mul(T::one(), &kernel, &patches, T::zero(), &mut product);
                    Ok(())
                })
        })?;

        let canonical = to_host(&output_device)?;
        let result = match problem.output.format {
            ImageFormat::NCHW => canonical,
            ImageFormat::CNHW => {
                let shape = BlockShape::new(
                    problem.filters,
                    problem.output_height(),
                    problem.output_width(),
                );
                reorder_blocks(&canonical, shape)?.0
            }
        };
        output.as_array_mut().assign(result.as_array());
        Ok(())
    }
}

/// Kernel matrix of `filters x (channels * fh * fw)`, flip applied, in
/// filter-major order regardless of the filter buffer's layout.
fn unroll_kernel<T: Scalar>(problem: &ConvProblem, filter: &ArrayView2<'_, T>) -> Array2<T> {
    let filter_height = problem.filter_height();
    let filter_width = problem.filter_width();
    Array2::from_shape_fn((problem.filters, problem.patch_len()), |(f, k)| {
        let c = k / (filter_height * filter_width);
        let i0 = (k / filter_width) % filter_height;
        let j0 = k % filter_width;
        let (row, col) = problem.filter_position(f, c, i0, j0);
        filter[[row, col]]
    })
}

/// Patch matrix of `(channels * fh * fw) x (oh * ow)` for sample `n`; column
/// `i * ow + j` holds the receptive field of output pixel `(i, j)`.
fn unroll_patches<T: Scalar>(problem: &ConvProblem, image: &ArrayView2<'_, T>, n: usize) -> Array2<T> {
    let filter_height = problem.filter_height();
    let filter_width = problem.filter_width();
    let output_width = problem.output_width();
    Array2::from_shape_fn(
        (problem.patch_len(), problem.output.shape.block_len()),
        |(k, p)| {
            let c = k / (filter_height * filter_width);
            let i0 = (k / filter_width) % filter_height;
            let j0 = k % filter_width;
            let i = p / output_width;
            let j = p % output_width;
            match problem.image_position(n, c, i + i0, j + j0) {
                Some((row, col)) => image[[row, col]],
                None => T::zero(),
            }
        },
    )
}
