//! # 2D Convolution
//!
//! Direct, unit-stride 2D convolution over batched multi-channel images stored
//! as 2D block buffers (see [`BlockShape`] and [`ImageFormat`]).
//!
//! Image, filter and output each carry their own block ordering, so all 8
//! combinations of `NCHW`/`CNHW` are accepted. Padding is implicit: reads
//! outside the image return zero, with the border split decided by
//! [`PaddingSplit::for_flip`]. With `flip` set the kernel is rotated by 180°,
//! turning the default cross-correlation into a true convolution.
//!
//! The computation itself is done by an execution backend
//! ([`ConvolutionBackend`]); this module validates the call and resolves it
//! into a [`ConvProblem`] that every backend indexes through.
//!
//! ## Usage Example:
//! ```rust
//! use image_conv::{BlockShape, Conv2d, Matrix, ReferenceBackend};
//!
//! // one 1-channel 3x3 image, one 2x2 filter
//! let image = Matrix::from_shape_vec(1, 9, (1..=9).map(|v| v as f32).collect())?;
//! let filter = Matrix::from_shape_vec(1, 4, vec![1.0f32, 2.0, 3.0, 4.0])?;
//!
//! let conv = Conv2d::default();
//! let image_shape = BlockShape::new(1, 3, 3);
//! let filter_shape = BlockShape::new(1, 2, 2);
//! let (mut output, output_shape) =
//!     conv.allocate_output(&image, image_shape, &filter, filter_shape)?;
//!
//! conv.compute(&ReferenceBackend, &image, &filter, &mut output,
//!              image_shape, filter_shape, output_shape)?;
//! assert_eq!(output.get(0, 0), 37.0);
//! # Ok::<(), image_conv::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::execution::backend::ConvolutionBackend;
use crate::layout::tensor_layout::{BlockShape, ImageFormat, TensorLayout};
use crate::ops::nn::pad::PaddingSplit;
use crate::ops::tensor::{Matrix, Scalar};

/// Convolution configuration.
///
/// Padding amounts are totals per axis; they are split between the two
/// borders by [`PaddingSplit::for_flip`]`(flip)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Conv2d {
    /// Total rows of zero padding added to each image block
    pub pad_height: usize,
    /// Total columns of zero padding added to each image block
    pub pad_width: usize,
    pub image_format: ImageFormat,
    pub filter_format: ImageFormat,
    pub output_format: ImageFormat,
    /// Rotate the kernel by 180° (true convolution instead of cross-correlation)
    pub flip: bool,
}

impl Conv2d {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total padding per axis
    pub fn with_padding(mut self, pad_height: usize, pad_width: usize) -> Self {
        self.pad_height = pad_height;
        self.pad_width = pad_width;
        self
    }

    /// Pad by `filter - 1` so that the output keeps the image's spatial size
    pub fn with_same_padding(self, filter_height: usize, filter_width: usize) -> Self {
        self.with_padding(
            filter_height.saturating_sub(1),
            filter_width.saturating_sub(1),
        )
    }

    /// Set the block ordering of image, filter and output buffers
    pub fn with_formats(
        mut self,
        image_format: ImageFormat,
        filter_format: ImageFormat,
        output_format: ImageFormat,
    ) -> Self {
        self.image_format = image_format;
        self.filter_format = filter_format;
        self.output_format = output_format;
        self
    }

    pub fn with_flip(mut self, flip: bool) -> Self {
        self.flip = flip;
        self
    }

    /// Validate buffers and descriptors and resolve the logical problem.
    pub fn resolve<T: Scalar>(
        &self,
        image: &Matrix<T>,
        filter: &Matrix<T>,
        output: &Matrix<T>,
        image_shape: BlockShape,
        filter_shape: BlockShape,
        output_shape: BlockShape,
    ) -> Result<ConvProblem> {
        let problem = self.resolve_inputs(image, image_shape, filter, filter_shape)?;

        output_shape.check_row_length(output.cols())?;
        let output_layout = TensorLayout::new(self.output_format, output_shape);
        let (out_batch, out_filters) = output_layout.axis_sizes(output.rows());
        if out_batch != problem.batch || out_filters != problem.filters {
            return Err(Error::InvalidShape(format!(
                "Output holds {} samples x {} filters, expected {} x {}",
                out_batch, out_filters, problem.batch, problem.filters
            )));
        }
        if output_shape.height != problem.output.shape.height
            || output_shape.width != problem.output.shape.width
        {
            return Err(Error::InvalidShape(format!(
                "Output blocks are {}x{}, expected {}x{} (image {}x{}, filter {}x{}, padding {}x{})",
                output_shape.height,
                output_shape.width,
                problem.output.shape.height,
                problem.output.shape.width,
                image_shape.height,
                image_shape.width,
                filter_shape.height,
                filter_shape.width,
                self.pad_height,
                self.pad_width
            )));
        }

        Ok(problem)
    }

    /// Validate image and filter and derive the output geometry.
    fn resolve_inputs<T: Scalar>(
        &self,
        image: &Matrix<T>,
        image_shape: BlockShape,
        filter: &Matrix<T>,
        filter_shape: BlockShape,
    ) -> Result<ConvProblem> {
        image_shape.check_row_length(image.cols())?;
        filter_shape.check_row_length(filter.cols())?;

        let image_layout = TensorLayout::new(self.image_format, image_shape);
        let filter_layout = TensorLayout::new(self.filter_format, filter_shape);
        let (batch, channels) = image_layout.axis_sizes(image.rows());
        let (filters, filter_channels) = filter_layout.axis_sizes(filter.rows());

        if batch == 0 || channels == 0 || filters == 0 {
            return Err(Error::InvalidArgument(format!(
                "Convolution needs at least one sample, channel and filter, got {} / {} / {}",
                batch, channels, filters
            )));
        }
        if channels != filter_channels {
            return Err(Error::InvalidShape(format!(
                "Image has {} channels but filter has {}",
                channels, filter_channels
            )));
        }

        let output_shape = self.output_shape(image_shape, filter_shape, batch, filters)?;
        let (pad_top, pad_left) =
            PaddingSplit::for_flip(self.flip).offsets(self.pad_height, self.pad_width);

        Ok(ConvProblem {
            batch,
            channels,
            filters,
            image: image_layout,
            filter: filter_layout,
            output: TensorLayout::new(self.output_format, output_shape),
            pad_top,
            pad_left,
            flip: self.flip,
        })
    }

    /// Output descriptor for `batch` samples convolved with `filters` filters:
    /// blocks of `(h + pad_h - fh + 1) x (w + pad_w - fw + 1)`, one per filter
    /// for `NCHW` output and one per sample for `CNHW`.
    pub fn output_shape(
        &self,
        image_shape: BlockShape,
        filter_shape: BlockShape,
        batch: usize,
        filters: usize,
    ) -> Result<BlockShape> {
        let padded = image_shape.padded(self.pad_height, self.pad_width)?;
        let (padded_height, padded_width) = (padded.height, padded.width);
        if filter_shape.height == 0 || filter_shape.width == 0 {
            return Err(Error::InvalidShape(format!(
                "Filter extent must be non-zero, got {}",
                filter_shape
            )));
        }
        if filter_shape.height > padded_height || filter_shape.width > padded_width {
            return Err(Error::InvalidShape(format!(
                "Filter {}x{} is larger than the padded image {}x{}",
                filter_shape.height, filter_shape.width, padded_height, padded_width
            )));
        }

        let blocks = match self.output_format {
            ImageFormat::NCHW => filters,
            ImageFormat::CNHW => batch,
        };
        let shape = BlockShape::new(
            blocks,
            padded_height - filter_shape.height + 1,
            padded_width - filter_shape.width + 1,
        );
        shape.checked_row_len()?;
        Ok(shape)
    }

    /// Allocate a zeroed output buffer of the right size for these inputs.
    pub fn allocate_output<T: Scalar>(
        &self,
        image: &Matrix<T>,
        image_shape: BlockShape,
        filter: &Matrix<T>,
        filter_shape: BlockShape,
    ) -> Result<(Matrix<T>, BlockShape)> {
        let problem = self.resolve_inputs(image, image_shape, filter, filter_shape)?;
        Ok((
            Matrix::try_zeros(problem.output_rows(), problem.output.shape.row_len())?,
            problem.output.shape,
        ))
    }

    /// Run the convolution on `backend`, overwriting `output`.
    ///
    /// All shape checks happen before the backend is invoked; on error the
    /// output contents are unspecified.
    #[allow(clippy::too_many_arguments)]
    pub fn compute<T: Scalar>(
        &self,
        backend: &dyn ConvolutionBackend<T>,
        image: &Matrix<T>,
        filter: &Matrix<T>,
        output: &mut Matrix<T>,
        image_shape: BlockShape,
        filter_shape: BlockShape,
        output_shape: BlockShape,
    ) -> Result<()> {
        let problem = self.resolve(image, filter, output, image_shape, filter_shape, output_shape)?;
        backend.supports(&problem)?;

        log::debug!(
            "conv2d on {}: batch={} channels={} filters={} image={}x{} filter={}x{} output={}x{} pad=({}, {}) formats=({}, {}, {}) flip={}",
            backend.name(),
            problem.batch,
            problem.channels,
            problem.filters,
            image_shape.height,
            image_shape.width,
            filter_shape.height,
            filter_shape.width,
            problem.output.shape.height,
            problem.output.shape.width,
            self.pad_height,
            self.pad_width,
            self.image_format,
            self.filter_format,
            self.output_format,
            self.flip
        );

        backend.run_convolution(&problem, image, filter, output)
    }
}

/// Convolve `image` with `filter` into `output`.
///
/// Function form of [`Conv2d::compute`]; see the module docs for the buffer
/// conventions.
#[allow(clippy::too_many_arguments)]
pub fn convolution<T: Scalar>(
    image: &Matrix<T>,
    filter: &Matrix<T>,
    output: &mut Matrix<T>,
    image_shape: BlockShape,
    filter_shape: BlockShape,
    output_shape: BlockShape,
    pad_height: usize,
    pad_width: usize,
    image_format: ImageFormat,
    filter_format: ImageFormat,
    output_format: ImageFormat,
    flip: bool,
    backend: &dyn ConvolutionBackend<T>,
) -> Result<()> {
    Conv2d::new()
        .with_padding(pad_height, pad_width)
        .with_formats(image_format, filter_format, output_format)
        .with_flip(flip)
        .compute(
            backend,
            image,
            filter,
            output,
            image_shape,
            filter_shape,
            output_shape,
        )
}

/// A validated convolution call.
///
/// Holds the logical sizes and the layouts of the three buffers. Backends
/// never compute buffer coordinates themselves; they go through
/// [`ConvProblem::image_position`], [`ConvProblem::filter_position`] and
/// [`ConvProblem::output_position`], which apply padding, flipping and the
/// block ordering of each buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvProblem {
    pub batch: usize,
    pub channels: usize,
    pub filters: usize,
    pub image: TensorLayout,
    pub filter: TensorLayout,
    pub output: TensorLayout,
    /// Zero rows above each image block
    pub pad_top: usize,
    /// Zero columns left of each image block
    pub pad_left: usize,
    pub flip: bool,
}

impl ConvProblem {
    pub fn filter_height(&self) -> usize {
        self.filter.shape.height
    }

    pub fn filter_width(&self) -> usize {
        self.filter.shape.width
    }

    pub fn output_height(&self) -> usize {
        self.output.shape.height
    }

    pub fn output_width(&self) -> usize {
        self.output.shape.width
    }

    /// Length of one unrolled kernel, `channels * filter_height * filter_width`.
    pub fn patch_len(&self) -> usize {
        self.channels * self.filter.shape.block_len()
    }

    pub fn image_rows(&self) -> usize {
        match self.image.format {
            ImageFormat::NCHW => self.batch,
            ImageFormat::CNHW => self.channels,
        }
    }

    pub fn filter_rows(&self) -> usize {
        match self.filter.format {
            ImageFormat::NCHW => self.filters,
            ImageFormat::CNHW => self.channels,
        }
    }

    pub fn output_rows(&self) -> usize {
        match self.output.format {
            ImageFormat::NCHW => self.batch,
            ImageFormat::CNHW => self.filters,
        }
    }

    /// Buffer position of padded image element `(y, x)` of sample `n`,
    /// channel `c`, or `None` if it falls in the zero border.
    #[inline]
    pub fn image_position(&self, n: usize, c: usize, y: usize, x: usize) -> Option<(usize, usize)> {
        let y = y.checked_sub(self.pad_top)?;
        let x = x.checked_sub(self.pad_left)?;
        if y >= self.image.shape.height || x >= self.image.shape.width {
            return None;
        }
        Some(self.image.position(n, c, y, x))
    }

    /// Buffer position of kernel tap `(i0, j0)` of filter `f`, channel `c`,
    /// after the optional 180° flip.
    #[inline]
    pub fn filter_position(&self, f: usize, c: usize, i0: usize, j0: usize) -> (usize, usize) {
        if self.flip {
            self.filter.position(
                f,
                c,
                self.filter.shape.height - 1 - i0,
                self.filter.shape.width - 1 - j0,
            )
        } else {
            self.filter.position(f, c, i0, j0)
        }
    }

    /// Buffer position of output element `(i, j)` of sample `n`, filter `f`.
    #[inline]
    pub fn output_position(&self, n: usize, f: usize, i: usize, j: usize) -> (usize, usize) {
        self.output.position(n, f, i, j)
    }

    /// Check that buffers match the sizes this problem was resolved for.
    pub fn check_buffers<T: Scalar>(
        &self,
        image: &Matrix<T>,
        filter: &Matrix<T>,
        output: &Matrix<T>,
    ) -> Result<()> {
        let expected = [
            ("image", image, self.image_rows(), self.image.shape.row_len()),
            ("filter", filter, self.filter_rows(), self.filter.shape.row_len()),
            ("output", output, self.output_rows(), self.output.shape.row_len()),
        ];
        for (name, buffer, rows, cols) in expected {
            if buffer.rows() != rows || buffer.cols() != cols {
                return Err(Error::InvalidShape(format!(
                    "{} buffer is {}x{}, expected {}x{}",
                    name,
                    buffer.rows(),
                    buffer.cols(),
                    rows,
                    cols
                )));
            }
        }
        Ok(())
    }
}
