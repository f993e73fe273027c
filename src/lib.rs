pub mod error;
pub mod ops;
pub mod execution;
pub mod memory;
pub mod tools;

pub mod layout {
    pub mod tensor_layout;
}

// Re-export commonly used types
pub use error::{Error, Result};
pub use layout::tensor_layout::{
    reorder_blocks, to_channel_major, to_outer_major, BlockShape, ImageFormat, TensorLayout,
};
pub use ops::tensor::{Matrix, Scalar};
pub use ops::nn::conv::{convolution, Conv2d, ConvProblem};
pub use ops::nn::flip::flip_filter;
pub use ops::nn::pad::{pad_zero, PaddingSplit};
pub use execution::backend::{ConvolutionBackend, ParallelBackend, ReferenceBackend};
pub use execution::context::{create_backend, BackendKind, ExecutionOptions};
pub use memory::device::{to_device, to_host, DeviceMatrix};
pub use tools::comparison::{compare_backends, compare_matrices, CorrectnessMetrics};
