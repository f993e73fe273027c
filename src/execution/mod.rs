pub mod backend;
pub mod context;

pub use backend::{ConvolutionBackend, ParallelBackend, ReferenceBackend};
pub use context::{create_backend, BackendKind, ExecutionOptions};
