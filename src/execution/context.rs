use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Result;
use crate::execution::backend::{ConvolutionBackend, ParallelBackend, ReferenceBackend};
use crate::ops::tensor::Scalar;

/// Which execution backend runs the convolution
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    /// Sequential nested loops on the host; the numerical reference
    Reference,
    /// Data-parallel im2col + GEMM on staged device buffers
    #[default]
    Parallel,
}

/// Options for convolution execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Backend to create
    pub backend: BackendKind,
    /// Number of threads to use (0 = use system default)
    pub thread_count: usize,
    /// Maximum temporary memory of the parallel backend (0 = no limit)
    pub workspace_size_bytes: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Parallel,
            thread_count: 0, // Use system default
            workspace_size_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl ExecutionOptions {
    /// Create a new execution options object
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from JSON; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Select the backend
    pub fn set_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the number of threads to use
    pub fn set_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Set the workspace size
    pub fn set_workspace_size(mut self, workspace_size_bytes: usize) -> Self {
        self.workspace_size_bytes = workspace_size_bytes;
        self
    }
}

/// Instantiate the backend described by `options`.
pub fn create_backend<T: Scalar>(
    options: &ExecutionOptions,
) -> Result<Box<dyn ConvolutionBackend<T>>> {
    log::debug!("Creating {} convolution backend", options.backend);
    match options.backend {
        BackendKind::Reference => Ok(Box::new(ReferenceBackend)),
        BackendKind::Parallel => Ok(Box::new(ParallelBackend::new(
            options.thread_count,
            options.workspace_size_bytes,
        )?)),
    }
}
