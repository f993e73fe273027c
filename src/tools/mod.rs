// tools module

pub mod comparison;

pub use comparison::{compare_backends, compare_matrices, CorrectnessMetrics};
