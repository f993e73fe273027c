pub mod tensor;

pub use tensor::{Matrix, Scalar};

// Module files for nn subdirectory
pub mod nn {
    pub mod conv;
    pub mod flip;
    pub mod pad;
}
