pub mod device;

pub use device::{
    DeviceMatrix,
    to_device,
    to_host,
};
