use std::fmt;

use ndarray::{ArrayView2, ArrayViewMut2};

use crate::error::{Error, Result};
use crate::ops::tensor::{Matrix, Scalar};

/// Matrix resident in accelerator-addressable memory.
///
/// Storage is a single contiguous allocation owned by this value; transfers
/// in and out always produce a fresh buffer, so a `DeviceMatrix` never
/// aliases a host [`Matrix`].
pub struct DeviceMatrix<T = f32> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T: Scalar> fmt::Debug for DeviceMatrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMatrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

impl<T: Scalar> DeviceMatrix<T> {
    /// Allocate a zero-filled `rows x cols` device buffer.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows.checked_mul(cols).ok_or_else(|| {
            Error::Device(format!("Buffer of {}x{} elements overflows", rows, cols))
        })?;
        let mut data = allocate::<T>(len)?;
        data.resize(len, T::zero());
        Ok(Self { data, rows, cols })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// 2D view of the whole buffer.
    pub fn view(&self) -> Result<ArrayView2<'_, T>> {
        ArrayView2::from_shape((self.rows, self.cols), &self.data)
            .map_err(|e| Error::Device(format!("Invalid device buffer: {}", e)))
    }

    /// Mutable 2D view of the whole buffer.
    pub fn view_mut(&mut self) -> Result<ArrayViewMut2<'_, T>> {
        ArrayViewMut2::from_shape((self.rows, self.cols), &mut self.data)
            .map_err(|e| Error::Device(format!("Invalid device buffer: {}", e)))
    }
}

fn allocate<T>(len: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        Error::Device(format!("Failed to allocate {} device elements: {}", len, e))
    })?;
    Ok(data)
}

/// Copy a host matrix into a newly allocated device buffer.
///
/// Returns once the copy is complete; the result is safe to compute on.
pub fn to_device<T: Scalar>(host: &Matrix<T>) -> Result<DeviceMatrix<T>> {
    let mut data = allocate::<T>(host.len())?;
    data.extend(host.as_array().iter().copied());
    log::trace!("Transferred {}x{} matrix to device", host.rows(), host.cols());
    Ok(DeviceMatrix {
        data,
        rows: host.rows(),
        cols: host.cols(),
    })
}

/// Copy a device buffer back into a newly allocated host matrix.
pub fn to_host<T: Scalar>(device: &DeviceMatrix<T>) -> Result<Matrix<T>> {
    let mut data = allocate::<T>(device.data.len())?;
    data.extend_from_slice(&device.data);
    log::trace!("Transferred {}x{} matrix to host", device.rows, device.cols);
    Matrix::from_shape_vec(device.rows, device.cols, data)
        .map_err(|e| Error::Device(format!("Transfer to host failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_produces_equal_copy() {
        let host = Matrix::from_shape_vec(2, 3, vec![1.0f32, -2.0, 3.5, 0.0, 8.0, -1.25]).unwrap();
        let device = to_device(&host).unwrap();
        assert_eq!(device.rows(), 2);
        assert_eq!(device.cols(), 3);
        assert_eq!(device.as_slice()[2], 3.5);

        let back = to_host(&device).unwrap();
        assert_eq!(back, host);
    }

    #[test]
    fn test_device_buffer_is_independent() {
        let host = Matrix::new(2, 2, 1.0f64);
        let mut device = to_device(&host).unwrap();
        device.as_mut_slice()[0] = 9.0;
        assert_eq!(host.get(0, 0), 1.0);

        device.view_mut().unwrap()[[1, 1]] = 4.0;
        assert_eq!(device.view().unwrap()[[1, 1]], 4.0);
        assert_eq!(to_host(&device).unwrap().get(0, 0), 9.0);
    }

    #[test]
    fn test_zeros_and_overflow() {
        let device = DeviceMatrix::<f32>::zeros(3, 4).unwrap();
        assert!(device.as_slice().iter().all(|&v| v == 0.0));

        let err = DeviceMatrix::<f32>::zeros(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }
}
