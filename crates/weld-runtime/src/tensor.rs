//! User-facing tensor type for host data interchange.

use crate::error::{Result, RuntimeError};
use bytemuck::Pod;
use weld_core::DataType;

/// Largest integer magnitude an `f64` lane holds exactly.
pub const MAX_EXACT_LANE: i64 = 1 << 53;

/// Rust element types a [`Tensor`] can be built from.
pub trait Element: Pod + std::fmt::Debug {
    const DTYPE: DataType;

    /// Widen to an `f64` lane; `None` if the value has no exact lane.
    fn to_lane(self) -> Option<f64>;

    fn from_lane(lane: f64) -> Self;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::F32;

    fn to_lane(self) -> Option<f64> {
        Some(f64::from(self))
    }

    fn from_lane(lane: f64) -> Self {
        lane as f32
    }
}

impl Element for i64 {
    const DTYPE: DataType = DataType::I64;

    fn to_lane(self) -> Option<f64> {
        (self.unsigned_abs() <= MAX_EXACT_LANE as u64).then_some(self as f64)
    }

    fn from_lane(lane: f64) -> Self {
        lane as i64
    }
}

impl Element for i32 {
    const DTYPE: DataType = DataType::I32;

    fn to_lane(self) -> Option<f64> {
        Some(f64::from(self))
    }

    fn from_lane(lane: f64) -> Self {
        lane as i32
    }
}

impl Element for u8 {
    const DTYPE: DataType = DataType::U8;

    fn to_lane(self) -> Option<f64> {
        Some(f64::from(self))
    }

    fn from_lane(lane: f64) -> Self {
        lane as u8
    }
}

/// User-facing tensor for input/output data.
///
/// Data is kept as raw bytes in logical row-major order; the executor works
/// on `f64` lanes and converts on the way in and out.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<u8>,
    shape: Vec<usize>,
    dtype: DataType,
}

impl Tensor {
    /// Create a tensor from a vector with a given shape.
    ///
    /// # Example
    /// ```
    /// # use weld_runtime::Tensor;
    /// let data = vec![1.0f32, 2.0, 3.0, 4.0];
    /// let tensor = Tensor::from_vec(data, &[2, 2]);
    /// assert_eq!(tensor.len(), 4);
    /// ```
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );

        Self {
            data: bytemuck::cast_slice(&data).to_vec(),
            shape: shape.to_vec(),
            dtype: T::DTYPE,
        }
    }

    /// Build a tensor of `dtype` from `f64` lanes.
    pub fn from_lanes(lanes: &[f64], shape: &[usize], dtype: DataType) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if lanes.len() != expected_len {
            return Err(RuntimeError::TensorError(format!(
                "{} values for shape {shape:?}",
                lanes.len()
            )));
        }
        let data = match dtype {
            DataType::F32 => encode::<f32>(lanes),
            DataType::I64 => encode::<i64>(lanes),
            DataType::I32 => encode::<i32>(lanes),
            DataType::U8 => encode::<u8>(lanes),
            DataType::F16 => return Err(unsupported(dtype)),
        };
        Ok(Self {
            data,
            shape: shape.to_vec(),
            dtype,
        })
    }

    /// Convert tensor to a Vec.
    ///
    /// # Errors
    /// Returns an error if `T` is not the tensor's element type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(RuntimeError::TensorError(format!(
                "tensor holds {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(self
            .data
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect())
    }

    /// Element values widened to `f64` lanes.
    ///
    /// # Errors
    /// Fails for `i64` values beyond [`MAX_EXACT_LANE`] in magnitude and for
    /// element types the host does not support.
    pub fn to_lanes(&self) -> Result<Vec<f64>> {
        match self.dtype {
            DataType::F32 => decode::<f32>(&self.data),
            DataType::I64 => decode::<i64>(&self.data),
            DataType::I32 => decode::<i32>(&self.data),
            DataType::U8 => decode::<u8>(&self.data),
            DataType::F16 => Err(unsupported(self.dtype)),
        }
    }

    /// Get raw bytes of the tensor data.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Get the total number of elements in the tensor.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check if the tensor is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn encode<T: Element>(lanes: &[f64]) -> Vec<u8> {
    let values: Vec<T> = lanes.iter().map(|&lane| T::from_lane(lane)).collect();
    bytemuck::cast_slice(&values).to_vec()
}

fn decode<T: Element>(bytes: &[u8]) -> Result<Vec<f64>> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(|chunk| {
            let value = bytemuck::pod_read_unaligned::<T>(chunk);
            value.to_lane().ok_or_else(|| {
                RuntimeError::TensorError(format!(
                    "{} value {value:?} has no exact host lane",
                    T::DTYPE
                ))
            })
        })
        .collect()
}

fn unsupported(dtype: DataType) -> RuntimeError {
    RuntimeError::TensorError(format!("{dtype} tensors are not supported on the host"))
}
