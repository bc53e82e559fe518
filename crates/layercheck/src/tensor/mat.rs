//! Backend-agnostic host tensors used as the canonical exchange format.

use half::bf16;

use super::dims;
use crate::backend::spec::{BackendError, BackendResult};

/// Canonical encodings a [`Mat`] can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatType {
    /// NCHW float32.
    NchwFloat,
    /// NCHW bfloat16, used to feed and read bfloat16 blobs without rounding twice.
    Bfp16Test,
    /// NCHW raw int8, used to feed and read quantized blobs bit-exactly.
    Int8Test,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatData {
    Float(Vec<f32>),
    Bfp16(Vec<bf16>),
    Int8(Vec<i8>),
}

impl MatData {
    pub fn len(&self) -> usize {
        match self {
            MatData::Float(values) => values.len(),
            MatData::Bfp16(values) => values.len(),
            MatData::Int8(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mat_type(&self) -> MatType {
        match self {
            MatData::Float(_) => MatType::NchwFloat,
            MatData::Bfp16(_) => MatType::Bfp16Test,
            MatData::Int8(_) => MatType::Int8Test,
        }
    }

    /// Element `index` widened to `f32`.
    pub fn get_f32(&self, index: usize) -> f32 {
        match self {
            MatData::Float(values) => values[index],
            MatData::Bfp16(values) => values[index].to_f32(),
            MatData::Int8(values) => values[index] as f32,
        }
    }
}

/// Host tensor in NCHW order.
#[derive(Debug, Clone, PartialEq)]
pub struct Mat {
    dims: Vec<usize>,
    data: MatData,
}

impl Mat {
    /// Zero-filled mat of the given encoding.
    pub fn new(mat_type: MatType, dims: impl Into<Vec<usize>>) -> Self {
        let dims = dims.into();
        let count = dims::count(&dims);
        let data = match mat_type {
            MatType::NchwFloat => MatData::Float(vec![0.0; count]),
            MatType::Bfp16Test => MatData::Bfp16(vec![bf16::ZERO; count]),
            MatType::Int8Test => MatData::Int8(vec![0; count]),
        };
        Self { dims, data }
    }

    pub fn from_data(dims: impl Into<Vec<usize>>, data: MatData) -> BackendResult<Self> {
        let dims = dims.into();
        let expected = dims::count(&dims);
        if data.len() != expected {
            return Err(BackendError::invalid_blob(format!(
                "mat with dims {dims:?} expects {expected} elements but got {}",
                data.len()
            )));
        }
        Ok(Self { dims, data })
    }

    pub fn from_f32(dims: impl Into<Vec<usize>>, values: Vec<f32>) -> BackendResult<Self> {
        Self::from_data(dims, MatData::Float(values))
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn mat_type(&self) -> MatType {
        self.data.mat_type()
    }

    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &MatData {
        &self.data
    }

    pub(crate) fn replace_data(&mut self, data: MatData) {
        self.data = data;
    }

    /// Returns every element widened to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        (0..self.element_count())
            .map(|idx| self.data.get_f32(idx))
            .collect()
    }

    /// First `count` elements widened to `f32`, for diagnostics.
    pub fn head(&self, count: usize) -> Vec<f32> {
        (0..count.min(self.element_count()))
            .map(|idx| self.data.get_f32(idx))
            .collect()
    }
}
