//! Element types a blob can be stored in, with their byte codecs.

use std::fmt;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use super::mat::MatType;

/// Element type of a blob's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 32-bit IEEE-754 float.
    Float,
    /// 16-bit IEEE-754 half precision.
    Half,
    /// bfloat16: float32 exponent range with a 7-bit mantissa.
    Bfp16,
    /// Signed 8-bit quantized values paired with a per-channel scale resource.
    Int8,
    /// 32-bit signed integers, used for index tensors.
    Int32,
}

impl DataType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Float | DataType::Int32 => 4,
            DataType::Half | DataType::Bfp16 => 2,
            DataType::Int8 => 1,
        }
    }

    /// Storage type of the reference half of a pair whose candidate uses `self`.
    ///
    /// bfloat16 candidates are checked against a full-precision reference;
    /// every other type is mirrored as declared.
    pub fn reference_type(self) -> DataType {
        match self {
            DataType::Bfp16 => DataType::Float,
            other => other,
        }
    }

    /// Canonical host encoding used to generate and compare this type.
    pub fn mat_type(self) -> Option<MatType> {
        match self {
            DataType::Float | DataType::Half => Some(MatType::NchwFloat),
            DataType::Bfp16 => Some(MatType::Bfp16Test),
            DataType::Int8 => Some(MatType::Int8Test),
            DataType::Int32 => None,
        }
    }

    pub fn tolerance(self) -> Option<Tolerance> {
        match self {
            DataType::Float | DataType::Half => Some(Tolerance::Absolute(0.01)),
            DataType::Bfp16 => Some(Tolerance::Absolute(0.05)),
            DataType::Int8 => Some(Tolerance::Exact),
            DataType::Int32 => None,
        }
    }

    /// Reads element `index` of a buffer stored as `self`.
    ///
    /// Quantized types return the raw stored integer.
    pub fn read_f32(self, bytes: &[u8], index: usize) -> f32 {
        let size = self.size_in_bytes();
        let raw = &bytes[index * size..(index + 1) * size];
        match self {
            DataType::Float => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            DataType::Half => f16::from_bits(u16::from_le_bytes([raw[0], raw[1]])).to_f32(),
            DataType::Bfp16 => bf16::from_bits(u16::from_le_bytes([raw[0], raw[1]])).to_f32(),
            DataType::Int8 => raw[0] as i8 as f32,
            DataType::Int32 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f32,
        }
    }

    /// Writes `value` into element `index`, rounding to the storage precision.
    ///
    /// Quantized types round to nearest and saturate.
    pub fn write_f32(self, bytes: &mut [u8], index: usize, value: f32) {
        let size = self.size_in_bytes();
        let raw = &mut bytes[index * size..(index + 1) * size];
        match self {
            DataType::Float => raw.copy_from_slice(&value.to_le_bytes()),
            DataType::Half => raw.copy_from_slice(&f16::from_f32(value).to_bits().to_le_bytes()),
            DataType::Bfp16 => {
                raw.copy_from_slice(&bf16::from_f32(value).to_bits().to_le_bytes())
            }
            DataType::Int8 => raw[0] = saturate_i8(value) as u8,
            DataType::Int32 => raw.copy_from_slice(&(value.round() as i32).to_le_bytes()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Float => "float",
            DataType::Half => "half",
            DataType::Bfp16 => "bfp16",
            DataType::Int8 => "int8",
            DataType::Int32 => "int32",
        };
        f.write_str(name)
    }
}

/// Rounds to nearest and clamps into the `i8` range.
pub fn saturate_i8(value: f32) -> i8 {
    value.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8
}

/// Acceptance rule between a reference and a candidate value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    Absolute(f32),
    Exact,
}

impl Tolerance {
    /// NaN only matches NaN; equal infinities match.
    pub fn accepts(self, reference: f32, candidate: f32) -> bool {
        if reference.is_nan() || candidate.is_nan() {
            return reference.is_nan() && candidate.is_nan();
        }
        if reference == candidate {
            return true;
        }
        match self {
            Tolerance::Absolute(epsilon) => (reference - candidate).abs() <= epsilon,
            Tolerance::Exact => false,
        }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tolerance::Absolute(epsilon) => write!(f, "abs {epsilon}"),
            Tolerance::Exact => f.write_str("exact"),
        }
    }
}
