//! Per-channel affine quantization parameters for int8 blobs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::dtype::saturate_i8;
use crate::backend::spec::{BackendError, BackendResult};

/// Per-channel scale and zero-point shared by both halves of a quantized pair.
///
/// The resource is immutable once built; sharing it behind `Arc` guarantees it
/// is released exactly once no matter how many blobs reference it.
#[derive(Debug, Clone, PartialEq)]
pub struct IntScaleResource {
    name: String,
    scale: Vec<f32>,
    zero_point: Vec<i8>,
}

impl IntScaleResource {
    pub fn new(
        name: impl Into<String>,
        scale: Vec<f32>,
        zero_point: Vec<i8>,
    ) -> BackendResult<Self> {
        let name = name.into();
        if scale.is_empty() {
            return Err(BackendError::invalid_blob(format!(
                "int scale '{name}' has no channels"
            )));
        }
        if scale.len() != zero_point.len() {
            return Err(BackendError::invalid_blob(format!(
                "int scale '{name}' has {} scales but {} zero points",
                scale.len(),
                zero_point.len()
            )));
        }
        if let Some(bad) = scale.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(BackendError::invalid_blob(format!(
                "int scale '{name}' has non-positive scale {bad}"
            )));
        }
        Ok(Self {
            name,
            scale,
            zero_point,
        })
    }

    /// Seeded per-channel scales in `(0, 1]` with zero offsets.
    pub fn random(name: impl Into<String>, channels: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let channels = channels.max(1);
        let scale = (0..channels)
            .map(|_| 1.0 - rng.gen::<f32>())
            .collect();
        Self {
            name: name.into(),
            scale,
            zero_point: vec![0; channels],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> usize {
        self.scale.len()
    }

    pub fn scales(&self) -> &[f32] {
        &self.scale
    }

    pub fn zero_points(&self) -> &[i8] {
        &self.zero_point
    }

    pub fn scale(&self, channel: usize) -> f32 {
        self.scale[self.clamp_channel(channel)]
    }

    pub fn zero_point(&self, channel: usize) -> i8 {
        self.zero_point[self.clamp_channel(channel)]
    }

    pub fn quantize(&self, channel: usize, value: f32) -> i8 {
        saturate_i8(value / self.scale(channel) + self.zero_point(channel) as f32)
    }

    pub fn dequantize(&self, channel: usize, value: i8) -> f32 {
        (value as f32 - self.zero_point(channel) as f32) * self.scale(channel)
    }

    // Rank-1 blobs borrow a resource sized from another tensor's channels.
    fn clamp_channel(&self, channel: usize) -> usize {
        channel.min(self.scale.len() - 1)
    }
}
