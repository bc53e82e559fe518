//! Helpers over NCHW-style dimension vectors.
//!
//! Dimension 0 is the batch, dimension 1 the channel, and every trailing
//! dimension is flattened into a single spatial extent.

/// Product of all dimensions; 1 for a scalar.
pub fn count(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Product of the dimensions from `start` on.
pub fn count_from(dims: &[usize], start: usize) -> usize {
    dims.iter().skip(start).product()
}

pub fn batch(dims: &[usize]) -> usize {
    dims.first().copied().unwrap_or(1)
}

/// Channel extent, or `None` for tensors of rank below 2.
pub fn channel(dims: &[usize]) -> Option<usize> {
    dims.get(1).copied()
}

pub fn spatial(dims: &[usize]) -> usize {
    count_from(dims, 2)
}

/// Channel of the element at logical NCHW position `index`.
pub fn channel_of(dims: &[usize], index: usize) -> usize {
    match channel(dims) {
        Some(channels) if channels > 0 => (index / spatial(dims).max(1)) % channels,
        _ => 0,
    }
}
