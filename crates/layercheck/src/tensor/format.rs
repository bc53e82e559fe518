//! Physical element layouts and their logical-to-physical index maps.

use serde::{Deserialize, Serialize};

use super::dims;

/// Layout of a blob's elements in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// Plain row-major NCHW.
    #[default]
    Nchw,
    /// Channels grouped in blocks of four, each block stored HW-major with the
    /// four channel lanes interleaved. Padding lanes are zero.
    Nc4hw4,
}

const PACK: usize = 4;

impl DataFormat {
    /// Number of element slots the layout reserves, padding included.
    pub fn capacity(self, dims: &[usize]) -> usize {
        match self {
            DataFormat::Nchw => dims::count(dims),
            DataFormat::Nc4hw4 => {
                let channels = dims::channel(dims).unwrap_or(1);
                dims::batch(dims) * channels.div_ceil(PACK) * PACK * dims::spatial(dims)
            }
        }
    }

    /// Physical slot of element (`n`, `c`, `s`).
    pub fn offset(self, dims: &[usize], n: usize, c: usize, s: usize) -> usize {
        let channels = dims::channel(dims).unwrap_or(1);
        let spatial = dims::spatial(dims);
        match self {
            DataFormat::Nchw => (n * channels + c) * spatial + s,
            DataFormat::Nc4hw4 => {
                let blocks = channels.div_ceil(PACK);
                ((n * blocks + c / PACK) * spatial + s) * PACK + c % PACK
            }
        }
    }

    /// Physical slot of every element, in logical NCHW order.
    pub fn logical_offsets(self, dims: &[usize]) -> Vec<usize> {
        if self == DataFormat::Nchw {
            return (0..dims::count(dims)).collect();
        }
        let batch = dims::batch(dims);
        let channels = dims::channel(dims).unwrap_or(1);
        let spatial = dims::spatial(dims);
        let mut offsets = Vec::with_capacity(dims::count(dims));
        for n in 0..batch {
            for c in 0..channels {
                for s in 0..spatial {
                    offsets.push(self.offset(dims, n, c, s));
                }
            }
        }
        offsets
    }
}
