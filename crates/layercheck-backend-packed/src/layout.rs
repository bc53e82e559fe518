//! Slot arithmetic for the channel-blocked layout.

use layercheck::tensor::dims;
use layercheck::DataFormat;

const PACK: usize = 4;

/// Logical NCHW index stored at physical `slot`, or `None` for a padding lane.
pub fn logical_index(format: DataFormat, dims_of: &[usize], slot: usize) -> Option<usize> {
    match format {
        DataFormat::Nchw => (slot < dims::count(dims_of)).then_some(slot),
        DataFormat::Nc4hw4 => {
            let channels = dims::channel(dims_of).unwrap_or(1);
            let spatial = dims::spatial(dims_of);
            let blocks = channels.div_ceil(PACK);
            let lane = slot % PACK;
            let rest = slot / PACK;
            let s = rest % spatial.max(1);
            let block = (rest / spatial.max(1)) % blocks.max(1);
            let n = rest / spatial.max(1) / blocks.max(1);
            let c = block * PACK + lane;
            if c >= channels || n >= dims::batch(dims_of) {
                return None;
            }
            Some((n * channels + c) * spatial + s)
        }
    }
}

/// Rounds a byte count up to the device's allocation granule.
pub fn align_bytes(bytes: usize, granule: usize) -> usize {
    bytes.div_ceil(granule) * granule
}
