//! Scalar arithmetic and element codecs shared by every layercheck device.
//!
//! Devices that compute through these helpers produce bit-identical results
//! for identical inputs, which is what lets int8 outputs be compared exactly.

use layercheck::tensor::{dims, IntScaleResource};
use layercheck::{
    BackendError, BackendResult, Blob, DataType, DeviceType, LayerResource, LayerType,
};

pub fn relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn log(x: f32) -> f32 {
    x.ln()
}

pub fn add(lhs: f32, rhs: f32) -> f32 {
    lhs + rhs
}

pub fn scale(x: f32, scale: f32, bias: f32) -> f32 {
    x * scale + bias
}

/// Elementwise function of the single-input layers.
pub fn unary(layer_type: LayerType) -> Option<fn(f32) -> f32> {
    match layer_type {
        LayerType::Relu => Some(relu),
        LayerType::Sigmoid => Some(sigmoid),
        LayerType::Log => Some(log),
        LayerType::Add | LayerType::Scale => None,
    }
}

/// Second operand of a constant `add` for element (`channel`, logical `index`).
///
/// A single value broadcasts everywhere, one value per channel broadcasts over
/// batch and spatial positions, anything else is indexed like the input.
pub fn constant_operand(values: &[f32], channels: usize, channel: usize, index: usize) -> f32 {
    match values.len() {
        1 => values[0],
        len if len == channels => values[channel],
        _ => values.get(index).copied().unwrap_or(0.0),
    }
}

/// Per-channel `(scale, bias)` of a `scale` layer.
pub fn scale_bias(resource: &LayerResource, channel: usize) -> (f32, f32) {
    match resource {
        LayerResource::Scale { scale, bias } => {
            let factor = scale.get(channel).copied().unwrap_or(1.0);
            let offset = bias
                .as_ref()
                .and_then(|bias| bias.get(channel).copied())
                .unwrap_or(0.0);
            (factor, offset)
        }
        LayerResource::Elementwise { .. } => (1.0, 0.0),
    }
}

/// Decodes the stored element at physical `slot`, dequantizing int8 with the
/// scale of logical `channel`.
pub fn decode(
    data_type: DataType,
    int_scale: Option<&IntScaleResource>,
    bytes: &[u8],
    slot: usize,
    channel: usize,
) -> f32 {
    let raw = data_type.read_f32(bytes, slot);
    match (data_type, int_scale) {
        (DataType::Int8, Some(resource)) => resource.dequantize(channel, raw as i8),
        _ => raw,
    }
}

/// Inverse of [`decode`]: rounds `value` to the storage type of the blob.
pub fn encode(
    data_type: DataType,
    int_scale: Option<&IntScaleResource>,
    bytes: &mut [u8],
    slot: usize,
    channel: usize,
    value: f32,
) {
    match (data_type, int_scale) {
        (DataType::Int8, Some(resource)) => {
            data_type.write_f32(bytes, slot, resource.quantize(channel, value) as f32)
        }
        _ => data_type.write_f32(bytes, slot, value),
    }
}

/// Rejects layer/type combinations no shipped device implements.
///
/// Floating types run every layer; int8 runs `relu` and `add` and needs a
/// scale resource on each blob.
pub fn check_supported(
    device: &DeviceType,
    layer_type: LayerType,
    inputs: &[&Blob],
    outputs: &[&Blob],
) -> BackendResult<()> {
    for blob in inputs.iter().chain(outputs.iter()) {
        let data_type = blob.desc().data_type;
        match data_type {
            DataType::Float | DataType::Half | DataType::Bfp16 => {}
            DataType::Int8 if matches!(layer_type, LayerType::Relu | LayerType::Add) => {
                if blob.int_scale().is_none() {
                    return Err(BackendError::invalid_blob(format!(
                        "int8 blob '{}' has no scale resource",
                        blob.name()
                    )));
                }
            }
            _ => {
                return Err(BackendError::unimplemented(
                    format!("{layer_type} on {data_type}"),
                    device,
                ))
            }
        }
    }
    let Some(first) = inputs.first() else {
        return Err(BackendError::invalid_blob(format!(
            "{layer_type} needs at least one input"
        )));
    };
    if outputs
        .iter()
        .any(|output| output.desc().data_type != first.desc().data_type)
    {
        return Err(BackendError::invalid_blob(format!(
            "{layer_type} output type must match input type {}",
            first.desc().data_type
        )));
    }
    Ok(())
}

/// Channel count used to index per-channel parameters of `dims`.
pub fn channels(dims_of: &[usize]) -> usize {
    dims::channel(dims_of).unwrap_or(1)
}
