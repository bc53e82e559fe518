use super::{LayerResource, LayerType};
use crate::backend::spec::{BackendError, BackendResult};
use crate::tensor::{dims, Blob};

/// Output dimensions of `layer_type` for the given inputs.
///
/// Every supported layer is elementwise with a single output shaped like its
/// first input; this validates arity and resource sizes on the way.
pub fn infer_output_dims(
    layer_type: LayerType,
    resource: Option<&LayerResource>,
    inputs: &[&Blob],
    output_count: usize,
) -> BackendResult<Vec<Vec<usize>>> {
    if output_count != 1 {
        return Err(shape_error(
            layer_type,
            format!("expects 1 output, got {output_count}"),
        ));
    }
    let first = inputs
        .first()
        .ok_or_else(|| shape_error(layer_type, "has no inputs".to_string()))?;
    let input_dims = &first.desc().dims;
    let channels = dims::channel(input_dims).unwrap_or(1);

    match (layer_type, resource) {
        (LayerType::Add, Some(LayerResource::Elementwise { values })) => {
            expect_inputs(layer_type, inputs, 1)?;
            let count = dims::count(input_dims);
            if values.len() != 1 && values.len() != channels && values.len() != count {
                return Err(shape_error(
                    layer_type,
                    format!(
                        "constant of {} values cannot broadcast to {input_dims:?}",
                        values.len()
                    ),
                ));
            }
        }
        (LayerType::Add, None) => {
            expect_inputs(layer_type, inputs, 2)?;
            let other = &inputs[1].desc().dims;
            if other != input_dims {
                return Err(shape_error(
                    layer_type,
                    format!("input shapes {input_dims:?} and {other:?} differ"),
                ));
            }
        }
        (LayerType::Relu | LayerType::Sigmoid | LayerType::Log, None) => {
            expect_inputs(layer_type, inputs, 1)?;
        }
        (LayerType::Scale, Some(LayerResource::Scale { scale, bias })) => {
            expect_inputs(layer_type, inputs, 1)?;
            let bias_len = bias.as_ref().map_or(channels, Vec::len);
            if scale.len() != channels || bias_len != channels {
                return Err(shape_error(
                    layer_type,
                    format!(
                        "expects {channels} scale/bias values, got {}/{bias_len}",
                        scale.len()
                    ),
                ));
            }
        }
        (_, resource) => {
            return Err(shape_error(
                layer_type,
                format!("does not accept resource {resource:?}"),
            ))
        }
    }
    Ok(vec![input_dims.clone()])
}

fn expect_inputs(layer_type: LayerType, inputs: &[&Blob], expected: usize) -> BackendResult<()> {
    if inputs.len() != expected {
        return Err(shape_error(
            layer_type,
            format!("expects {expected} inputs, got {}", inputs.len()),
        ));
    }
    Ok(())
}

fn shape_error(layer_type: LayerType, message: String) -> BackendError {
    BackendError::invalid_blob(format!("{layer_type} layer {message}"))
}
