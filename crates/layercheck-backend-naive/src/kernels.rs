use std::sync::Arc;

use layercheck::tensor::{dims, DataFormat};
use layercheck::{
    BackendError, BackendResult, Blob, Context, DeviceType, LayerAcc, LayerParam, LayerResource,
    LayerType,
};

use crate::math;

/// Straightforward NCHW kernel for every layer the naive device supports.
///
/// Inputs are decoded to `f32` in logical order, computed with the shared
/// scalar helpers and written back rounded to the output's storage type.
pub struct NaiveLayerAcc {
    layer_type: LayerType,
    resource: Option<LayerResource>,
}

impl NaiveLayerAcc {
    pub fn new(layer_type: LayerType) -> Self {
        Self {
            layer_type,
            resource: None,
        }
    }
}

impl LayerAcc for NaiveLayerAcc {
    fn init(
        &mut self,
        _context: &Arc<dyn Context>,
        _param: &LayerParam,
        resource: Option<&LayerResource>,
        inputs: &[&Blob],
        outputs: &mut [&mut Blob],
    ) -> BackendResult<()> {
        let outputs: Vec<&Blob> = outputs.iter().map(|blob| &**blob).collect();
        math::check_supported(&DeviceType::Naive, self.layer_type, inputs, &outputs)?;
        if let Some(blob) = inputs
            .iter()
            .chain(outputs.iter())
            .find(|blob| blob.desc().data_format != DataFormat::Nchw)
        {
            return Err(BackendError::invalid_blob(format!(
                "naive kernels read NCHW only, blob '{}' is {:?}",
                blob.name(),
                blob.desc().data_format
            )));
        }
        self.resource = resource.cloned();
        Ok(())
    }

    fn forward(&mut self, inputs: &[&Blob], outputs: &[&Blob]) -> BackendResult<()> {
        let output = outputs
            .first()
            .ok_or_else(|| BackendError::execution(format!("{} has no output", self.layer_type)))?;
        let input = inputs
            .first()
            .ok_or_else(|| BackendError::execution(format!("{} has no input", self.layer_type)))?;
        let out_dims = output.desc().dims.clone();
        let channels = math::channels(&out_dims);
        let lhs = load(input)?;

        let values: Vec<f32> = match self.layer_type {
            LayerType::Add => match (inputs.get(1), &self.resource) {
                (Some(rhs), _) => {
                    let rhs = load(rhs)?;
                    lhs.iter().zip(&rhs).map(|(&a, &b)| math::add(a, b)).collect()
                }
                (None, Some(LayerResource::Elementwise { values })) => lhs
                    .iter()
                    .enumerate()
                    .map(|(index, &a)| {
                        let channel = dims::channel_of(&out_dims, index);
                        math::add(a, math::constant_operand(values, channels, channel, index))
                    })
                    .collect(),
                _ => {
                    return Err(BackendError::execution(
                        "add needs a second input or a constant resource",
                    ))
                }
            },
            LayerType::Scale => {
                let resource = self.resource.as_ref().ok_or_else(|| {
                    BackendError::execution("scale layer has no scale resource")
                })?;
                lhs.iter()
                    .enumerate()
                    .map(|(index, &x)| {
                        let (factor, bias) =
                            math::scale_bias(resource, dims::channel_of(&out_dims, index));
                        math::scale(x, factor, bias)
                    })
                    .collect()
            }
            other => {
                let op = math::unary(other).ok_or_else(|| {
                    BackendError::unimplemented(other.as_str(), &DeviceType::Naive)
                })?;
                lhs.iter().map(|&x| op(x)).collect()
            }
        };
        store(output, &values)
    }
}

/// Decodes a blob into logical NCHW order.
fn load(blob: &Blob) -> BackendResult<Vec<f32>> {
    let desc = blob.desc();
    let int_scale = blob.int_scale().map(|scale| scale.as_ref());
    let count = desc.element_count();
    let values: Vec<f32> = blob.memory()?.read(|bytes| {
        (0..count)
            .map(|index| {
                let channel = dims::channel_of(&desc.dims, index);
                math::decode(desc.data_type, int_scale, bytes, index, channel)
            })
            .collect()
    });
    Ok(values)
}

fn store(blob: &Blob, values: &[f32]) -> BackendResult<()> {
    let desc = blob.desc();
    if values.len() != desc.element_count() {
        return Err(BackendError::execution(format!(
            "'{}' expects {} values, kernel produced {}",
            blob.name(),
            desc.element_count(),
            values.len()
        )));
    }
    let int_scale = blob.int_scale().map(|scale| scale.as_ref());
    blob.memory()?.write(|bytes| {
        for (index, &value) in values.iter().enumerate() {
            let channel = dims::channel_of(&desc.dims, index);
            math::encode(desc.data_type, int_scale, bytes, index, channel, value);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NaiveDevice;
    use layercheck::tensor::IntScaleResource;
    use layercheck::{BlobDesc, DataType, Device};

    fn blob(device: &NaiveDevice, name: &str, dims: &[usize], data_type: DataType) -> Blob {
        let mut blob = Blob::new(BlobDesc::new(dims.to_vec(), data_type).with_name(name));
        blob.allocate(device).unwrap();
        blob
    }

    fn fill(blob: &Blob, values: &[f32]) {
        let data_type = blob.desc().data_type;
        blob.memory().unwrap().write(|bytes| {
            for (index, &value) in values.iter().enumerate() {
                data_type.write_f32(bytes, index, value);
            }
        });
    }

    fn run(
        layer_type: LayerType,
        resource: Option<LayerResource>,
        inputs: &[&Blob],
        output: &mut Blob,
    ) -> BackendResult<()> {
        let device = NaiveDevice::new();
        let context = device.create_context(0)?;
        let mut acc = NaiveLayerAcc::new(layer_type);
        acc.init(
            &context,
            &LayerParam::default(),
            resource.as_ref(),
            inputs,
            &mut [&mut *output],
        )?;
        acc.forward(inputs, &[&*output])
    }

    #[test]
    fn add_broadcasts_per_channel_constant() {
        let device = NaiveDevice::new();
        let input = blob(&device, "x", &[1, 2, 1, 2], DataType::Float);
        fill(&input, &[1.0, 2.0, 3.0, 4.0]);
        let mut output = blob(&device, "y", &[1, 2, 1, 2], DataType::Float);
        run(
            LayerType::Add,
            Some(LayerResource::Elementwise {
                values: vec![10.0, 20.0],
            }),
            &[&input],
            &mut output,
        )
        .unwrap();
        assert_eq!(load(&output).unwrap(), vec![11.0, 12.0, 23.0, 24.0]);
    }

    #[test]
    fn scale_applies_bias_per_channel() {
        let device = NaiveDevice::new();
        let input = blob(&device, "x", &[1, 2, 2], DataType::Float);
        fill(&input, &[1.0, -1.0, 2.0, -2.0]);
        let mut output = blob(&device, "y", &[1, 2, 2], DataType::Float);
        run(
            LayerType::Scale,
            Some(LayerResource::Scale {
                scale: vec![2.0, 0.5],
                bias: Some(vec![1.0, 0.0]),
            }),
            &[&input],
            &mut output,
        )
        .unwrap();
        assert_eq!(load(&output).unwrap(), vec![3.0, -1.0, 1.0, -1.0]);
    }

    #[test]
    fn int8_relu_requantizes_with_output_scale() {
        let device = NaiveDevice::new();
        let in_scale = Arc::new(IntScaleResource::new("in", vec![0.5], vec![0]).unwrap());
        let out_scale = Arc::new(IntScaleResource::new("out", vec![0.25], vec![0]).unwrap());
        let input = blob(&device, "x", &[1, 1, 4], DataType::Int8).with_int_scale(in_scale);
        fill(&input, &[-4.0, -1.0, 2.0, 6.0]);
        let mut output = blob(&device, "y", &[1, 1, 4], DataType::Int8).with_int_scale(out_scale);
        run(LayerType::Relu, None, &[&input], &mut output).unwrap();
        let raw: Vec<i8> = output
            .memory()
            .unwrap()
            .read(|bytes| bytes.iter().map(|&b| b as i8).collect());
        assert_eq!(raw, vec![0, 0, 4, 12]);
    }

    #[test]
    fn int8_sigmoid_is_unsupported() {
        let device = NaiveDevice::new();
        let scale = Arc::new(IntScaleResource::new("q", vec![1.0], vec![0]).unwrap());
        let input =
            blob(&device, "x", &[1, 1, 2], DataType::Int8).with_int_scale(Arc::clone(&scale));
        let mut output = blob(&device, "y", &[1, 1, 2], DataType::Int8).with_int_scale(scale);
        let err = run(LayerType::Sigmoid, None, &[&input], &mut output).unwrap_err();
        assert!(matches!(err, BackendError::Unimplemented { .. }), "{err}");
    }
}
