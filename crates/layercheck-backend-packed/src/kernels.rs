use std::sync::Arc;
use std::thread;

use layercheck::backend::BlobMemory;
use layercheck::tensor::{dims, IntScaleResource};
use layercheck::{
    BackendError, BackendResult, Blob, Context, DataFormat, DataType, DeviceType, LayerAcc,
    LayerParam, LayerResource, LayerType,
};
use layercheck_backend_naive::math;
use tracing::trace;

use crate::layout::logical_index;

/// Kernel that runs on the packed context's command queue.
///
/// Every physical slot is processed independently, so the work is split into
/// contiguous slot ranges across the context's threads. Padding lanes are
/// never written.
pub struct PackedLayerAcc {
    layer_type: LayerType,
    resource: Option<Arc<LayerResource>>,
    context: Option<Arc<dyn Context>>,
}

impl PackedLayerAcc {
    pub fn new(layer_type: LayerType) -> Self {
        Self {
            layer_type,
            resource: None,
            context: None,
        }
    }
}

impl LayerAcc for PackedLayerAcc {
    fn init(
        &mut self,
        context: &Arc<dyn Context>,
        _param: &LayerParam,
        resource: Option<&LayerResource>,
        inputs: &[&Blob],
        outputs: &mut [&mut Blob],
    ) -> BackendResult<()> {
        let outputs: Vec<&Blob> = outputs.iter().map(|blob| &**blob).collect();
        math::check_supported(&DeviceType::Packed, self.layer_type, inputs, &outputs)?;
        if context.command_queue().is_none() {
            return Err(BackendError::execution(
                "packed kernels need a context with a command queue",
            ));
        }
        match (self.layer_type, resource) {
            (LayerType::Scale, None) => {
                return Err(BackendError::execution("scale layer has no scale resource"))
            }
            (LayerType::Add, None) if inputs.len() < 2 => {
                return Err(BackendError::execution(
                    "add needs a second input or a constant resource",
                ))
            }
            _ => {}
        }
        self.resource = resource.cloned().map(Arc::new);
        self.context = Some(Arc::clone(context));
        Ok(())
    }

    fn reshape(&mut self, inputs: &[&Blob], outputs: &[&Blob]) -> BackendResult<()> {
        let Some(output) = outputs.first() else {
            return Ok(());
        };
        // Slot-wise kernels need every operand laid out like the output.
        for input in inputs {
            if input.desc().dims != output.desc().dims
                || input.desc().data_format != output.desc().data_format
            {
                return Err(BackendError::invalid_blob(format!(
                    "input '{}' {:?} does not match output '{}' {:?}",
                    input.name(),
                    input.desc().dims,
                    output.name(),
                    output.desc().dims
                )));
            }
        }
        Ok(())
    }

    fn forward(&mut self, inputs: &[&Blob], outputs: &[&Blob]) -> BackendResult<()> {
        self.reshape(inputs, outputs)?;
        let context = self.context.as_ref().ok_or_else(|| {
            BackendError::execution(format!("{} used before init", self.layer_type))
        })?;
        let queue = context
            .command_queue()
            .ok_or_else(|| BackendError::execution("packed context lost its command queue"))?;
        let output = outputs
            .first()
            .ok_or_else(|| BackendError::execution(format!("{} has no output", self.layer_type)))?;

        let job = KernelJob {
            layer_type: self.layer_type,
            resource: self.resource.clone(),
            inputs: inputs
                .iter()
                .map(|blob| Operand::capture(blob))
                .collect::<BackendResult<_>>()?,
            output: Operand::capture(output)?,
            threads: context.num_threads().max(1),
        };
        queue.enqueue(move || job.run())
    }
}

/// Storage and encoding of one blob, captured for a queued job.
struct Operand {
    memory: BlobMemory,
    dims: Vec<usize>,
    data_type: DataType,
    format: DataFormat,
    int_scale: Option<Arc<IntScaleResource>>,
}

impl Operand {
    fn capture(blob: &Blob) -> BackendResult<Self> {
        let desc = blob.desc();
        Ok(Self {
            memory: blob.memory()?.clone(),
            dims: desc.dims.clone(),
            data_type: desc.data_type,
            format: desc.data_format,
            int_scale: blob.int_scale().cloned(),
        })
    }

    fn int_scale(&self) -> Option<&IntScaleResource> {
        self.int_scale.as_deref()
    }
}

struct KernelJob {
    layer_type: LayerType,
    resource: Option<Arc<LayerResource>>,
    inputs: Vec<Operand>,
    output: Operand,
    threads: usize,
}

impl KernelJob {
    fn run(self) -> BackendResult<()> {
        // Snapshot inputs first; an input may share storage with the output.
        let snapshots: Vec<Vec<u8>> = self
            .inputs
            .iter()
            .map(|operand| operand.memory.read(|bytes| bytes.to_vec()))
            .collect();
        let output = &self.output;
        let element = output.data_type.size_in_bytes();
        let slots = output.format.capacity(&output.dims);
        let per_thread = slots.div_ceil(self.threads).max(1);
        trace!(
            layer = %self.layer_type,
            slots,
            threads = self.threads,
            "running packed kernel"
        );

        let job = &self;
        let snapshots = &snapshots;
        output.memory.write(|bytes| {
            let bytes = &mut bytes[..slots * element];
            if job.threads == 1 {
                job.compute(snapshots, bytes, 0);
                return;
            }
            thread::scope(|scope| {
                for (chunk_index, chunk) in bytes.chunks_mut(per_thread * element).enumerate() {
                    scope.spawn(move || job.compute(snapshots, chunk, chunk_index * per_thread));
                }
            });
        });
        Ok(())
    }

    /// Fills `chunk`, which starts at physical slot `first`.
    fn compute(&self, snapshots: &[Vec<u8>], chunk: &mut [u8], first: usize) {
        let output = &self.output;
        let element = output.data_type.size_in_bytes();
        let channels = math::channels(&output.dims);
        for local in 0..chunk.len() / element {
            let slot = first + local;
            let Some(index) = logical_index(output.format, &output.dims, slot) else {
                continue;
            };
            let channel = dims::channel_of(&output.dims, index);
            let operand = |position: usize| {
                let input = &self.inputs[position];
                math::decode(
                    input.data_type,
                    input.int_scale(),
                    &snapshots[position],
                    slot,
                    channel,
                )
            };
            let x = operand(0);
            let value = match (self.layer_type, self.resource.as_deref()) {
                (LayerType::Add, _) if self.inputs.len() > 1 => math::add(x, operand(1)),
                (LayerType::Add, Some(LayerResource::Elementwise { values })) => {
                    math::add(x, math::constant_operand(values, channels, channel, index))
                }
                (LayerType::Scale, Some(resource)) => {
                    let (factor, bias) = math::scale_bias(resource, channel);
                    math::scale(x, factor, bias)
                }
                (layer_type, _) => match math::unary(layer_type) {
                    Some(op) => op(x),
                    None => x,
                },
            };
            math::encode(
                output.data_type,
                output.int_scale(),
                chunk,
                local,
                channel,
                value,
            );
        }
    }
}
