//! Whole-model execution from a serialized JSON description.
//!
//! A [`Net`] holds a parsed [`ModelDescription`]; every call to
//! [`Net::create_instance`] builds an independent [`Instance`] on the device
//! named by its [`NetworkConfig`], with its own context and blobs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::backend::queue::CommandQueue;
use crate::backend::registry;
use crate::backend::spec::{BackendError, Context, Device, DeviceType};
use crate::layer::{Layer, LayerParam, LayerResource, LayerType};
use crate::tensor::{dims, Blob, BlobDesc, DataType, IntScaleResource};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model config carries no description")]
    MissingDescription,
    #[error("invalid model description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid model: {0}")]
    Invalid(String),
    #[error("net used before init")]
    NotInitialized,
    #[error("layer '{layer}' failed: {source}")]
    Layer {
        layer: String,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    #[serde(default)]
    pub resource: Option<LayerResource>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Graph of layers in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub inputs: Vec<BlobDesc>,
    pub layers: Vec<LayerDescription>,
    pub outputs: Vec<String>,
}

impl ModelDescription {
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        let description: ModelDescription = serde_json::from_str(text)?;
        description.validate()?;
        Ok(description)
    }

    /// Checks that every blob is produced once and defined before use.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut defined = HashSet::new();
        for input in &self.inputs {
            if input.name.is_empty() {
                return Err(ModelError::Invalid("model input without a name".into()));
            }
            if !defined.insert(input.name.as_str()) {
                return Err(ModelError::Invalid(format!(
                    "blob '{}' defined twice",
                    input.name
                )));
            }
        }
        for layer in &self.layers {
            for name in &layer.inputs {
                if !defined.contains(name.as_str()) {
                    return Err(ModelError::Invalid(format!(
                        "layer '{}' reads undefined blob '{name}'",
                        layer.name
                    )));
                }
            }
            for name in &layer.outputs {
                if !defined.insert(name.as_str()) {
                    return Err(ModelError::Invalid(format!(
                        "layer '{}' redefines blob '{name}'",
                        layer.name
                    )));
                }
            }
        }
        if self.outputs.is_empty() {
            return Err(ModelError::Invalid("model declares no outputs".into()));
        }
        for name in &self.outputs {
            if !defined.contains(name.as_str()) {
                return Err(ModelError::Invalid(format!("unknown model output '{name}'")));
            }
        }
        Ok(())
    }
}

/// Serialized model handed to [`Net::init`]; `params[0]` is the JSON description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelConfig {
    pub params: Vec<String>,
}

impl ModelConfig {
    pub fn from_json(description: impl Into<String>) -> Self {
        Self {
            params: vec![description.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub device_type: DeviceType,
    pub device_id: i32,
    pub library_path: Vec<PathBuf>,
    pub threads: usize,
}

impl NetworkConfig {
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            device_id: 0,
            library_path: Vec::new(),
            threads: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct Net {
    description: Option<Arc<ModelDescription>>,
}

impl Net {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, config: &ModelConfig) -> Result<(), ModelError> {
        let text = config
            .params
            .first()
            .ok_or(ModelError::MissingDescription)?;
        self.description = Some(Arc::new(ModelDescription::from_json(text)?));
        Ok(())
    }

    pub fn deinit(&mut self) {
        self.description = None;
    }

    pub fn description(&self) -> Option<&ModelDescription> {
        self.description.as_deref()
    }

    pub fn create_instance(&self, config: &NetworkConfig) -> Result<Instance, ModelError> {
        let description = self
            .description
            .as_ref()
            .ok_or(ModelError::NotInitialized)?;
        Instance::build(Arc::clone(description), config)
    }
}

struct BoundLayer {
    name: String,
    layer: Layer,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

/// A model bound to one device, with allocated blobs.
pub struct Instance {
    device: Arc<dyn Device>,
    context: Arc<dyn Context>,
    layers: Vec<BoundLayer>,
    blobs: Vec<Blob>,
    names: HashMap<String, usize>,
    description: Arc<ModelDescription>,
}

impl Instance {
    fn build(description: Arc<ModelDescription>, config: &NetworkConfig) -> Result<Self, ModelError> {
        let device = registry::get_device(&config.device_type)?;
        let context = device.create_context(config.device_id)?;
        context.load_library(&config.library_path)?;
        context.set_num_threads(config.threads.max(1))?;

        let device_type = device.device_type();
        let mut blobs = Vec::new();
        let mut names = HashMap::new();
        for input in &description.inputs {
            let desc = input
                .clone()
                .on_device(device_type.clone())
                .with_format(device.preferred_format(input.data_type));
            let channels = dims::channel(&input.dims).unwrap_or(1);
            names.insert(input.name.clone(), blobs.len());
            blobs.push(new_blob(desc, channels, blobs.len()));
        }

        let mut layers = Vec::with_capacity(description.layers.len());
        for layer_desc in &description.layers {
            let inputs = layer_desc
                .inputs
                .iter()
                .map(|name| lookup_blob(&names, name))
                .collect::<Result<Vec<_>, _>>()?;
            let first = inputs.first().ok_or_else(|| {
                ModelError::Invalid(format!("layer '{}' has no inputs", layer_desc.name))
            })?;
            let data_type = blobs[*first].desc().data_type;
            let channels = blobs[*first].desc().channels().unwrap_or(1);
            let mut outputs = Vec::with_capacity(layer_desc.outputs.len());
            for name in &layer_desc.outputs {
                let desc = BlobDesc::new(Vec::new(), data_type)
                    .with_name(name.clone())
                    .on_device(device_type.clone())
                    .with_format(device.preferred_format(data_type));
                names.insert(name.clone(), blobs.len());
                outputs.push(blobs.len());
                blobs.push(new_blob(desc, channels, blobs.len()));
            }

            let mut layer = Layer::new(layer_desc.layer_type);
            let resource = layer_desc.resource.clone().map(Arc::new);
            let (layer_inputs, mut layer_outputs) = split_blobs(&mut blobs, &inputs, &outputs);
            layer
                .init(
                    &context,
                    &LayerParam::named(layer_desc.name.clone()),
                    resource,
                    &layer_inputs,
                    &mut layer_outputs,
                    device.as_ref(),
                )
                .map_err(|source| ModelError::Layer {
                    layer: layer_desc.name.clone(),
                    source,
                })?;
            layers.push(BoundLayer {
                name: layer_desc.name.clone(),
                layer,
                inputs,
                outputs,
            });
        }

        for blob in &mut blobs {
            blob.allocate(device.as_ref())?;
        }
        debug!(
            device = %device_type,
            layers = layers.len(),
            blobs = blobs.len(),
            "created model instance"
        );
        Ok(Self {
            device,
            context,
            layers,
            blobs,
            names,
            description,
        })
    }

    /// Runs every layer in order and waits for the device to finish.
    pub fn forward(&mut self) -> Result<(), ModelError> {
        self.context.on_instance_forward_begin()?;
        for bound in &mut self.layers {
            let inputs: Vec<&Blob> = bound.inputs.iter().map(|&idx| &self.blobs[idx]).collect();
            let outputs: Vec<&Blob> = bound.outputs.iter().map(|&idx| &self.blobs[idx]).collect();
            bound
                .layer
                .forward(&inputs, &outputs)
                .map_err(|source| ModelError::Layer {
                    layer: bound.name.clone(),
                    source,
                })?;
        }
        self.context.on_instance_forward_end()?;
        self.context.synchronize()?;
        Ok(())
    }

    /// Model inputs keyed by name.
    pub fn input_blobs(&self) -> BTreeMap<&str, &Blob> {
        self.description
            .inputs
            .iter()
            .map(|desc| (desc.name.as_str(), &self.blobs[self.names[&desc.name]]))
            .collect()
    }

    /// Model outputs keyed by name.
    pub fn output_blobs(&self) -> BTreeMap<&str, &Blob> {
        self.description
            .outputs
            .iter()
            .map(|name| (name.as_str(), &self.blobs[self.names[name]]))
            .collect()
    }

    pub fn command_queue(&self) -> Option<CommandQueue> {
        self.context.command_queue()
    }

    pub fn context(&self) -> &Arc<dyn Context> {
        &self.context
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // Queued work may still reference the blobs.
        let _ = self.context.synchronize();
        for blob in &mut self.blobs {
            blob.free();
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("device", &self.device.device_type())
            .field("layers", &self.layers.len())
            .field("blobs", &self.blobs.len())
            .finish()
    }
}

/// Creates blob number `index` of an instance.
///
/// Int8 blobs get a scale seeded by `index`, so every instance built from the
/// same description quantizes identically.
fn new_blob(desc: BlobDesc, channels: usize, index: usize) -> Blob {
    if desc.data_type != DataType::Int8 {
        return Blob::new(desc);
    }
    let name = format!("{}_int_scale", desc.name);
    let scale = IntScaleResource::random(name, channels, index as u64);
    Blob::new(desc).with_int_scale(Arc::new(scale))
}

fn lookup_blob(names: &HashMap<String, usize>, name: &str) -> Result<usize, ModelError> {
    names
        .get(name)
        .copied()
        .ok_or_else(|| ModelError::Invalid(format!("unknown blob '{name}'")))
}

/// Borrows a layer's inputs shared and its outputs exclusively from one blob list.
///
/// Outputs are always fresh blobs, so they never alias an input.
fn split_blobs<'a>(
    blobs: &'a mut [Blob],
    inputs: &[usize],
    outputs: &[usize],
) -> (Vec<&'a Blob>, Vec<&'a mut Blob>) {
    let mut shared: Vec<Option<&'a Blob>> = vec![None; inputs.len()];
    let mut exclusive: Vec<Option<&'a mut Blob>> = (0..outputs.len()).map(|_| None).collect();
    for (idx, blob) in blobs.iter_mut().enumerate() {
        if let Some(pos) = outputs.iter().position(|&out| out == idx) {
            exclusive[pos] = Some(blob);
        } else if inputs.contains(&idx) {
            let blob: &'a Blob = blob;
            for (slot, &input) in shared.iter_mut().zip(inputs) {
                if input == idx {
                    *slot = Some(blob);
                }
            }
        }
    }
    (
        shared.into_iter().flatten().collect(),
        exclusive.into_iter().flatten().collect(),
    )
}
