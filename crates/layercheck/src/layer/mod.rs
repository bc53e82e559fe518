//! Device-independent layer wrapper and the kernel contract devices implement.
//!
//! A [`Layer`] owns shape inference and parameter bookkeeping; the arithmetic
//! is delegated to a [`LayerAcc`] obtained from the target device during
//! [`Layer::init`].

mod shape;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::spec::{BackendError, BackendResult, Context, Device};
use crate::tensor::Blob;

pub use shape::infer_output_dims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    /// Elementwise sum of two inputs, or of one input and a constant resource.
    Add,
    Relu,
    Sigmoid,
    /// Natural logarithm; defined for positive inputs only.
    Log,
    /// Per-channel `x * scale + bias`.
    Scale,
}

impl LayerType {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerType::Add => "add",
            LayerType::Relu => "relu",
            LayerType::Sigmoid => "sigmoid",
            LayerType::Log => "log",
            LayerType::Scale => "scale",
        }
    }

    /// Floating-point operations spent per output element.
    pub fn ops_per_element(self) -> f64 {
        match self {
            LayerType::Add | LayerType::Relu | LayerType::Log => 1.0,
            LayerType::Scale => 2.0,
            LayerType::Sigmoid => 4.0,
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = BackendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(LayerType::Add),
            "relu" => Ok(LayerType::Relu),
            "sigmoid" => Ok(LayerType::Sigmoid),
            "log" => Ok(LayerType::Log),
            "scale" => Ok(LayerType::Scale),
            other => Err(BackendError::execution(format!("unknown layer type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerParam {
    #[serde(default)]
    pub name: String,
}

impl LayerParam {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Constant weights shared by the reference and candidate instance of a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerResource {
    /// Constant second operand of a binary elementwise layer.
    ///
    /// One value broadcasts everywhere, one value per channel broadcasts over
    /// batch and spatial positions, otherwise the length must match the input.
    Elementwise { values: Vec<f32> },
    Scale {
        scale: Vec<f32>,
        #[serde(default)]
        bias: Option<Vec<f32>>,
    },
}

/// Device kernel behind a [`Layer`].
pub trait LayerAcc: Send {
    /// Prepares the kernel. Output descriptors may still be adjusted here;
    /// blobs are not allocated yet.
    fn init(
        &mut self,
        context: &Arc<dyn Context>,
        param: &LayerParam,
        resource: Option<&LayerResource>,
        inputs: &[&Blob],
        outputs: &mut [&mut Blob],
    ) -> BackendResult<()>;

    fn reshape(&mut self, _inputs: &[&Blob], _outputs: &[&Blob]) -> BackendResult<()> {
        Ok(())
    }

    fn forward(&mut self, inputs: &[&Blob], outputs: &[&Blob]) -> BackendResult<()>;
}

/// One layer instance bound to a single device.
pub struct Layer {
    layer_type: LayerType,
    param: LayerParam,
    resource: Option<Arc<LayerResource>>,
    acc: Option<Box<dyn LayerAcc>>,
}

impl Layer {
    pub fn new(layer_type: LayerType) -> Self {
        Self {
            layer_type,
            param: LayerParam::default(),
            resource: None,
            acc: None,
        }
    }

    pub fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    pub fn param(&self) -> &LayerParam {
        &self.param
    }

    pub fn resource(&self) -> Option<&Arc<LayerResource>> {
        self.resource.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.acc.is_some()
    }

    /// Infers output shapes and binds the device kernel.
    pub fn init(
        &mut self,
        context: &Arc<dyn Context>,
        param: &LayerParam,
        resource: Option<Arc<LayerResource>>,
        inputs: &[&Blob],
        outputs: &mut [&mut Blob],
        device: &dyn Device,
    ) -> BackendResult<()> {
        let dims =
            infer_output_dims(self.layer_type, resource.as_deref(), inputs, outputs.len())?;
        for (output, dims) in outputs.iter_mut().zip(dims) {
            output.desc_mut()?.dims = dims;
        }
        let mut acc = device.create_layer_acc(self.layer_type).ok_or_else(|| {
            BackendError::unimplemented(self.layer_type.as_str(), &device.device_type())
        })?;
        acc.init(context, param, resource.as_deref(), inputs, outputs)?;
        self.param = param.clone();
        self.resource = resource;
        self.acc = Some(acc);
        Ok(())
    }

    /// Recomputes output shapes from the current input shapes.
    pub fn reshape(&mut self, inputs: &[&Blob], outputs: &mut [&mut Blob]) -> BackendResult<()> {
        let dims = infer_output_dims(
            self.layer_type,
            self.resource.as_deref(),
            inputs,
            outputs.len(),
        )?;
        let acc = self.acc_mut()?;
        for (output, dims) in outputs.iter_mut().zip(dims) {
            output.set_dims(dims)?;
        }
        let outputs: Vec<&Blob> = outputs.iter().map(|blob| &**blob).collect();
        acc.reshape(inputs, &outputs)
    }

    pub fn forward(&mut self, inputs: &[&Blob], outputs: &[&Blob]) -> BackendResult<()> {
        self.acc_mut()?.forward(inputs, outputs)
    }

    /// Theoretical MFLOP count of one forward pass.
    pub fn calc_mflops(&self, outputs: &[&Blob]) -> f64 {
        let elements: usize = outputs.iter().map(|blob| blob.desc().element_count()).sum();
        elements as f64 * self.layer_type.ops_per_element() / 1.0e6
    }

    fn acc_mut(&mut self) -> BackendResult<&mut Box<dyn LayerAcc>> {
        let layer_type = self.layer_type;
        self.acc.as_mut().ok_or_else(|| {
            BackendError::execution(format!("layer '{layer_type}' used before init"))
        })
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("layer_type", &self.layer_type)
            .field("param", &self.param)
            .field("initialized", &self.acc.is_some())
            .finish()
    }
}
