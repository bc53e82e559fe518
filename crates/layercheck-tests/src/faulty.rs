//! Test-only device that computes like the naive device, then corrupts the
//! first element of its first output.

use std::sync::Arc;

use layercheck::backend::registry::register_device;
use layercheck::backend::MemoryTracker;
use layercheck::{
    BackendResult, Blob, Context, Device, DeviceType, LayerAcc, LayerParam, LayerResource,
    LayerType,
};
use layercheck_backend_naive::{NaiveContext, NaiveLayerAcc};

pub const FAULTY_DEVICE: &str = "faulty";

/// Distance element 0 of output 0 is moved by; beyond every tolerance.
pub const PERTURBATION: f32 = 1.0;

pub struct FaultyDevice {
    tracker: Arc<MemoryTracker>,
}

impl FaultyDevice {
    pub fn new() -> Self {
        Self {
            tracker: MemoryTracker::new(),
        }
    }
}

impl Default for FaultyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for FaultyDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::from(FAULTY_DEVICE)
    }

    fn create_context(&self, _device_id: i32) -> BackendResult<Arc<dyn Context>> {
        Ok(Arc::new(NaiveContext::new()))
    }

    fn create_layer_acc(&self, layer_type: LayerType) -> Option<Box<dyn LayerAcc>> {
        Some(Box::new(FaultyLayerAcc {
            inner: NaiveLayerAcc::new(layer_type),
        }))
    }

    fn memory_tracker(&self) -> &Arc<MemoryTracker> {
        &self.tracker
    }
}

struct FaultyLayerAcc {
    inner: NaiveLayerAcc,
}

impl LayerAcc for FaultyLayerAcc {
    fn init(
        &mut self,
        context: &Arc<dyn Context>,
        param: &LayerParam,
        resource: Option<&LayerResource>,
        inputs: &[&Blob],
        outputs: &mut [&mut Blob],
    ) -> BackendResult<()> {
        self.inner.init(context, param, resource, inputs, outputs)
    }

    fn reshape(&mut self, inputs: &[&Blob], outputs: &[&Blob]) -> BackendResult<()> {
        self.inner.reshape(inputs, outputs)
    }

    fn forward(&mut self, inputs: &[&Blob], outputs: &[&Blob]) -> BackendResult<()> {
        self.inner.forward(inputs, outputs)?;
        if let Some(output) = outputs.first() {
            let data_type = output.desc().data_type;
            output.memory()?.write(|bytes| {
                let value = data_type.read_f32(bytes, 0);
                data_type.write_f32(bytes, 0, value + PERTURBATION);
                // Saturated int8 values can only move down.
                if data_type.read_f32(bytes, 0) == value {
                    data_type.write_f32(bytes, 0, value - PERTURBATION);
                }
            });
        }
        Ok(())
    }
}

/// Registers the faulty device under [`FAULTY_DEVICE`].
pub fn register_faulty_device() {
    register_device(DeviceType::from(FAULTY_DEVICE), || {
        Arc::new(FaultyDevice::new())
    });
}
