//! Channel-blocked candidate device for layercheck.
//!
//! Blobs are stored NC4HW4 in their declared precision (`f32`, `f16`, `bf16`
//! or quantized `i8`). Kernels are submitted to a per-context command queue
//! and split across the context's threads; the scalar arithmetic is shared
//! with the naive device.

mod device;
mod kernels;
mod layout;

pub use device::{PackedContext, PackedDevice, ALIGNMENT};
pub use kernels::PackedLayerAcc;

use std::sync::Arc;

use layercheck::DeviceType;

/// Register the packed device with the global device registry.
///
/// This function is called automatically via a link-time registrar, but can
/// also be called manually to ensure the device is registered.
pub fn register_packed_device() {
    layercheck::backend::registry::register_device(DeviceType::Packed, || {
        Arc::new(PackedDevice::new())
    });
}

#[layercheck::linkme::distributed_slice(layercheck::backend::registry::DEVICE_REGISTRARS)]
static REGISTER_PACKED_DEVICE: fn() = register_packed_device;
