//! Reference device for layercheck.
//!
//! Every kernel decodes its inputs to `f32`, computes element by element in
//! logical NCHW order and rounds back to the storage type. The scalar helpers
//! in [`math`] are public so other devices can reproduce its arithmetic.

mod device;
mod kernels;
pub mod math;

pub use device::{NaiveContext, NaiveDevice};
pub use kernels::NaiveLayerAcc;

use std::sync::Arc;

use layercheck::DeviceType;

/// Register the naive device with the global device registry.
///
/// Linking this crate registers it automatically; calling this again is harmless.
pub fn register_naive_device() {
    layercheck::backend::registry::register_device(DeviceType::Naive, || {
        Arc::new(NaiveDevice::new())
    });
}

#[layercheck::linkme::distributed_slice(layercheck::backend::registry::DEVICE_REGISTRARS)]
static REGISTER_NAIVE_DEVICE: fn() = register_naive_device;
