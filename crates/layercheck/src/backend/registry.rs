//! Runtime device registry for selecting compute targets by name.
//!
//! Backend crates register a constructor under their [`DeviceType`] name,
//! either explicitly through [`register_device`] or automatically by adding a
//! registrar function to [`DEVICE_REGISTRARS`]:
//!
//! ```ignore
//! #[linkme::distributed_slice(layercheck::backend::registry::DEVICE_REGISTRARS)]
//! static REGISTER_MY_DEVICE: fn() = register_my_device;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Once, OnceLock, PoisonError, RwLock};

use super::spec::{BackendError, BackendResult, Device, DeviceType};

/// Factory producing a fresh device instance.
pub type DeviceConstructor = Box<dyn Fn() -> Arc<dyn Device> + Send + Sync>;

/// Registrar functions collected at link time and run once before the first lookup.
#[linkme::distributed_slice]
pub static DEVICE_REGISTRARS: [fn()] = [..];

struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceConstructor>>,
}

impl DeviceRegistry {
    fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: DeviceConstructor) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn Device>> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let constructor = devices.get(name)?;
        Some(constructor())
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

static GLOBAL_REGISTRY: OnceLock<DeviceRegistry> = OnceLock::new();
static RUN_REGISTRARS: Once = Once::new();

fn registry_storage() -> &'static DeviceRegistry {
    GLOBAL_REGISTRY.get_or_init(DeviceRegistry::new)
}

// Registrars call back into `register_device`, which only touches storage.
fn global_registry() -> &'static DeviceRegistry {
    RUN_REGISTRARS.call_once(|| {
        for registrar in DEVICE_REGISTRARS.iter() {
            registrar();
        }
    });
    registry_storage()
}

/// Registers `constructor` under `device_type`, replacing any earlier entry.
pub fn register_device<F>(device_type: DeviceType, constructor: F)
where
    F: Fn() -> Arc<dyn Device> + Send + Sync + 'static,
{
    registry_storage().register(device_type.to_string(), Box::new(constructor));
}

/// Creates a new instance of the device registered under `device_type`.
pub fn get_device(device_type: &DeviceType) -> BackendResult<Arc<dyn Device>> {
    global_registry()
        .create(device_type.as_str())
        .ok_or_else(|| BackendError::UnknownDevice(device_type.to_string()))
}

/// Registered device names in sorted order.
pub fn list_devices() -> Vec<String> {
    global_registry().names()
}

pub fn has_device(device_type: &DeviceType) -> bool {
    list_devices()
        .iter()
        .any(|name| name == device_type.as_str())
}
