use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use layercheck::backend::{LibraryHandles, MemoryTracker};
use layercheck::{BackendError, BackendResult, Context, Device, DeviceType, LayerAcc, LayerType};
use tracing::debug;

use crate::kernels::NaiveLayerAcc;

/// Synchronous host device storing every blob as plain NCHW.
pub struct NaiveDevice {
    tracker: Arc<MemoryTracker>,
}

impl NaiveDevice {
    pub fn new() -> Self {
        Self {
            tracker: MemoryTracker::new(),
        }
    }
}

impl Default for NaiveDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for NaiveDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::Naive
    }

    fn create_context(&self, device_id: i32) -> BackendResult<Arc<dyn Context>> {
        if device_id != 0 {
            return Err(BackendError::execution(format!(
                "naive device has a single instance, got device id {device_id}"
            )));
        }
        debug!("created naive context");
        Ok(Arc::new(NaiveContext::new()))
    }

    fn create_layer_acc(&self, layer_type: LayerType) -> Option<Box<dyn LayerAcc>> {
        Some(Box::new(NaiveLayerAcc::new(layer_type)))
    }

    fn memory_tracker(&self) -> &Arc<MemoryTracker> {
        &self.tracker
    }
}

/// Context of a [`NaiveDevice`]. Work runs on the calling thread, so there is
/// no command queue and `synchronize` returns immediately.
pub struct NaiveContext {
    libraries: LibraryHandles,
    threads: AtomicUsize,
}

impl NaiveContext {
    pub fn new() -> Self {
        Self {
            libraries: LibraryHandles::new(),
            threads: AtomicUsize::new(1),
        }
    }

    pub fn libraries(&self) -> &LibraryHandles {
        &self.libraries
    }
}

impl Default for NaiveContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Context for NaiveContext {
    fn device_type(&self) -> DeviceType {
        DeviceType::Naive
    }

    fn device_id(&self) -> i32 {
        0
    }

    fn load_library(&self, paths: &[PathBuf]) -> BackendResult<()> {
        self.libraries.load(paths)
    }

    // Recorded for reporting; naive kernels always run single-threaded.
    fn set_num_threads(&self, threads: usize) -> BackendResult<()> {
        self.threads.store(threads.max(1), Ordering::Relaxed);
        Ok(())
    }

    fn num_threads(&self) -> usize {
        self.threads.load(Ordering::Relaxed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
