use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use layercheck::backend::{CommandQueue, LibraryHandles, MemoryTracker};
use layercheck::{
    BackendError, BackendResult, BlobDesc, Context, DataFormat, DataType, Device, DeviceType,
    LayerAcc, LayerType,
};
use tracing::debug;

use crate::kernels::PackedLayerAcc;
use crate::layout::align_bytes;

/// Allocation granule of packed buffers, in bytes.
pub const ALIGNMENT: usize = 64;

/// Candidate device storing blobs channel-blocked in their declared precision.
///
/// Kernels and copies run asynchronously on each context's command queue.
pub struct PackedDevice {
    tracker: Arc<MemoryTracker>,
}

impl PackedDevice {
    pub fn new() -> Self {
        Self {
            tracker: MemoryTracker::new(),
        }
    }
}

impl Default for PackedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for PackedDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::Packed
    }

    fn create_context(&self, device_id: i32) -> BackendResult<Arc<dyn Context>> {
        if device_id < 0 {
            return Err(BackendError::execution(format!(
                "invalid packed device id {device_id}"
            )));
        }
        Ok(Arc::new(PackedContext::new(device_id)?))
    }

    fn create_layer_acc(&self, layer_type: LayerType) -> Option<Box<dyn LayerAcc>> {
        Some(Box::new(PackedLayerAcc::new(layer_type)))
    }

    fn preferred_format(&self, _data_type: DataType) -> DataFormat {
        DataFormat::Nc4hw4
    }

    fn memory_size(&self, desc: &BlobDesc) -> BackendResult<usize> {
        Ok(align_bytes(desc.byte_size(), ALIGNMENT))
    }

    fn memory_tracker(&self) -> &Arc<MemoryTracker> {
        &self.tracker
    }
}

pub struct PackedContext {
    device_id: i32,
    queue: CommandQueue,
    libraries: LibraryHandles,
    threads: AtomicUsize,
    in_forward: AtomicBool,
}

impl PackedContext {
    pub fn new(device_id: i32) -> BackendResult<Self> {
        let queue = CommandQueue::new(format!("packed{device_id}"))?;
        debug!(device_id, "created packed context");
        Ok(Self {
            device_id,
            queue,
            libraries: LibraryHandles::new(),
            threads: AtomicUsize::new(1),
            in_forward: AtomicBool::new(false),
        })
    }

    pub fn libraries(&self) -> &LibraryHandles {
        &self.libraries
    }
}

impl Context for PackedContext {
    fn device_type(&self) -> DeviceType {
        DeviceType::Packed
    }

    fn device_id(&self) -> i32 {
        self.device_id
    }

    fn load_library(&self, paths: &[PathBuf]) -> BackendResult<()> {
        self.libraries.load(paths)
    }

    fn set_num_threads(&self, threads: usize) -> BackendResult<()> {
        let threads = threads.max(1);
        self.threads.store(threads, Ordering::Relaxed);
        debug!(device_id = self.device_id, threads, "packed context threads");
        Ok(())
    }

    fn num_threads(&self) -> usize {
        self.threads.load(Ordering::Relaxed)
    }

    fn command_queue(&self) -> Option<CommandQueue> {
        Some(self.queue.clone())
    }

    fn on_instance_forward_begin(&self) -> BackendResult<()> {
        if self.in_forward.swap(true, Ordering::AcqRel) {
            return Err(BackendError::execution(
                "forward begin while a forward is already open",
            ));
        }
        Ok(())
    }

    fn on_instance_forward_end(&self) -> BackendResult<()> {
        if !self.in_forward.swap(false, Ordering::AcqRel) {
            return Err(BackendError::execution("forward end without a matching begin"));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
