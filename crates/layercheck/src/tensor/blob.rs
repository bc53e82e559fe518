use std::sync::Arc;

use super::desc::BlobDesc;
use super::quant::IntScaleResource;
use crate::backend::memory::BlobMemory;
use crate::backend::spec::{BackendError, BackendResult, Device};

/// A described tensor that may or may not have device storage yet.
///
/// `Blob::new` only records the descriptor; [`Blob::allocate`] asks the
/// target device for storage once the descriptor is final, and
/// [`Blob::free`] gives it back.
#[derive(Debug)]
pub struct Blob {
    desc: BlobDesc,
    int_scale: Option<Arc<IntScaleResource>>,
    memory: Option<BlobMemory>,
}

impl Blob {
    pub fn new(desc: BlobDesc) -> Self {
        Self {
            desc,
            int_scale: None,
            memory: None,
        }
    }

    pub fn with_int_scale(mut self, int_scale: Arc<IntScaleResource>) -> Self {
        self.int_scale = Some(int_scale);
        self
    }

    pub fn desc(&self) -> &BlobDesc {
        &self.desc
    }

    /// Mutable access to the descriptor; rejected once storage exists.
    pub fn desc_mut(&mut self) -> BackendResult<&mut BlobDesc> {
        if self.memory.is_some() {
            return Err(BackendError::invalid_blob(format!(
                "blob '{}' cannot be redescribed while allocated",
                self.desc.name
            )));
        }
        Ok(&mut self.desc)
    }

    /// Updates the logical shape. The existing storage must be large enough.
    pub fn set_dims(&mut self, dims: Vec<usize>) -> BackendResult<()> {
        if let Some(memory) = &self.memory {
            let resized = BlobDesc {
                dims: dims.clone(),
                ..self.desc.clone()
            };
            if resized.byte_size() > memory.byte_len() {
                return Err(BackendError::invalid_blob(format!(
                    "blob '{}' cannot grow to {:?} without reallocation",
                    self.desc.name, dims
                )));
            }
        }
        self.desc.dims = dims;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn int_scale(&self) -> Option<&Arc<IntScaleResource>> {
        self.int_scale.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.memory.is_some()
    }

    pub fn allocate(&mut self, device: &dyn Device) -> BackendResult<()> {
        if self.memory.is_some() {
            return Err(BackendError::invalid_blob(format!(
                "blob '{}' is already allocated",
                self.desc.name
            )));
        }
        let memory = device.allocate(&self.desc)?;
        self.attach(memory)
    }

    /// Binds existing storage to this blob.
    pub fn attach(&mut self, memory: BlobMemory) -> BackendResult<()> {
        if self.memory.is_some() {
            return Err(BackendError::invalid_blob(format!(
                "blob '{}' is already allocated",
                self.desc.name
            )));
        }
        if memory.byte_len() < self.desc.byte_size() {
            return Err(BackendError::invalid_blob(format!(
                "blob '{}' needs {} bytes but storage holds {}",
                self.desc.name,
                self.desc.byte_size(),
                memory.byte_len()
            )));
        }
        self.memory = Some(memory);
        Ok(())
    }

    /// Releases this blob's handle on its storage. Returns `false` when nothing was held.
    pub fn free(&mut self) -> bool {
        self.memory.take().is_some()
    }

    pub fn memory(&self) -> BackendResult<&BlobMemory> {
        self.memory.as_ref().ok_or_else(|| {
            BackendError::invalid_blob(format!("blob '{}' is not allocated", self.desc.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryTracker;
    use crate::backend::spec::{Context, DeviceType};
    use crate::layer::{LayerAcc, LayerType};
    use crate::tensor::DataType;

    struct HostDevice {
        tracker: Arc<MemoryTracker>,
    }

    impl Device for HostDevice {
        fn device_type(&self) -> DeviceType {
            DeviceType::Naive
        }

        fn create_context(&self, _device_id: i32) -> BackendResult<Arc<dyn Context>> {
            Err(BackendError::unimplemented("create_context", &DeviceType::Naive))
        }

        fn create_layer_acc(&self, _layer_type: LayerType) -> Option<Box<dyn LayerAcc>> {
            None
        }

        fn memory_tracker(&self) -> &Arc<MemoryTracker> {
            &self.tracker
        }
    }

    #[test]
    fn allocation_is_an_explicit_second_phase() {
        let device = HostDevice {
            tracker: MemoryTracker::new(),
        };
        let mut blob = Blob::new(BlobDesc::new([1, 2, 2, 2], DataType::Float).with_name("x"));
        assert!(!blob.is_allocated());
        assert!(blob.memory().is_err());

        blob.desc_mut().unwrap().dims = vec![1, 2, 4, 4];
        blob.allocate(&device).unwrap();
        assert_eq!(blob.memory().unwrap().byte_len(), 128);
        assert_eq!(device.tracker.outstanding(), 1);
        assert!(blob.allocate(&device).is_err());
        assert!(blob.desc_mut().is_err());

        assert!(blob.free());
        assert!(!blob.free());
        assert_eq!(device.tracker.outstanding(), 0);
    }

    #[test]
    fn set_dims_rejects_growth_past_storage() {
        let device = HostDevice {
            tracker: MemoryTracker::new(),
        };
        let mut blob = Blob::new(BlobDesc::new([1, 2, 2, 2], DataType::Float));
        blob.allocate(&device).unwrap();
        blob.set_dims(vec![1, 2, 2, 1]).unwrap();
        assert!(blob.set_dims(vec![1, 2, 4, 4]).is_err());
    }

    #[test]
    fn allocation_checks_device_placement() {
        let device = HostDevice {
            tracker: MemoryTracker::new(),
        };
        let mut blob =
            Blob::new(BlobDesc::new([4], DataType::Float).on_device(DeviceType::Packed));
        assert!(blob.allocate(&device).is_err());
    }
}
