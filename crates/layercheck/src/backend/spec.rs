//! Device and execution-context contracts implemented by every backend.
//!
//! A [`Device`] describes a compute target: how it lays out tensors, how much
//! memory a tensor needs, and which layer kernels it provides. A [`Context`]
//! is the per-session execution state created from a device (thread count,
//! optional command queue, loaded extension libraries).

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::memory::{BlobMemory, MemoryTracker};
use super::queue::CommandQueue;
use crate::layer::{LayerAcc, LayerType};
use crate::tensor::{BlobDesc, DataFormat, DataType};

/// Registry name of a compute target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    /// Scalar NCHW reference implementation.
    Naive,
    /// Channel-packed implementation with reduced-precision storage.
    Packed,
    /// Any device registered under another name, typically from an extension library.
    Custom(String),
}

impl DeviceType {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::Naive => "naive",
            DeviceType::Packed => "packed",
            DeviceType::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "naive" => DeviceType::Naive,
            "packed" => DeviceType::Packed,
            _ => DeviceType::Custom(normalized),
        })
    }
}

impl From<String> for DeviceType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(device_type) => device_type,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for DeviceType {
    fn from(value: &str) -> Self {
        DeviceType::from(value.to_string())
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("device '{0}' is not registered")]
    UnknownDevice(String),
    #[error("{op} is not implemented on device '{device}'")]
    Unimplemented { op: String, device: String },
    #[error("invalid blob: {message}")]
    InvalidBlob { message: String },
    #[error("unsupported conversion: {message}")]
    UnsupportedConversion { message: String },
    #[error("failed to load library {}: {message}", path.display())]
    Library { path: PathBuf, message: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn unimplemented(op: impl Into<String>, device: &DeviceType) -> Self {
        BackendError::Unimplemented {
            op: op.into(),
            device: device.to_string(),
        }
    }

    pub fn invalid_blob(message: impl Into<String>) -> Self {
        BackendError::InvalidBlob {
            message: message.into(),
        }
    }

    pub fn unsupported_conversion(message: impl Into<String>) -> Self {
        BackendError::UnsupportedConversion {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Execution state bound to one device instance.
///
/// Contexts are shared behind `Arc` and use interior mutability, so every
/// method takes `&self`.
pub trait Context: Send + Sync {
    fn device_type(&self) -> DeviceType;

    fn device_id(&self) -> i32;

    /// Loads extension libraries into this context. An empty list is a no-op.
    fn load_library(&self, paths: &[PathBuf]) -> BackendResult<()>;

    fn set_num_threads(&self, threads: usize) -> BackendResult<()>;

    fn num_threads(&self) -> usize;

    /// Returns the queue work is submitted to, or `None` for synchronous devices.
    fn command_queue(&self) -> Option<CommandQueue> {
        None
    }

    fn on_instance_forward_begin(&self) -> BackendResult<()> {
        Ok(())
    }

    fn on_instance_forward_end(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Blocks until every submitted command has finished and reports the first
    /// failure among them.
    fn synchronize(&self) -> BackendResult<()> {
        match self.command_queue() {
            Some(queue) => queue.finish(),
            None => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any;
}

/// Compute target able to host blobs and run layer kernels.
pub trait Device: Send + Sync {
    fn device_type(&self) -> DeviceType;

    fn create_context(&self, device_id: i32) -> BackendResult<Arc<dyn Context>>;

    /// Returns the kernel implementing `layer_type`, or `None` when unsupported.
    fn create_layer_acc(&self, layer_type: LayerType) -> Option<Box<dyn LayerAcc>>;

    /// Physical layout this device stores blobs of `data_type` in.
    fn preferred_format(&self, _data_type: DataType) -> DataFormat {
        DataFormat::Nchw
    }

    /// Bytes of device memory a blob described by `desc` occupies.
    fn memory_size(&self, desc: &BlobDesc) -> BackendResult<usize> {
        Ok(desc.byte_size())
    }

    fn memory_tracker(&self) -> &Arc<MemoryTracker>;

    /// Allocates zeroed storage for `desc`; the returned handle owns it.
    fn allocate(&self, desc: &BlobDesc) -> BackendResult<BlobMemory> {
        if desc.device_type != self.device_type() {
            return Err(BackendError::invalid_blob(format!(
                "blob '{}' targets device '{}' but was allocated on '{}'",
                desc.name,
                desc.device_type,
                self.device_type()
            )));
        }
        let bytes = self.memory_size(desc)?;
        Ok(BlobMemory::zeroed(bytes, Arc::clone(self.memory_tracker())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_round_trips_through_names() {
        assert_eq!("naive".parse::<DeviceType>().unwrap(), DeviceType::Naive);
        assert_eq!(" Packed ".parse::<DeviceType>().unwrap(), DeviceType::Packed);
        assert_eq!(
            DeviceType::from("opencl"),
            DeviceType::Custom("opencl".to_string())
        );
        assert_eq!(String::from(DeviceType::Packed), "packed");
    }

    #[test]
    fn device_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&DeviceType::Naive).unwrap();
        assert_eq!(json, "\"naive\"");
        let parsed: DeviceType = serde_json::from_str("\"metal\"").unwrap();
        assert_eq!(parsed, DeviceType::Custom("metal".to_string()));
    }
}
