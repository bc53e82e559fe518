use serde::{Deserialize, Serialize};

use super::dims;
use super::dtype::DataType;
use super::format::DataFormat;
use crate::backend::spec::DeviceType;

/// Shape, element type, layout and placement of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobDesc {
    #[serde(default)]
    pub name: String,
    pub dims: Vec<usize>,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default = "default_device_type")]
    pub device_type: DeviceType,
}

fn default_data_type() -> DataType {
    DataType::Float
}

fn default_device_type() -> DeviceType {
    DeviceType::Naive
}

impl BlobDesc {
    pub fn new(dims: impl Into<Vec<usize>>, data_type: DataType) -> Self {
        Self {
            name: String::new(),
            dims: dims.into(),
            data_type,
            data_format: DataFormat::Nchw,
            device_type: DeviceType::Naive,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = data_format;
        self
    }

    pub fn on_device(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    /// Logical element count.
    pub fn element_count(&self) -> usize {
        dims::count(&self.dims)
    }

    pub fn channels(&self) -> Option<usize> {
        dims::channel(&self.dims)
    }

    /// Dense storage size in bytes, layout padding included.
    pub fn byte_size(&self) -> usize {
        self.data_format.capacity(&self.dims) * self.data_type.size_in_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_accounts_for_layout_and_type() {
        let desc = BlobDesc::new([1, 3, 8, 8], DataType::Float);
        assert_eq!(desc.byte_size(), 3 * 64 * 4);
        let packed = desc.clone().with_format(DataFormat::Nc4hw4);
        assert_eq!(packed.byte_size(), 4 * 64 * 4);
        let half = BlobDesc {
            data_type: DataType::Half,
            ..packed
        };
        assert_eq!(half.byte_size(), 4 * 64 * 2);
    }

    #[test]
    fn deserializes_with_defaults() {
        let desc: BlobDesc = serde_json::from_str(r#"{"dims":[1,2,3,4]}"#).unwrap();
        assert_eq!(desc.data_type, DataType::Float);
        assert_eq!(desc.data_format, DataFormat::Nchw);
        assert_eq!(desc.element_count(), 24);
    }
}
