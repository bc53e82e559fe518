pub mod blob;
pub mod desc;
pub mod dims;
pub mod dtype;
pub mod format;
pub mod mat;
pub mod quant;

pub use blob::Blob;
pub use desc::BlobDesc;
pub use dtype::{DataType, Tolerance};
pub use format::DataFormat;
pub use mat::{Mat, MatData, MatType};
pub use quant::IntScaleResource;
