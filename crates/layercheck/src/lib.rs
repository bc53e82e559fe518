//! Cross-backend numerical conformance harness for neural-network layers.
//!
//! A layer is executed on a trusted reference device and on a candidate
//! device from the same canonical inputs; the harness then certifies that
//! both produce the same outputs within a precision-appropriate tolerance.

pub mod backend;
pub mod config;
pub mod convert;
mod env;
pub mod error;
pub mod harness;
pub mod layer;
pub mod model;
pub mod tensor;

pub use linkme;

pub use backend::spec::{BackendError, BackendResult, Context, Device, DeviceType};
pub use config::HarnessConfig;
pub use error::{ParityError, Side};
pub use harness::{LayerTest, ModelTest, ParityFixture, RunReport};
pub use layer::{Layer, LayerAcc, LayerParam, LayerResource, LayerType};
pub use tensor::{Blob, BlobDesc, DataFormat, DataType, IntScaleResource, Mat, MatType};
