//! Reference-versus-candidate execution harness.
//!
//! [`ParityFixture`] owns the two devices and their contexts for a whole
//! suite. [`LayerTest`] checks one layer through
//! `init → reshape → forward → compare → deinit`; [`ModelTest`] does the same
//! for a whole serialized model.

pub mod compare;
pub mod fixture;
pub mod layer_test;
pub mod pair;
pub mod random;
pub mod timing;

pub use compare::{compare_blobs, compare_mats, Mismatch};
pub use fixture::{FixtureSession, ParityFixture};
pub use layer_test::{LayerTest, RunReport, Stage};
pub use model_test::{ModelReport, ModelTest};
pub use pair::{BlobPair, TensorPairFactory};
pub use random::{fill_random_blobs, random_mat};
pub use timing::{BenchStats, Throughput};
