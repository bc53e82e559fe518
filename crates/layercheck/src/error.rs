use std::fmt;

use thiserror::Error;

use crate::backend::spec::BackendError;
use crate::harness::Stage;
use crate::model::ModelError;
use crate::tensor::{DataType, Tolerance};

/// Which half of a reference/candidate pair an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Reference,
    Candidate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Reference => f.write_str("reference"),
            Side::Candidate => f.write_str("candidate"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ParityError {
    /// Devices, contexts or extension libraries could not be acquired.
    #[error("setup failed: {message}")]
    Setup { message: String },
    #[error("{side} layer initialization failed: {source}")]
    Initialization {
        side: Side,
        #[source]
        source: BackendError,
    },
    #[error("{side} {stage} failed: {source}")]
    Execution {
        side: Side,
        stage: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("{side} conversion of tensor {tensor_index} failed: {source}")]
    Conversion {
        side: Side,
        tensor_index: usize,
        #[source]
        source: BackendError,
    },
    #[error(
        "output {tensor_index} ('{tensor}') diverges at element {element}: \
         reference {reference}, candidate {candidate}, tolerance {tolerance}"
    )]
    ComparisonMismatch {
        tensor_index: usize,
        tensor: String,
        element: usize,
        reference: f32,
        candidate: f32,
        tolerance: Tolerance,
        reference_sample: Vec<f32>,
        candidate_sample: Vec<f32>,
    },
    #[error("{operation} is not valid in stage {stage}")]
    InvalidStage {
        operation: &'static str,
        stage: Stage,
    },
    #[error("no comparison rule for data type {0}")]
    UnknownFormat(DataType),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ParityError {
    pub fn setup(message: impl Into<String>) -> Self {
        ParityError::Setup {
            message: message.into(),
        }
    }

    /// Returns `true` when the outputs were produced but disagreed.
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            ParityError::ComparisonMismatch { .. } | ParityError::UnknownFormat(_)
        )
    }

    /// Index of the diverging output tensor, if this is a mismatch.
    pub fn tensor_index(&self) -> Option<usize> {
        match self {
            ParityError::ComparisonMismatch { tensor_index, .. } => Some(*tensor_index),
            _ => None,
        }
    }
}
