use tracing::error;

use crate::backend::queue::CommandQueue;
use crate::convert::{BlobConverter, MatConvertParam};
use crate::error::{ParityError, Side};
use crate::tensor::{Blob, Mat, Tolerance};

/// Values printed from each side when outputs disagree.
const SAMPLE_LEN: usize = 4;

/// First element at which two canonical mats disagree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub element: usize,
    pub reference: f32,
    pub candidate: f32,
}

/// Compares two canonical mats element by element.
///
/// Mats of different sizes mismatch at the first index past the shorter one.
pub fn compare_mats(reference: &Mat, candidate: &Mat, tolerance: Tolerance) -> Result<(), Mismatch> {
    let reference_data = reference.data();
    let candidate_data = candidate.data();
    let shared = reference_data.len().min(candidate_data.len());
    for element in 0..shared {
        let expected = reference_data.get_f32(element);
        let actual = candidate_data.get_f32(element);
        if !tolerance.accepts(expected, actual) {
            return Err(Mismatch {
                element,
                reference: expected,
                candidate: actual,
            });
        }
    }
    if reference_data.len() != candidate_data.len() {
        return Err(Mismatch {
            element: shared,
            reference: f32::NAN,
            candidate: f32::NAN,
        });
    }
    Ok(())
}

/// Reads both halves back in the candidate's canonical encoding and compares them.
///
/// Returns the candidate's canonical values on success.
pub fn compare_blobs(
    tensor_index: usize,
    reference: &Blob,
    candidate: &Blob,
    reference_queue: Option<&CommandQueue>,
    candidate_queue: Option<&CommandQueue>,
) -> Result<Mat, ParityError> {
    let data_type = candidate.desc().data_type;
    let (Some(mat_type), Some(tolerance)) = (data_type.mat_type(), data_type.tolerance()) else {
        error!(tensor = candidate.name(), %data_type, "no comparison rule for data type");
        return Err(ParityError::UnknownFormat(data_type));
    };

    let param = MatConvertParam::default();
    let mut reference_mat = Mat::new(mat_type, reference.desc().dims.clone());
    BlobConverter::new(reference)
        .convert_to_mat(&mut reference_mat, &param, reference_queue)
        .map_err(|source| ParityError::Conversion {
            side: Side::Reference,
            tensor_index,
            source,
        })?;
    let mut candidate_mat = Mat::new(mat_type, candidate.desc().dims.clone());
    BlobConverter::new(candidate)
        .convert_to_mat(&mut candidate_mat, &param, candidate_queue)
        .map_err(|source| ParityError::Conversion {
            side: Side::Candidate,
            tensor_index,
            source,
        })?;

    match compare_mats(&reference_mat, &candidate_mat, tolerance) {
        Ok(()) => Ok(candidate_mat),
        Err(mismatch) => {
            let reference_sample = reference_mat.head(SAMPLE_LEN);
            let candidate_sample = candidate_mat.head(SAMPLE_LEN);
            error!(
                tensor_index,
                tensor = candidate.name(),
                element = mismatch.element,
                %tolerance,
                ?reference_sample,
                ?candidate_sample,
                "output mismatch"
            );
            Err(ParityError::ComparisonMismatch {
                tensor_index,
                tensor: candidate.name().to_string(),
                element: mismatch.element,
                reference: mismatch.reference,
                candidate: mismatch.candidate,
                tolerance,
                reference_sample,
                candidate_sample,
            })
        }
    }
}
