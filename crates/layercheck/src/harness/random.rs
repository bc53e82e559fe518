//! Seeded canonical inputs shared by both halves of a pair.

use half::bf16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::queue::CommandQueue;
use crate::convert::{BlobConverter, MatConvertParam};
use crate::error::{ParityError, Side};
use crate::tensor::{dims, Blob, Mat, MatData, MatType};

/// Deterministic random mat for input `magic`.
///
/// Floating encodings draw from `(0, 1+magic]` when `ensure_positive` is set
/// and from `(-(1+magic), 1+magic)` otherwise; int8 draws from `[0, 8]` or
/// `(-8, 8)`.
pub fn random_mat(mat_type: MatType, dims: &[usize], magic: usize, ensure_positive: bool) -> Mat {
    let mut rng = StdRng::seed_from_u64(magic as u64);
    let count = dims::count(dims);
    let bound = 1.0 + magic as f32;
    let data = match mat_type {
        MatType::NchwFloat => MatData::Float(
            (0..count)
                .map(|_| sample_float(&mut rng, bound, ensure_positive))
                .collect(),
        ),
        MatType::Bfp16Test => MatData::Bfp16(
            (0..count)
                .map(|_| bf16::from_f32(sample_float(&mut rng, bound, ensure_positive)))
                .collect(),
        ),
        MatType::Int8Test => MatData::Int8(
            (0..count)
                .map(|_| {
                    if ensure_positive {
                        rng.gen_range(0..=8)
                    } else {
                        rng.gen_range(-7..=7)
                    }
                })
                .collect(),
        ),
    };
    let mut mat = Mat::new(mat_type, dims.to_vec());
    mat.replace_data(data);
    mat
}

fn sample_float(rng: &mut StdRng, bound: f32, ensure_positive: bool) -> f32 {
    if ensure_positive {
        // gen() is in [0, 1), so this lands in (0, bound].
        bound - rng.gen::<f32>() * bound
    } else {
        loop {
            let value = (rng.gen::<f32>() * 2.0 - 1.0) * bound;
            if value > -bound {
                return value;
            }
        }
    }
}

/// Generates input `magic` once and writes it into both blobs.
///
/// The canonical encoding follows the candidate's data type so both sides see
/// the same values, including for reduced-precision candidates. Queued uploads
/// are flushed before returning so a failed copy is reported as a conversion
/// error of this tensor.
pub fn fill_random_blobs(
    reference: &Blob,
    candidate: &Blob,
    magic: usize,
    ensure_positive: bool,
    reference_queue: Option<&CommandQueue>,
    candidate_queue: Option<&CommandQueue>,
) -> Result<(), ParityError> {
    let data_type = candidate.desc().data_type;
    let mat_type = data_type
        .mat_type()
        .ok_or(ParityError::UnknownFormat(data_type))?;
    let mat = random_mat(mat_type, &candidate.desc().dims, magic, ensure_positive);
    let param = MatConvertParam::identity(candidate.desc().channels().unwrap_or(1));

    BlobConverter::new(reference)
        .convert_from_mat(&mat, &param, reference_queue)
        .map_err(|source| ParityError::Conversion {
            side: Side::Reference,
            tensor_index: magic,
            source,
        })?;
    BlobConverter::new(candidate)
        .convert_from_mat(&mat, &param, candidate_queue)
        .map_err(|source| ParityError::Conversion {
            side: Side::Candidate,
            tensor_index: magic,
            source,
        })?;

    for (side, queue) in [
        (Side::Reference, reference_queue),
        (Side::Candidate, candidate_queue),
    ] {
        if let Some(queue) = queue {
            queue.finish().map_err(|source| ParityError::Conversion {
                side,
                tensor_index: magic,
                source,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{BlobMemory, MemoryTracker};
    use crate::tensor::{BlobDesc, DataType};

    fn allocated(desc: BlobDesc) -> Blob {
        let memory = BlobMemory::zeroed(desc.byte_size(), MemoryTracker::new());
        let mut blob = Blob::new(desc);
        blob.attach(memory).unwrap();
        blob
    }

    #[test]
    fn same_magic_same_values() {
        let a = random_mat(MatType::NchwFloat, &[1, 3, 4, 4], 2, false);
        let b = random_mat(MatType::NchwFloat, &[1, 3, 4, 4], 2, false);
        let c = random_mat(MatType::NchwFloat, &[1, 3, 4, 4], 3, false);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn float_ranges_follow_magic() {
        let positive = random_mat(MatType::NchwFloat, &[4096], 0, true).to_f32_vec();
        assert!(positive.iter().all(|&v| v > 0.0 && v <= 1.0));

        let signed = random_mat(MatType::NchwFloat, &[4096], 2, false).to_f32_vec();
        assert!(signed.iter().all(|&v| v > -3.0 && v < 3.0));
        assert!(signed.iter().any(|&v| v < 0.0));
        assert!(signed.iter().any(|&v| v > 1.0));
    }

    #[test]
    fn int8_ranges() {
        let positive = random_mat(MatType::Int8Test, &[2048], 0, true).to_f32_vec();
        assert!(positive.iter().all(|&v| (0.0..=8.0).contains(&v)));
        assert!(positive.contains(&8.0));

        let signed = random_mat(MatType::Int8Test, &[2048], 1, false).to_f32_vec();
        assert!(signed.iter().all(|&v| v > -8.0 && v < 8.0));
        assert!(signed.iter().any(|&v| v < 0.0));
    }

    #[test]
    fn bfp16_uses_float_bounds() {
        let mat = random_mat(MatType::Bfp16Test, &[512], 1, false);
        assert_eq!(mat.mat_type(), MatType::Bfp16Test);
        assert!(mat.to_f32_vec().iter().all(|&v| v.abs() <= 2.0));
    }

    #[test]
    fn queued_upload_failure_is_a_conversion_error() {
        let queue = CommandQueue::new("uploads").unwrap();
        let reference = allocated(BlobDesc::new([1, 2, 2, 2], DataType::Int32));
        let candidate = allocated(BlobDesc::new([1, 2, 2, 2], DataType::Float));
        let err = fill_random_blobs(&reference, &candidate, 3, false, Some(&queue), None)
            .unwrap_err();
        assert!(
            matches!(
                err,
                ParityError::Conversion {
                    side: Side::Reference,
                    tensor_index: 3,
                    ..
                }
            ),
            "{err}"
        );
        queue.finish().unwrap();
    }

    #[test]
    fn queued_uploads_are_visible_after_fill() {
        let queue = CommandQueue::new("visible").unwrap();
        let reference = allocated(BlobDesc::new([1, 2, 2, 2], DataType::Float));
        let candidate = allocated(BlobDesc::new([1, 2, 2, 2], DataType::Float));
        fill_random_blobs(&reference, &candidate, 0, true, Some(&queue), Some(&queue)).unwrap();

        let mut uploaded = Mat::new(MatType::NchwFloat, [1, 2, 2, 2]);
        BlobConverter::new(&reference)
            .convert_to_mat(&mut uploaded, &MatConvertParam::default(), None)
            .unwrap();
        assert_eq!(uploaded, random_mat(MatType::NchwFloat, &[1, 2, 2, 2], 0, true));
    }
}
