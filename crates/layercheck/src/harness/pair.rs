use std::sync::{Arc, Weak};

use crate::backend::spec::Device;
use crate::error::{ParityError, Side};
use crate::tensor::{dims, Blob, BlobDesc, DataType, IntScaleResource};

/// The reference and candidate instance of one logical tensor.
///
/// For int8 tensors both halves point at the same scale resource; the pair
/// holds the owning handle and drops it last in [`BlobPair::release`].
#[derive(Debug)]
pub struct BlobPair {
    reference: Blob,
    candidate: Blob,
    int_scale: Option<Arc<IntScaleResource>>,
}

impl BlobPair {
    pub fn name(&self) -> &str {
        self.candidate.name()
    }

    pub fn reference(&self) -> &Blob {
        &self.reference
    }

    pub fn candidate(&self) -> &Blob {
        &self.candidate
    }

    pub fn reference_mut(&mut self) -> &mut Blob {
        &mut self.reference
    }

    pub fn candidate_mut(&mut self) -> &mut Blob {
        &mut self.candidate
    }

    pub fn int_scale(&self) -> Option<&Arc<IntScaleResource>> {
        self.int_scale.as_ref()
    }

    /// Non-owning handle for observing when the scale resource is released.
    pub fn int_scale_watch(&self) -> Option<Weak<IntScaleResource>> {
        self.int_scale.as_ref().map(Arc::downgrade)
    }

    pub fn allocate(
        &mut self,
        reference: &dyn Device,
        candidate: &dyn Device,
    ) -> Result<(), ParityError> {
        self.reference
            .allocate(reference)
            .map_err(|source| ParityError::Initialization {
                side: Side::Reference,
                source,
            })?;
        self.candidate
            .allocate(candidate)
            .map_err(|source| ParityError::Initialization {
                side: Side::Candidate,
                source,
            })
    }

    /// Frees both buffers, drops both halves, then the scale resource.
    pub fn release(self) {
        let BlobPair {
            mut reference,
            mut candidate,
            int_scale,
        } = self;
        reference.free();
        candidate.free();
        drop(reference);
        drop(candidate);
        drop(int_scale);
    }
}

/// Builds described but unallocated [`BlobPair`]s for a reference/candidate device pair.
pub struct TensorPairFactory<'a> {
    reference: &'a dyn Device,
    candidate: &'a dyn Device,
}

impl<'a> TensorPairFactory<'a> {
    pub fn new(reference: &'a dyn Device, candidate: &'a dyn Device) -> Self {
        Self {
            reference,
            candidate,
        }
    }

    pub fn create_inputs(&self, descs: &[BlobDesc]) -> Vec<BlobPair> {
        descs
            .iter()
            .enumerate()
            .map(|(idx, desc)| {
                let channels = dims::channel(&desc.dims).unwrap_or(1);
                self.create_pair(desc, &format!("input{idx}"), channels, idx as u64)
            })
            .collect()
    }

    /// Output scale resources fall back to the first input's channel count
    /// when an output has no channel dimension.
    pub fn create_outputs(&self, descs: &[BlobDesc], inputs: &[BlobPair]) -> Vec<BlobPair> {
        let fallback = inputs
            .first()
            .and_then(|pair| pair.candidate.desc().channels())
            .unwrap_or(1);
        descs
            .iter()
            .enumerate()
            .map(|(idx, desc)| {
                let channels = dims::channel(&desc.dims).unwrap_or(fallback);
                self.create_pair(desc, &format!("output{idx}"), channels, 0x100 + idx as u64)
            })
            .collect()
    }

    fn create_pair(
        &self,
        desc: &BlobDesc,
        default_name: &str,
        channels: usize,
        seed: u64,
    ) -> BlobPair {
        let name = if desc.name.is_empty() {
            default_name.to_string()
        } else {
            desc.name.clone()
        };
        let candidate_type = desc.data_type;
        let reference_type = candidate_type.reference_type();

        let reference_desc = BlobDesc {
            name: name.clone(),
            data_type: reference_type,
            data_format: self.reference.preferred_format(reference_type),
            device_type: self.reference.device_type(),
            dims: desc.dims.clone(),
        };
        let candidate_desc = BlobDesc {
            name: name.clone(),
            data_type: candidate_type,
            data_format: self.candidate.preferred_format(candidate_type),
            device_type: self.candidate.device_type(),
            dims: desc.dims.clone(),
        };

        let mut reference = Blob::new(reference_desc);
        let mut candidate = Blob::new(candidate_desc);
        let int_scale = (candidate_type == DataType::Int8).then(|| {
            Arc::new(IntScaleResource::random(
                format!("{name}_int_scale"),
                channels,
                seed,
            ))
        });
        if let Some(resource) = &int_scale {
            candidate = candidate.with_int_scale(Arc::clone(resource));
            if reference_type == DataType::Int8 {
                reference = reference.with_int_scale(Arc::clone(resource));
            }
        }
        BlobPair {
            reference,
            candidate,
            int_scale,
        }
    }
}
