//! Conversion between canonical host mats and device blobs.
//!
//! The element codec is chosen from the blob's [`DataType`] and the index map
//! from its [`DataFormat`](crate::tensor::DataFormat); which device owns the
//! blob never matters. With a [`CommandQueue`] the copy is ordered on that
//! queue: uploads are enqueued, downloads are enqueued and awaited.

use std::sync::Arc;

use half::bf16;

use crate::backend::memory::BlobMemory;
use crate::backend::queue::CommandQueue;
use crate::backend::spec::{BackendError, BackendResult};
use crate::tensor::{dims, Blob, DataType, IntScaleResource, Mat, MatData, MatType};

/// Per-channel affine transform applied while converting: `value * scale + bias`.
///
/// Empty vectors mean identity (scale 1, bias 0) for every channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatConvertParam {
    pub scale: Vec<f32>,
    pub bias: Vec<f32>,
}

impl MatConvertParam {
    /// Explicit identity transform over `channels` channels.
    pub fn identity(channels: usize) -> Self {
        Self {
            scale: vec![1.0; channels],
            bias: vec![0.0; channels],
        }
    }

    fn scale_at(&self, channel: usize) -> f32 {
        self.scale.get(channel).copied().unwrap_or(1.0)
    }

    fn bias_at(&self, channel: usize) -> f32 {
        self.bias.get(channel).copied().unwrap_or(0.0)
    }

    fn apply(&self, channel: usize, value: f32) -> f32 {
        value * self.scale_at(channel) + self.bias_at(channel)
    }

    fn is_identity(&self) -> bool {
        self.scale.iter().all(|&scale| scale == 1.0) && self.bias.iter().all(|&bias| bias == 0.0)
    }

    fn validate(&self, channels: usize) -> BackendResult<()> {
        for (label, len) in [("scale", self.scale.len()), ("bias", self.bias.len())] {
            if len != 0 && len < channels {
                return Err(BackendError::unsupported_conversion(format!(
                    "{label} has {len} entries for {channels} channels"
                )));
            }
        }
        Ok(())
    }
}

/// Everything a copy needs, detached from the blob so it can move onto a queue.
struct CopyPlan {
    data_type: DataType,
    dims: Vec<usize>,
    offsets: Vec<usize>,
    int_scale: Option<Arc<IntScaleResource>>,
    param: MatConvertParam,
}

impl CopyPlan {
    fn channel(&self, index: usize) -> usize {
        dims::channel_of(&self.dims, index)
    }

    fn int_scale(&self) -> BackendResult<&IntScaleResource> {
        self.int_scale.as_deref().ok_or_else(|| {
            BackendError::unsupported_conversion(
                "int8 blob has no scale resource for float conversion",
            )
        })
    }

    fn check_capacity(&self, bytes: &[u8]) -> BackendResult<()> {
        let last = self.offsets.iter().copied().max().map_or(0, |max| max + 1);
        if last * self.data_type.size_in_bytes() > bytes.len() {
            return Err(BackendError::invalid_blob(format!(
                "storage of {} bytes is too small for dims {:?} as {}",
                bytes.len(),
                self.dims,
                self.data_type
            )));
        }
        Ok(())
    }

    fn encode(&self, mat: &MatData, bytes: &mut [u8]) -> BackendResult<()> {
        self.check_capacity(bytes)?;
        let dtype = self.data_type;
        match (dtype, mat) {
            (DataType::Float | DataType::Half | DataType::Bfp16, MatData::Float(values)) => {
                for (idx, &offset) in self.offsets.iter().enumerate() {
                    let value = self.param.apply(self.channel(idx), values[idx]);
                    dtype.write_f32(bytes, offset, value);
                }
            }
            (DataType::Float | DataType::Half | DataType::Bfp16, MatData::Bfp16(values)) => {
                for (idx, &offset) in self.offsets.iter().enumerate() {
                    let value = self.param.apply(self.channel(idx), values[idx].to_f32());
                    dtype.write_f32(bytes, offset, value);
                }
            }
            (DataType::Int8, MatData::Int8(values)) => {
                for (idx, &offset) in self.offsets.iter().enumerate() {
                    bytes[offset] = values[idx] as u8;
                }
            }
            (DataType::Int8, MatData::Float(values)) => {
                let int_scale = self.int_scale()?;
                for (idx, &offset) in self.offsets.iter().enumerate() {
                    let channel = self.channel(idx);
                    let value = self.param.apply(channel, values[idx]);
                    bytes[offset] = int_scale.quantize(channel, value) as u8;
                }
            }
            (dtype, mat) => {
                return Err(BackendError::unsupported_conversion(format!(
                    "{:?} mat into {dtype} blob",
                    mat.mat_type()
                )))
            }
        }
        Ok(())
    }

    fn decode(&self, mat_type: MatType, bytes: &[u8]) -> BackendResult<MatData> {
        self.check_capacity(bytes)?;
        let dtype = self.data_type;
        let data = match (dtype, mat_type) {
            (DataType::Float | DataType::Half | DataType::Bfp16, MatType::NchwFloat) => {
                MatData::Float(
                    self.offsets
                        .iter()
                        .enumerate()
                        .map(|(idx, &offset)| {
                            self.param
                                .apply(self.channel(idx), dtype.read_f32(bytes, offset))
                        })
                        .collect(),
                )
            }
            (DataType::Float | DataType::Half | DataType::Bfp16, MatType::Bfp16Test) => {
                MatData::Bfp16(
                    self.offsets
                        .iter()
                        .enumerate()
                        .map(|(idx, &offset)| {
                            let value = dtype.read_f32(bytes, offset);
                            bf16::from_f32(self.param.apply(self.channel(idx), value))
                        })
                        .collect(),
                )
            }
            (DataType::Int8, MatType::Int8Test) => MatData::Int8(
                self.offsets
                    .iter()
                    .map(|&offset| bytes[offset] as i8)
                    .collect(),
            ),
            (DataType::Int8, MatType::NchwFloat) => {
                let int_scale = self.int_scale()?;
                MatData::Float(
                    self.offsets
                        .iter()
                        .enumerate()
                        .map(|(idx, &offset)| {
                            let channel = self.channel(idx);
                            let value = int_scale.dequantize(channel, bytes[offset] as i8);
                            self.param.apply(channel, value)
                        })
                        .collect(),
                )
            }
            (dtype, mat_type) => {
                return Err(BackendError::unsupported_conversion(format!(
                    "{dtype} blob into {mat_type:?} mat"
                )))
            }
        };
        Ok(data)
    }
}

/// Converts between one blob and canonical [`Mat`]s.
pub struct BlobConverter<'a> {
    blob: &'a Blob,
}

impl<'a> BlobConverter<'a> {
    pub fn new(blob: &'a Blob) -> Self {
        Self { blob }
    }

    fn plan(
        &self,
        mat_type: MatType,
        mat_dims: &[usize],
        param: &MatConvertParam,
    ) -> BackendResult<CopyPlan> {
        let desc = self.blob.desc();
        if dims::count(mat_dims) != desc.element_count() {
            return Err(BackendError::invalid_blob(format!(
                "mat dims {mat_dims:?} do not match blob '{}' dims {:?}",
                desc.name, desc.dims
            )));
        }
        param.validate(desc.channels().unwrap_or(1))?;
        if desc.data_type == DataType::Int8 && mat_type == MatType::Int8Test && !param.is_identity()
        {
            return Err(BackendError::unsupported_conversion(
                "raw int8 copy cannot apply a scale or bias",
            ));
        }
        Ok(CopyPlan {
            data_type: desc.data_type,
            dims: desc.dims.clone(),
            offsets: desc.data_format.logical_offsets(&desc.dims),
            int_scale: self.blob.int_scale().cloned(),
            param: param.clone(),
        })
    }

    /// Writes `mat` into the blob's storage.
    pub fn convert_from_mat(
        &self,
        mat: &Mat,
        param: &MatConvertParam,
        queue: Option<&CommandQueue>,
    ) -> BackendResult<()> {
        let plan = self.plan(mat.mat_type(), mat.dims(), param)?;
        let memory = self.blob.memory()?.clone();
        match queue {
            Some(queue) => {
                let data = mat.data().clone();
                queue.enqueue(move || upload(&plan, &data, &memory))
            }
            None => upload(&plan, mat.data(), &memory),
        }
    }

    /// Reads the blob's storage into `mat`, keeping the mat's encoding.
    pub fn convert_to_mat(
        &self,
        mat: &mut Mat,
        param: &MatConvertParam,
        queue: Option<&CommandQueue>,
    ) -> BackendResult<()> {
        let plan = self.plan(mat.mat_type(), mat.dims(), param)?;
        let memory = self.blob.memory()?.clone();
        let mat_type = mat.mat_type();
        let data = match queue {
            Some(queue) => queue.submit_and_wait(move || download(&plan, mat_type, &memory))?,
            None => download(&plan, mat_type, &memory)?,
        };
        mat.replace_data(data);
        Ok(())
    }
}

fn upload(plan: &CopyPlan, data: &MatData, memory: &BlobMemory) -> BackendResult<()> {
    memory.write(|bytes| plan.encode(data, bytes))
}

fn download(plan: &CopyPlan, mat_type: MatType, memory: &BlobMemory) -> BackendResult<MatData> {
    memory.read(|bytes| plan.decode(mat_type, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryTracker;
    use crate::tensor::{BlobDesc, DataFormat};

    fn allocated(desc: BlobDesc) -> Blob {
        let memory = BlobMemory::zeroed(desc.byte_size(), MemoryTracker::new());
        let mut blob = Blob::new(desc);
        blob.attach(memory).unwrap();
        blob
    }

    fn ramp(count: usize) -> Vec<f32> {
        (0..count).map(|idx| idx as f32 * 0.25 - 3.0).collect()
    }

    #[test]
    fn float_round_trip_is_exact_in_both_layouts() {
        for format in [DataFormat::Nchw, DataFormat::Nc4hw4] {
            let desc = BlobDesc::new([1, 3, 2, 2], DataType::Float).with_format(format);
            let blob = allocated(desc);
            let input = Mat::from_f32([1, 3, 2, 2], ramp(12)).unwrap();
            let converter = BlobConverter::new(&blob);
            converter
                .convert_from_mat(&input, &MatConvertParam::default(), None)
                .unwrap();
            let mut output = Mat::new(MatType::NchwFloat, [1, 3, 2, 2]);
            converter
                .convert_to_mat(&mut output, &MatConvertParam::default(), None)
                .unwrap();
            assert_eq!(output, input, "layout {format:?}");
        }
    }

    #[test]
    fn round_trips_stay_within_declared_tolerance() {
        use crate::harness::{compare_mats, random_mat};

        let dims = [2, 5, 3, 3];
        for data_type in [DataType::Float, DataType::Half, DataType::Bfp16, DataType::Int8] {
            let mat_type = data_type.mat_type().unwrap();
            let tolerance = data_type.tolerance().unwrap();
            let desc = BlobDesc::new(dims, data_type).with_format(DataFormat::Nc4hw4);
            let memory = BlobMemory::zeroed(desc.byte_size(), MemoryTracker::new());
            let mut blob = Blob::new(desc);
            if data_type == DataType::Int8 {
                blob = blob.with_int_scale(Arc::new(IntScaleResource::random("rt", 5, 3)));
            }
            blob.attach(memory).unwrap();

            let input = random_mat(mat_type, &dims, 1, false);
            let converter = BlobConverter::new(&blob);
            converter
                .convert_from_mat(&input, &MatConvertParam::default(), None)
                .unwrap();
            let mut output = Mat::new(mat_type, dims);
            converter
                .convert_to_mat(&mut output, &MatConvertParam::default(), None)
                .unwrap();
            assert!(
                compare_mats(&input, &output, tolerance).is_ok(),
                "{data_type} round trip exceeds {tolerance}"
            );
        }
    }

    #[test]
    fn scale_and_bias_are_per_channel() {
        let blob = allocated(BlobDesc::new([1, 2, 1, 2], DataType::Float));
        let input = Mat::from_f32([1, 2, 1, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let param = MatConvertParam {
            scale: vec![2.0, 10.0],
            bias: vec![0.5, -1.0],
        };
        let converter = BlobConverter::new(&blob);
        converter.convert_from_mat(&input, &param, None).unwrap();
        let mut output = Mat::new(MatType::NchwFloat, [1, 2, 1, 2]);
        converter
            .convert_to_mat(&mut output, &MatConvertParam::default(), None)
            .unwrap();
        assert_eq!(output.to_f32_vec(), vec![2.5, 4.5, 29.0, 39.0]);
    }

    #[test]
    fn int8_raw_path_ignores_scale_resource() {
        let scale = Arc::new(IntScaleResource::new("s", vec![0.5; 4], vec![0; 4]).unwrap());
        let desc = BlobDesc::new([1, 4, 1, 1], DataType::Int8).with_format(DataFormat::Nc4hw4);
        let memory = BlobMemory::zeroed(desc.byte_size(), MemoryTracker::new());
        let mut blob = Blob::new(desc).with_int_scale(Arc::clone(&scale));
        blob.attach(memory).unwrap();
        let input = Mat::from_data([1, 4, 1, 1], MatData::Int8(vec![-8, -1, 0, 7])).unwrap();
        let converter = BlobConverter::new(&blob);
        converter
            .convert_from_mat(&input, &MatConvertParam::default(), None)
            .unwrap();

        let mut raw = Mat::new(MatType::Int8Test, [1, 4, 1, 1]);
        converter
            .convert_to_mat(&mut raw, &MatConvertParam::default(), None)
            .unwrap();
        assert_eq!(raw, input);

        let mut real = Mat::new(MatType::NchwFloat, [1, 4, 1, 1]);
        converter
            .convert_to_mat(&mut real, &MatConvertParam::default(), None)
            .unwrap();
        assert_eq!(real.to_f32_vec(), vec![-4.0, -0.5, 0.0, 3.5]);
    }

    #[test]
    fn int8_raw_path_rejects_affine_params() {
        let desc = BlobDesc::new([1, 2, 1, 1], DataType::Int8);
        let blob = allocated(desc);
        let converter = BlobConverter::new(&blob);
        let input = Mat::from_data([1, 2, 1, 1], MatData::Int8(vec![3, -3])).unwrap();
        let shifted = MatConvertParam {
            scale: vec![1.0, 1.0],
            bias: vec![0.0, 2.0],
        };
        let err = converter
            .convert_from_mat(&input, &shifted, None)
            .unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedConversion { .. }));

        let mut raw = Mat::new(MatType::Int8Test, [1, 2, 1, 1]);
        let scaled = MatConvertParam {
            scale: vec![2.0, 2.0],
            bias: Vec::new(),
        };
        assert!(converter.convert_to_mat(&mut raw, &scaled, None).is_err());

        converter
            .convert_from_mat(&input, &MatConvertParam::identity(2), None)
            .unwrap();
        converter
            .convert_to_mat(&mut raw, &MatConvertParam::identity(2), None)
            .unwrap();
        assert_eq!(raw, input);
    }

    #[test]
    fn queued_copies_are_ordered() {
        let queue = CommandQueue::new("convert").unwrap();
        let blob = allocated(BlobDesc::new([4], DataType::Half));
        let converter = BlobConverter::new(&blob);
        let first = Mat::from_f32([4], vec![1.0; 4]).unwrap();
        let second = Mat::from_f32([4], vec![0.5, 1.5, 2.5, 3.5]).unwrap();
        converter
            .convert_from_mat(&first, &MatConvertParam::default(), Some(&queue))
            .unwrap();
        converter
            .convert_from_mat(&second, &MatConvertParam::default(), Some(&queue))
            .unwrap();
        let mut output = Mat::new(MatType::NchwFloat, [4]);
        converter
            .convert_to_mat(&mut output, &MatConvertParam::default(), Some(&queue))
            .unwrap();
        assert_eq!(output, second);
    }

    #[test]
    fn rejects_unsupported_pairs() {
        let blob = allocated(BlobDesc::new([2], DataType::Int32));
        let input = Mat::from_f32([2], vec![1.0, 2.0]).unwrap();
        let err = BlobConverter::new(&blob)
            .convert_from_mat(&input, &MatConvertParam::default(), None)
            .unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedConversion { .. }));

        let blob = allocated(BlobDesc::new([2], DataType::Float));
        let mismatched = Mat::from_f32([3], vec![0.0; 3]).unwrap();
        assert!(BlobConverter::new(&blob)
            .convert_from_mat(&mismatched, &MatConvertParam::default(), None)
            .is_err());
    }
}
