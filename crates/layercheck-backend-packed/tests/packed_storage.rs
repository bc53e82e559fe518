use std::sync::{Arc, OnceLock};

use half::f16;
use layercheck::backend::registry::get_device;
use layercheck::convert::{BlobConverter, MatConvertParam};
use layercheck::{
    Blob, BlobDesc, DataFormat, DataType, DeviceType, HarnessConfig, LayerParam, LayerResource,
    LayerTest, LayerType, Mat, ParityFixture,
};
use layercheck_backend_packed::{register_packed_device, PackedContext, ALIGNMENT};

fn threaded_fixture() -> &'static ParityFixture {
    static FIXTURE: OnceLock<ParityFixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        layercheck_tests::init_test_logging();
        layercheck_backend_naive::register_naive_device();
        register_packed_device();
        let config = HarnessConfig::default()
            .with_device(DeviceType::Packed)
            .with_threads(3)
            .with_iterations(2);
        ParityFixture::set_up(config).unwrap()
    })
}

#[test]
fn threaded_kernels_match_the_reference() {
    let fixture = threaded_fixture();
    let dims = [2, 5, 7, 7];
    let cases = [
        (LayerType::Relu, None, DataType::Float),
        (LayerType::Sigmoid, None, DataType::Half),
        (
            LayerType::Scale,
            Some(LayerResource::Scale {
                scale: vec![0.5, 1.5, -1.0, 2.0, 0.25],
                bias: Some(vec![0.0, 0.1, 0.2, 0.3, 0.4]),
            }),
            DataType::Bfp16,
        ),
        (LayerType::Relu, None, DataType::Int8),
    ];
    for (layer_type, resource, data_type) in cases {
        let mut test = LayerTest::new(fixture);
        let report = test
            .run(
                layer_type,
                &LayerParam::named(layer_type.as_str()),
                resource,
                &[BlobDesc::new(dims, data_type)],
                &[BlobDesc::new(Vec::new(), data_type)],
            )
            .unwrap_or_else(|err| panic!("{layer_type} {data_type}: {err}"));
        assert!(report.compared);
        assert_eq!(report.stats.iterations, 2);
    }
    assert_eq!(fixture.candidate_context().num_threads(), 3);
}

#[test]
fn candidate_context_owns_a_queue() {
    let fixture = threaded_fixture();
    let context = fixture.candidate_context();
    let queue = context.command_queue().unwrap();
    assert!(queue.ptr_eq(&context.command_queue().unwrap()));
    assert!(fixture.reference_context().command_queue().is_none());
    let packed = context.as_any().downcast_ref::<PackedContext>().unwrap();
    assert!(packed.libraries().is_empty());
}

#[test]
fn half_blobs_are_stored_channel_blocked() {
    register_packed_device();
    let device = get_device(&DeviceType::Packed).unwrap();
    let context = device.create_context(0).unwrap();
    let dims = [1, 5, 2, 2];
    let desc = BlobDesc::new(dims, DataType::Half)
        .with_format(DataFormat::Nc4hw4)
        .on_device(DeviceType::Packed);
    assert_eq!(device.memory_size(&desc).unwrap(), ALIGNMENT);

    let mut blob = Blob::new(desc);
    blob.allocate(device.as_ref()).unwrap();
    let values: Vec<f32> = (0..20).map(|i| i as f32 * 0.5).collect();
    let mat = Mat::from_f32(dims, values).unwrap();
    let queue = context.command_queue();
    BlobConverter::new(&blob)
        .convert_from_mat(&mat, &MatConvertParam::default(), queue.as_ref())
        .unwrap();
    context.synchronize().unwrap();

    let stored = |slot: usize, bytes: &[u8]| {
        f16::from_bits(u16::from_le_bytes([bytes[slot * 2], bytes[slot * 2 + 1]]))
    };
    blob.memory().unwrap().read(|bytes| {
        // Channel 4, position 0 opens the second channel block.
        assert_eq!(stored(16, bytes), f16::from_f32(8.0));
        // Channel 0, position 1 sits one pixel after the first block's lanes.
        assert_eq!(stored(4, bytes), f16::from_f32(0.5));
        // Channels 5 to 7 of the second block are padding.
        assert_eq!(stored(17, bytes), f16::ZERO);
        assert_eq!(stored(31, bytes), f16::ZERO);
    });
    let tracker = Arc::clone(device.memory_tracker());
    assert_eq!(tracker.outstanding(), 1);
    blob.free();
    assert_eq!(tracker.outstanding(), 0);
}
