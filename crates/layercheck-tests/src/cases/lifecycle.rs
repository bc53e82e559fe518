//! Stage ordering, resource release and the harness's own bookkeeping.

use std::sync::{Arc, Weak};

use layercheck::backend::CommandQueue;
use layercheck::convert::{BlobConverter, MatConvertParam};
use layercheck::harness::{compare_blobs, random_mat, Stage};
use layercheck::{
    Blob, BlobDesc, DataType, IntScaleResource, LayerParam, LayerResource, LayerTest, LayerType,
    Mat, MatType, ParityError, ParityFixture, RunReport,
};

use super::{expect_parity, nchw};

/// Runs the constant-bias add while holding the session, so the trackers only
/// see this run's buffers.
fn bias_scenario(fixture: &ParityFixture) -> RunReport {
    let reference = fixture.reference_device().memory_tracker();
    let candidate = fixture.candidate_device().memory_tracker();
    let mut test = LayerTest::new(fixture);
    let outstanding = (reference.outstanding(), candidate.outstanding());
    let allocated = candidate.total_allocations();

    let report = test
        .run(
            LayerType::Add,
            &LayerParam::named("bias"),
            Some(LayerResource::Elementwise {
                values: vec![0.5, -0.25, 1.0],
            }),
            &[nchw([1, 3, 8, 8], DataType::Float)],
            &[BlobDesc::new(Vec::new(), DataType::Float)],
        )
        .unwrap_or_else(|err| panic!("bias add diverged: {err}"));

    assert_eq!(test.stage(), Stage::Deinitialized);
    assert_eq!(
        (reference.outstanding(), candidate.outstanding()),
        outstanding
    );
    // One input and one output.
    assert_eq!(candidate.total_allocations(), allocated + 2);
    report
}

/// Running the same layer twice gives the same outputs and leaks no buffers.
pub fn repeated_runs_release_memory(fixture: &ParityFixture) {
    let first = bias_scenario(fixture);
    let second = bias_scenario(fixture);
    assert_eq!(first.compared, second.compared);
    assert_eq!(first.candidate_outputs, second.candidate_outputs);
}

/// The shared scale resource outlives every blob of its pair and no longer.
pub fn int_scale_released_once(fixture: &ParityFixture) {
    let mut test = LayerTest::new(fixture);
    test.init(
        LayerType::Relu,
        &LayerParam::named("relu"),
        None,
        &[nchw([1, 4, 4, 4], DataType::Int8)],
        &[BlobDesc::new(Vec::new(), DataType::Int8)],
    )
    .unwrap();

    let watches: Vec<Weak<IntScaleResource>> = test
        .inputs()
        .iter()
        .chain(test.outputs())
        .map(|pair| pair.int_scale_watch().expect("int8 pairs carry a scale"))
        .collect();
    for pair in test.inputs().iter().chain(test.outputs()) {
        let shared = pair.int_scale().unwrap();
        assert_eq!(shared.channels(), 4);
        let candidate = pair.candidate().int_scale().unwrap();
        let reference = pair.reference().int_scale().unwrap();
        assert!(Arc::ptr_eq(shared, candidate));
        assert!(Arc::ptr_eq(shared, reference));
    }

    test.reshape().unwrap();
    test.forward().unwrap();
    test.compare().unwrap();
    assert!(watches.iter().all(|watch| watch.upgrade().is_some()));

    test.deinit().unwrap();
    assert!(watches.iter().all(|watch| watch.upgrade().is_none()));
    assert!(test.inputs().is_empty());
    assert!(test.outputs().is_empty());
}

pub fn stages_advance_in_order(fixture: &ParityFixture) {
    let mut test = LayerTest::new(fixture);
    assert_eq!(test.stage(), Stage::Uninitialized);
    match test.forward() {
        Err(ParityError::InvalidStage { operation, stage }) => {
            assert_eq!(operation, "forward");
            assert_eq!(stage, Stage::Uninitialized);
        }
        other => panic!("forward before init should fail, got {other:?}"),
    }

    let inputs = [nchw([1, 2, 3, 3], DataType::Float)];
    let outputs = [BlobDesc::new(Vec::new(), DataType::Float)];
    let param = LayerParam::named("sigmoid");
    test.init(LayerType::Sigmoid, &param, None, &inputs, &outputs)
        .unwrap();
    assert_eq!(test.stage(), Stage::Initialized);
    assert!(matches!(
        test.init(LayerType::Sigmoid, &param, None, &inputs, &outputs),
        Err(ParityError::InvalidStage { .. })
    ));
    assert!(matches!(
        test.compare(),
        Err(ParityError::InvalidStage { .. })
    ));

    test.reshape().unwrap();
    assert_eq!(test.stage(), Stage::Reshaped);
    assert_eq!(test.outputs()[0].candidate().desc().dims, vec![1, 2, 3, 3]);
    test.forward().unwrap();
    assert_eq!(test.stage(), Stage::Forwarded);
    test.compare().unwrap();
    assert_eq!(test.stage(), Stage::Compared);
    test.deinit().unwrap();
    assert_eq!(test.stage(), Stage::Deinitialized);
    test.deinit().unwrap();
}

/// Both halves of input `i` hold the values generated for magic number `i`.
pub fn random_inputs_match_seed(fixture: &ParityFixture) {
    let dims = [1, 5, 3, 3];
    let mut test = LayerTest::new(fixture);
    test.init(
        LayerType::Add,
        &LayerParam::named("add"),
        None,
        &[nchw(dims, DataType::Float), nchw(dims, DataType::Float)],
        &[BlobDesc::new(Vec::new(), DataType::Float)],
    )
    .unwrap();

    let reference_queue = fixture.reference_context().command_queue();
    let candidate_queue = fixture.candidate_context().command_queue();
    for (magic, pair) in test.inputs().iter().enumerate() {
        let expected = random_mat(MatType::NchwFloat, &dims, magic, false);
        let reference = read_back(pair.reference(), reference_queue.as_ref());
        let candidate = read_back(pair.candidate(), candidate_queue.as_ref());
        assert_eq!(reference, expected, "reference input {magic}");
        assert_eq!(candidate, expected, "candidate input {magic}");
    }
    let first = test.inputs()[0].candidate().desc().dims.clone();
    assert_eq!(first, dims);
    assert_ne!(
        random_mat(MatType::NchwFloat, &dims, 0, false),
        random_mat(MatType::NchwFloat, &dims, 1, false)
    );
    test.deinit().unwrap();
}

fn read_back(blob: &Blob, queue: Option<&CommandQueue>) -> Mat {
    let mut mat = Mat::new(MatType::NchwFloat, blob.desc().dims.clone());
    BlobConverter::new(blob)
        .convert_to_mat(&mut mat, &MatConvertParam::default(), queue)
        .unwrap();
    mat
}

pub fn timing_covers_every_iteration(fixture: &ParityFixture) {
    let report = expect_parity(
        fixture,
        LayerType::Relu,
        None,
        &[nchw([1, 4, 8, 8], DataType::Float)],
        false,
    );
    let stats = report.stats;
    assert_eq!(stats.iterations, fixture.config().effective_iterations());
    assert!(stats.min_ms <= stats.avg_ms() + 1e-9);
    assert!(stats.avg_ms() <= stats.max_ms + 1e-9);
    assert!(report.throughput.gflops.is_nan() || report.throughput.gflops >= 0.0);
}

/// Index tensors have no canonical encoding, so they can never be compared.
pub fn int32_outputs_have_no_rule(fixture: &ParityFixture) {
    let _session = fixture.session();
    let desc = BlobDesc::new([1, 2, 2, 2], DataType::Int32).with_name("indices");
    let mut reference =
        Blob::new(desc.clone().on_device(fixture.reference_device().device_type()));
    let mut candidate = Blob::new(desc.on_device(fixture.candidate_device().device_type()));
    reference
        .allocate(fixture.reference_device().as_ref())
        .unwrap();
    candidate
        .allocate(fixture.candidate_device().as_ref())
        .unwrap();

    let err = compare_blobs(0, &reference, &candidate, None, None).unwrap_err();
    assert!(matches!(err, ParityError::UnknownFormat(DataType::Int32)));
    assert!(err.is_mismatch());
    assert_eq!(err.tensor_index(), None);
    reference.free();
    candidate.free();
}
