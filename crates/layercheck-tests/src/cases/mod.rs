//! Conformance cases, grouped by the layers they exercise.
//!
//! Every case is a plain function over the suite fixture so that each device
//! crate can run the same catalogue.

pub mod activation;
pub mod elementwise;
pub mod lifecycle;
pub mod model;
pub mod scale;

use layercheck::{
    BlobDesc, DataType, LayerParam, LayerResource, LayerTest, LayerType, Mat, ParityError,
    ParityFixture, RunReport,
};

pub(crate) fn run_layer(
    fixture: &ParityFixture,
    layer_type: LayerType,
    resource: Option<LayerResource>,
    inputs: &[BlobDesc],
    ensure_input_positive: bool,
) -> Result<RunReport, ParityError> {
    let output = BlobDesc::new(Vec::new(), inputs[0].data_type);
    let mut test = LayerTest::new(fixture).ensure_input_positive(ensure_input_positive);
    test.run(
        layer_type,
        &LayerParam::named(layer_type.as_str()),
        resource,
        inputs,
        &[output],
    )
}

/// Runs a layer that must agree on both devices.
pub(crate) fn expect_parity(
    fixture: &ParityFixture,
    layer_type: LayerType,
    resource: Option<LayerResource>,
    inputs: &[BlobDesc],
    ensure_input_positive: bool,
) -> RunReport {
    let report = run_layer(fixture, layer_type, resource, inputs, ensure_input_positive)
        .unwrap_or_else(|err| panic!("{layer_type} diverged: {err}"));
    assert_eq!(report.layer_type, layer_type);
    assert_eq!(report.compared, !fixture.config().benchmark_mode);
    report
}

/// The candidate's first output, or `None` when benchmark mode skipped the comparison.
pub(crate) fn first_output(report: &RunReport) -> Option<&Mat> {
    report.candidate_outputs.first()
}

pub(crate) fn nchw(dims: impl Into<Vec<usize>>, data_type: DataType) -> BlobDesc {
    BlobDesc::new(dims, data_type)
}

pub(crate) fn assert_close(actual: &[f32], expected: &[f32], epsilon: f32) {
    assert_eq!(actual.len(), expected.len());
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= epsilon,
            "element {index}: got {a}, expected {e}"
        );
    }
}

pub(crate) fn expect_initialization_failure(result: Result<RunReport, ParityError>) {
    match result {
        Err(ParityError::Initialization { .. }) => {}
        Err(other) => panic!("expected an initialization failure, got {other}"),
        Ok(_) => panic!("expected an initialization failure, but the run passed"),
    }
}
