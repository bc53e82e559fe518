use layercheck::harness::random_mat;
use layercheck::{DataType, LayerType, MatType, ParityError, ParityFixture, Side};

use super::{assert_close, expect_parity, first_output, nchw, run_layer};

pub fn relu_float(fixture: &ParityFixture) {
    let dims = [1, 5, 7, 7];
    let report = expect_parity(fixture, LayerType::Relu, None, &[nchw(dims, DataType::Float)], false);
    let Some(output) = first_output(&report) else {
        return;
    };
    let expected: Vec<f32> = random_mat(MatType::NchwFloat, &dims, 0, false)
        .to_f32_vec()
        .into_iter()
        .map(|value| value.max(0.0))
        .collect();
    assert_close(&output.to_f32_vec(), &expected, 0.0);
}

/// `[1,4,4,4]` int8 with a four-channel scale vector, compared exactly.
pub fn relu_int8_exact(fixture: &ParityFixture) {
    let dims = [1, 4, 4, 4];
    let report = expect_parity(fixture, LayerType::Relu, None, &[nchw(dims, DataType::Int8)], false);
    let Some(output) = first_output(&report) else {
        return;
    };
    assert_eq!(output.mat_type(), MatType::Int8Test);
    // Zero points are zero, so a rectified value never quantizes below zero.
    assert!(output.to_f32_vec().iter().all(|&value| value >= 0.0));
}

/// Rank-2 blobs take their channel count from dimension 1.
pub fn relu_rank2_int8(fixture: &ParityFixture) {
    expect_parity(fixture, LayerType::Relu, None, &[nchw([4, 6], DataType::Int8)], false);
}

pub fn sigmoid_half(fixture: &ParityFixture) {
    let report = expect_parity(
        fixture,
        LayerType::Sigmoid,
        None,
        &[nchw([1, 8, 4, 4], DataType::Half)],
        false,
    );
    if let Some(output) = first_output(&report) {
        assert!(output
            .to_f32_vec()
            .iter()
            .all(|&value| (0.0..=1.0).contains(&value)));
    }
}

pub fn sigmoid_bfp16(fixture: &ParityFixture) {
    expect_parity(
        fixture,
        LayerType::Sigmoid,
        None,
        &[nchw([2, 3, 5, 5], DataType::Bfp16)],
        false,
    );
}

pub fn log_positive_inputs(fixture: &ParityFixture) {
    let dims = [1, 3, 6, 6];
    let report = expect_parity(fixture, LayerType::Log, None, &[nchw(dims, DataType::Float)], true);
    let Some(output) = first_output(&report) else {
        return;
    };
    let expected: Vec<f32> = random_mat(MatType::NchwFloat, &dims, 0, true)
        .to_f32_vec()
        .into_iter()
        .map(f32::ln)
        .collect();
    assert_close(&output.to_f32_vec(), &expected, 1e-6);
}

/// Quantized kernels exist for `relu` and `add` only.
pub fn int8_sigmoid_is_rejected(fixture: &ParityFixture) {
    let err = run_layer(
        fixture,
        LayerType::Sigmoid,
        None,
        &[nchw([1, 4, 2, 2], DataType::Int8)],
        false,
    )
    .unwrap_err();
    assert!(
        matches!(
            err,
            ParityError::Initialization {
                side: Side::Reference,
                ..
            }
        ),
        "unexpected error: {err}"
    );
}
