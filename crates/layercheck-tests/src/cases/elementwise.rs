//! `add` with a second input or a constant operand.

use layercheck::harness::random_mat;
use layercheck::{DataType, LayerResource, LayerType, MatType, ParityFixture};

use super::{assert_close, expect_initialization_failure, expect_parity, first_output, nchw, run_layer};

/// `[1,3,8,8]` float input plus one constant per channel.
pub fn add_constant_bias_float(fixture: &ParityFixture) {
    let dims = [1, 3, 8, 8];
    let bias = vec![0.5, -0.25, 1.0];
    let report = expect_parity(
        fixture,
        LayerType::Add,
        Some(LayerResource::Elementwise {
            values: bias.clone(),
        }),
        &[nchw(dims, DataType::Float)],
        false,
    );
    let Some(output) = first_output(&report) else {
        return;
    };
    let input = random_mat(MatType::NchwFloat, &dims, 0, false).to_f32_vec();
    let expected: Vec<f32> = input
        .iter()
        .enumerate()
        .map(|(index, value)| value + bias[index / 64])
        .collect();
    assert_close(&output.to_f32_vec(), &expected, 1e-6);
}

pub fn add_scalar_constant_half(fixture: &ParityFixture) {
    let dims = [2, 5, 3, 3];
    let report = expect_parity(
        fixture,
        LayerType::Add,
        Some(LayerResource::Elementwise { values: vec![0.75] }),
        &[nchw(dims, DataType::Half)],
        false,
    );
    let Some(output) = first_output(&report) else {
        return;
    };
    let expected: Vec<f32> = random_mat(MatType::NchwFloat, &dims, 0, false)
        .to_f32_vec()
        .into_iter()
        .map(|value| value + 0.75)
        .collect();
    assert_close(&output.to_f32_vec(), &expected, 0.01);
}

pub fn add_full_tensor_constant_bfp16(fixture: &ParityFixture) {
    let values: Vec<f32> = (0..32).map(|i| i as f32 * 0.0625 - 1.0).collect();
    expect_parity(
        fixture,
        LayerType::Add,
        Some(LayerResource::Elementwise { values }),
        &[nchw([1, 2, 4, 4], DataType::Bfp16)],
        false,
    );
}

pub fn add_two_inputs_float(fixture: &ParityFixture) {
    let dims = [1, 6, 5, 5];
    let report = expect_parity(
        fixture,
        LayerType::Add,
        None,
        &[nchw(dims, DataType::Float), nchw(dims, DataType::Float)],
        false,
    );
    let Some(output) = first_output(&report) else {
        return;
    };
    let lhs = random_mat(MatType::NchwFloat, &dims, 0, false).to_f32_vec();
    let rhs = random_mat(MatType::NchwFloat, &dims, 1, false).to_f32_vec();
    let expected: Vec<f32> = lhs.iter().zip(&rhs).map(|(a, b)| a + b).collect();
    assert_close(&output.to_f32_vec(), &expected, 1e-6);
}

/// Each operand carries its own scale resource; results must match bit for bit.
pub fn add_two_inputs_int8(fixture: &ParityFixture) {
    let dims = [1, 4, 4, 4];
    let report = expect_parity(
        fixture,
        LayerType::Add,
        None,
        &[nchw(dims, DataType::Int8), nchw(dims, DataType::Int8)],
        false,
    );
    if let Some(output) = first_output(&report) {
        assert_eq!(output.mat_type(), MatType::Int8Test);
        assert_eq!(output.dims(), &dims);
    }
}

pub fn add_rejects_mismatched_inputs(fixture: &ParityFixture) {
    expect_initialization_failure(run_layer(
        fixture,
        LayerType::Add,
        None,
        &[
            nchw([1, 3, 4, 4], DataType::Float),
            nchw([1, 3, 2, 2], DataType::Float),
        ],
        false,
    ));
}
