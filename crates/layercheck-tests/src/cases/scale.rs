use layercheck::harness::random_mat;
use layercheck::{DataType, LayerResource, LayerType, MatType, ParityFixture};

use super::{assert_close, expect_initialization_failure, expect_parity, first_output, nchw, run_layer};

pub fn scale_with_bias_float(fixture: &ParityFixture) {
    let dims = [1, 3, 5, 5];
    let scale = vec![0.5, 2.0, -1.0];
    let bias = vec![0.1, 0.0, -0.3];
    let report = expect_parity(
        fixture,
        LayerType::Scale,
        Some(LayerResource::Scale {
            scale: scale.clone(),
            bias: Some(bias.clone()),
        }),
        &[nchw(dims, DataType::Float)],
        false,
    );
    let Some(output) = first_output(&report) else {
        return;
    };
    let expected: Vec<f32> = random_mat(MatType::NchwFloat, &dims, 0, false)
        .to_f32_vec()
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let channel = index / 25;
            value * scale[channel] + bias[channel]
        })
        .collect();
    assert_close(&output.to_f32_vec(), &expected, 1e-5);
}

pub fn scale_without_bias_half(fixture: &ParityFixture) {
    expect_parity(
        fixture,
        LayerType::Scale,
        Some(LayerResource::Scale {
            scale: vec![1.5, -0.5, 0.25, 2.0],
            bias: None,
        }),
        &[nchw([1, 4, 3, 3], DataType::Half)],
        false,
    );
}

pub fn scale_bfp16(fixture: &ParityFixture) {
    expect_parity(
        fixture,
        LayerType::Scale,
        Some(LayerResource::Scale {
            scale: vec![0.75, 1.25],
            bias: Some(vec![0.5, -0.5]),
        }),
        &[nchw([1, 2, 4, 4], DataType::Bfp16)],
        false,
    );
}

pub fn scale_rejects_wrong_length(fixture: &ParityFixture) {
    expect_initialization_failure(run_layer(
        fixture,
        LayerType::Scale,
        Some(LayerResource::Scale {
            scale: vec![1.0, 2.0],
            bias: None,
        }),
        &[nchw([1, 3, 2, 2], DataType::Float)],
        false,
    ));
}
