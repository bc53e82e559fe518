//! Whole-model runs built from the JSON descriptions under `fixtures/`.

use layercheck::harness::random_mat;
use layercheck::model::ModelError;
use layercheck::{MatType, ModelTest, ParityError, ParityFixture};

use crate::load_fixture;

fn fixture_text(name: &str) -> String {
    load_fixture(name).unwrap_or_else(|err| panic!("{err:#}"))
}

/// Inputs `a` and `b` are seeded 0 and 1 because inputs are taken in name order.
pub fn relu_add_matches(fixture: &ParityFixture) {
    let report = ModelTest::new(fixture)
        .run_with_model(&fixture_text("relu_add.json"))
        .unwrap_or_else(|err| panic!("relu_add diverged: {err}"));
    if fixture.config().benchmark_mode {
        assert!(report.outputs.is_empty());
        return;
    }
    let output = report.output("sum").expect("model output 'sum'");
    assert_eq!(output.dims(), &[1, 3, 4, 4]);

    let a = random_mat(MatType::NchwFloat, &[1, 3, 4, 4], 0, false).to_f32_vec();
    let b = random_mat(MatType::NchwFloat, &[1, 3, 4, 4], 1, false).to_f32_vec();
    for (index, value) in output.to_f32_vec().into_iter().enumerate() {
        let expected = a[index].max(0.0) + b[index];
        assert!(
            (value - expected).abs() <= 1e-6,
            "element {index}: got {value}, expected {expected}"
        );
    }
}

pub fn log_scale_matches(fixture: &ParityFixture) {
    let report = ModelTest::new(fixture)
        .ensure_input_positive(true)
        .run_with_model(&fixture_text("log_scale.json"))
        .unwrap_or_else(|err| panic!("log_scale diverged: {err}"));
    if fixture.config().benchmark_mode {
        return;
    }
    assert_eq!(report.outputs.len(), 1);
    let output = report.output("scaled").expect("model output 'scaled'");
    assert_eq!(output.element_count(), 18);
}

/// Every int8 blob of both instances carries the same scales, so the raw
/// outputs must agree exactly.
pub fn int8_relu_add_matches(fixture: &ParityFixture) {
    let report = ModelTest::new(fixture)
        .run_with_model(&fixture_text("int8_relu_add.json"))
        .unwrap_or_else(|err| panic!("int8_relu_add diverged: {err}"));
    if fixture.config().benchmark_mode {
        return;
    }
    let output = report.output("sum").expect("model output 'sum'");
    assert_eq!(output.mat_type(), MatType::Int8Test);
    assert_eq!(output.dims(), &[1, 4, 2, 2]);
}

pub fn rejects_dangling_blob(fixture: &ParityFixture) {
    let mut description: serde_json::Value =
        serde_json::from_str(&fixture_text("relu_add.json")).expect("valid fixture json");
    description["layers"][1]["inputs"][1] = serde_json::Value::from("c");
    let description = description.to_string();
    let err = ModelTest::new(fixture)
        .run_with_model(&description)
        .unwrap_err();
    assert!(
        matches!(err, ParityError::Model(ModelError::Invalid(_))),
        "unexpected error: {err}"
    );
}
