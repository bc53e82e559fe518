//! Reusable conformance cases for layercheck devices.
//!
//! Each case takes the suite's [`ParityFixture`] and panics on failure.
//! Device crates stamp the whole catalogue out as `#[test]`s with
//! [`define_layer_tests!`].

pub mod cases;
pub mod faulty;

use std::path::PathBuf;
use std::sync::Once;

use anyhow::Context as _;
use layercheck::{DeviceType, HarnessConfig, ParityFixture};
use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber once per process; `RUST_LOG` overrides the `warn` default.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Builds the fixture for a suite checking `device` against the naive reference.
///
/// Setup failures are fatal to the suite, so this panics instead of returning.
pub fn suite_fixture(device: &str, register: fn()) -> ParityFixture {
    init_test_logging();
    layercheck_backend_naive::register_naive_device();
    register();
    let config = HarnessConfig::from_env()
        .unwrap_or_else(|err| panic!("invalid harness configuration: {err}"))
        .with_device(DeviceType::from(device));
    ParityFixture::set_up(config).unwrap_or_else(|err| panic!("{err}"))
}

/// Reads a model description shipped in this crate's `fixtures/` directory.
pub fn load_fixture(name: &str) -> anyhow::Result<String> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
}

#[macro_export]
macro_rules! define_layer_tests {
    ($module:ident, $device:expr, $register:path) => {
        #[cfg(test)]
        mod $module {
            use std::sync::OnceLock;

            use layercheck::ParityFixture;
            use $crate::cases::{activation, elementwise, lifecycle, model, scale};

            fn fixture() -> &'static ParityFixture {
                static FIXTURE: OnceLock<ParityFixture> = OnceLock::new();
                FIXTURE.get_or_init(|| $crate::suite_fixture($device, $register))
            }

            macro_rules! layer_test {
                ($name:ident, $func:path) => {
                    #[test]
                    fn $name() {
                        $func(fixture());
                    }
                };
            }

            layer_test!(add_constant_bias_float, elementwise::add_constant_bias_float);
            layer_test!(add_scalar_constant_half, elementwise::add_scalar_constant_half);
            layer_test!(add_full_tensor_constant_bfp16, elementwise::add_full_tensor_constant_bfp16);
            layer_test!(add_two_inputs_float, elementwise::add_two_inputs_float);
            layer_test!(add_two_inputs_int8, elementwise::add_two_inputs_int8);
            layer_test!(add_rejects_mismatched_inputs, elementwise::add_rejects_mismatched_inputs);
            layer_test!(relu_float, activation::relu_float);
            layer_test!(relu_int8_exact, activation::relu_int8_exact);
            layer_test!(relu_rank2_int8, activation::relu_rank2_int8);
            layer_test!(sigmoid_half, activation::sigmoid_half);
            layer_test!(sigmoid_bfp16, activation::sigmoid_bfp16);
            layer_test!(log_positive_inputs, activation::log_positive_inputs);
            layer_test!(int8_sigmoid_is_rejected, activation::int8_sigmoid_is_rejected);
            layer_test!(scale_with_bias_float, scale::scale_with_bias_float);
            layer_test!(scale_without_bias_half, scale::scale_without_bias_half);
            layer_test!(scale_bfp16, scale::scale_bfp16);
            layer_test!(scale_rejects_wrong_length, scale::scale_rejects_wrong_length);
            layer_test!(repeated_runs_release_memory, lifecycle::repeated_runs_release_memory);
            layer_test!(int_scale_released_once, lifecycle::int_scale_released_once);
            layer_test!(stages_advance_in_order, lifecycle::stages_advance_in_order);
            layer_test!(random_inputs_match_seed, lifecycle::random_inputs_match_seed);
            layer_test!(timing_covers_every_iteration, lifecycle::timing_covers_every_iteration);
            layer_test!(int32_outputs_have_no_rule, lifecycle::int32_outputs_have_no_rule);
            layer_test!(model_relu_add_matches, model::relu_add_matches);
            layer_test!(model_log_scale_matches, model::log_scale_matches);
            layer_test!(model_int8_relu_add_matches, model::int8_relu_add_matches);
            layer_test!(model_rejects_dangling_blob, model::rejects_dangling_blob);
        }
    };
}
