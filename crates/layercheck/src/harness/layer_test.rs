use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::compare::compare_blobs;
use super::fixture::{FixtureSession, ParityFixture};
use super::pair::{BlobPair, TensorPairFactory};
use super::random::fill_random_blobs;
use super::timing::{benchmark_line, BenchStats, Throughput};
use crate::backend::spec::BackendError;
use crate::error::{ParityError, Side};
use crate::layer::{Layer, LayerParam, LayerResource, LayerType};
use crate::tensor::{Blob, BlobDesc, Mat};

/// Position of a [`LayerTest`] in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Uninitialized,
    Initialized,
    Reshaped,
    Forwarded,
    Compared,
    Deinitialized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Uninitialized => "uninitialized",
            Stage::Initialized => "initialized",
            Stage::Reshaped => "reshaped",
            Stage::Forwarded => "forwarded",
            Stage::Compared => "compared",
            Stage::Deinitialized => "deinitialized",
        };
        f.write_str(name)
    }
}

/// Outcome of one successful [`LayerTest::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub layer_type: LayerType,
    pub stats: BenchStats,
    pub throughput: Throughput,
    /// `false` when benchmark mode skipped the comparison.
    pub compared: bool,
    /// Candidate outputs in their canonical encoding, in output order.
    pub candidate_outputs: Vec<Mat>,
}

/// Runs one layer on the reference and candidate devices and compares the outputs.
///
/// Holds the fixture's session for its whole lifetime, so tests sharing a
/// fixture run one at a time. Dropping a test that was not deinitialized
/// releases its tensors.
pub struct LayerTest<'f> {
    fixture: &'f ParityFixture,
    _session: FixtureSession<'f>,
    ensure_input_positive: bool,
    stage: Stage,
    layer_type: Option<LayerType>,
    reference_layer: Option<Layer>,
    candidate_layer: Option<Layer>,
    inputs: Vec<BlobPair>,
    outputs: Vec<BlobPair>,
    stats: BenchStats,
    throughput: Option<Throughput>,
    candidate_outputs: Vec<Mat>,
}

impl<'f> LayerTest<'f> {
    pub fn new(fixture: &'f ParityFixture) -> Self {
        Self {
            fixture,
            _session: fixture.session(),
            ensure_input_positive: false,
            stage: Stage::Uninitialized,
            layer_type: None,
            reference_layer: None,
            candidate_layer: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            stats: BenchStats::default(),
            throughput: None,
            candidate_outputs: Vec::new(),
        }
    }

    /// Restricts random inputs to positive values, for layers such as `log`.
    pub fn ensure_input_positive(mut self, enabled: bool) -> Self {
        self.ensure_input_positive = enabled;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn inputs(&self) -> &[BlobPair] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[BlobPair] {
        &self.outputs
    }

    pub fn stats(&self) -> &BenchStats {
        &self.stats
    }

    /// Drives every stage and always deinitializes.
    ///
    /// A failure in the run takes precedence over a failure in teardown.
    pub fn run(
        &mut self,
        layer_type: LayerType,
        param: &LayerParam,
        resource: Option<LayerResource>,
        inputs: &[BlobDesc],
        outputs: &[BlobDesc],
    ) -> Result<RunReport, ParityError> {
        let result = self.run_stages(layer_type, param, resource, inputs, outputs);
        let teardown = self.deinit();
        let report = result?;
        teardown?;
        Ok(report)
    }

    fn run_stages(
        &mut self,
        layer_type: LayerType,
        param: &LayerParam,
        resource: Option<LayerResource>,
        inputs: &[BlobDesc],
        outputs: &[BlobDesc],
    ) -> Result<RunReport, ParityError> {
        self.init(layer_type, param, resource, inputs, outputs)?;
        self.reshape()?;
        self.forward()?;
        let compared = self.compare()?;
        Ok(RunReport {
            layer_type,
            stats: self.stats,
            throughput: self.throughput.unwrap_or(Throughput {
                gflops: f64::NAN,
                dram_gbps: f64::NAN,
            }),
            compared,
            candidate_outputs: std::mem::take(&mut self.candidate_outputs),
        })
    }

    /// Builds both layers and their tensors, then fills the inputs.
    pub fn init(
        &mut self,
        layer_type: LayerType,
        param: &LayerParam,
        resource: Option<LayerResource>,
        inputs: &[BlobDesc],
        outputs: &[BlobDesc],
    ) -> Result<(), ParityError> {
        self.expect_stage("init", Stage::Uninitialized)?;
        let fixture = self.fixture;
        let reference_device = fixture.reference_device().as_ref();
        let candidate_device = fixture.candidate_device().as_ref();

        self.layer_type = Some(layer_type);
        let reference_layer = self.reference_layer.insert(Layer::new(layer_type));
        let candidate_layer = self.candidate_layer.insert(Layer::new(layer_type));

        let factory = TensorPairFactory::new(reference_device, candidate_device);
        self.inputs = factory.create_inputs(inputs);
        self.outputs = factory.create_outputs(outputs, &self.inputs);

        fixture
            .candidate_context()
            .set_num_threads(fixture.config().effective_threads())
            .map_err(|source| ParityError::Initialization {
                side: Side::Candidate,
                source,
            })?;

        let resource = resource.map(Arc::new);
        reference_layer
            .init(
                fixture.reference_context(),
                param,
                resource.clone(),
                &halves(&self.inputs, Side::Reference),
                &mut halves_mut(&mut self.outputs, Side::Reference),
                reference_device,
            )
            .map_err(|source| ParityError::Initialization {
                side: Side::Reference,
                source,
            })?;
        candidate_layer
            .init(
                fixture.candidate_context(),
                param,
                resource,
                &halves(&self.inputs, Side::Candidate),
                &mut halves_mut(&mut self.outputs, Side::Candidate),
                candidate_device,
            )
            .map_err(|source| ParityError::Initialization {
                side: Side::Candidate,
                source,
            })?;

        for pair in &mut self.inputs {
            pair.allocate(reference_device, candidate_device)?;
        }
        let reference_queue = fixture.reference_context().command_queue();
        let candidate_queue = fixture.candidate_context().command_queue();
        for (magic, pair) in self.inputs.iter().enumerate() {
            fill_random_blobs(
                pair.reference(),
                pair.candidate(),
                magic,
                self.ensure_input_positive,
                reference_queue.as_ref(),
                candidate_queue.as_ref(),
            )?;
        }
        for pair in &mut self.outputs {
            pair.allocate(reference_device, candidate_device)?;
        }

        self.advance(Stage::Initialized);
        Ok(())
    }

    /// Recomputes output shapes on both sides.
    pub fn reshape(&mut self) -> Result<(), ParityError> {
        self.expect_stage("reshape", Stage::Initialized)?;
        let (reference_layer, candidate_layer) =
            layer_pair(&mut self.reference_layer, &mut self.candidate_layer, self.stage)?;
        reference_layer
            .reshape(
                &halves(&self.inputs, Side::Reference),
                &mut halves_mut(&mut self.outputs, Side::Reference),
            )
            .map_err(execution(Side::Reference, "reshape"))?;
        candidate_layer
            .reshape(
                &halves(&self.inputs, Side::Candidate),
                &mut halves_mut(&mut self.outputs, Side::Candidate),
            )
            .map_err(execution(Side::Candidate, "reshape"))?;
        self.advance(Stage::Reshaped);
        Ok(())
    }

    /// Runs the reference once and the candidate for the configured iteration count.
    pub fn forward(&mut self) -> Result<(), ParityError> {
        self.expect_stage("forward", Stage::Reshaped)?;
        let fixture = self.fixture;
        let config = fixture.config();
        let (reference_layer, candidate_layer) =
            layer_pair(&mut self.reference_layer, &mut self.candidate_layer, self.stage)?;

        if !config.benchmark_mode {
            reference_layer
                .forward(
                    &halves(&self.inputs, Side::Reference),
                    &halves(&self.outputs, Side::Reference),
                )
                .map_err(execution(Side::Reference, "forward"))?;
            fixture
                .reference_context()
                .synchronize()
                .map_err(execution(Side::Reference, "synchronize"))?;
        }

        let context = fixture.candidate_context();
        let inputs = halves(&self.inputs, Side::Candidate);
        let outputs = halves(&self.outputs, Side::Candidate);
        let mut stats = BenchStats::default();
        for _ in 0..config.effective_iterations() {
            let started = Instant::now();
            context
                .on_instance_forward_begin()
                .map_err(execution(Side::Candidate, "forward begin"))?;
            // Close the bracket even when the forward fails; the context outlives this test.
            let forwarded = candidate_layer
                .forward(&inputs, &outputs)
                .map_err(execution(Side::Candidate, "forward"));
            let ended = context
                .on_instance_forward_end()
                .map_err(execution(Side::Candidate, "forward end"));
            forwarded?;
            ended?;
            context
                .synchronize()
                .map_err(execution(Side::Candidate, "synchronize"))?;
            stats.record(started.elapsed());
        }

        let device = fixture.candidate_device();
        let mut bytes = 0;
        for blob in inputs.iter().chain(outputs.iter()) {
            bytes += device
                .memory_size(blob.desc())
                .map_err(execution(Side::Candidate, "memory size"))?;
        }
        let throughput =
            Throughput::from_stats(&stats, candidate_layer.calc_mflops(&outputs), bytes);
        if config.print_benchmark {
            let label = format!("{} on {}", candidate_layer.layer_type(), config.device_type);
            info!("{}", benchmark_line(&label, &stats, &throughput));
        }
        self.stats = stats;
        self.throughput = Some(throughput);
        self.advance(Stage::Forwarded);
        Ok(())
    }

    /// Compares every output pair; returns `false` when benchmark mode skipped it.
    pub fn compare(&mut self) -> Result<bool, ParityError> {
        self.expect_stage("compare", Stage::Forwarded)?;
        let fixture = self.fixture;
        if fixture.config().benchmark_mode {
            self.advance(Stage::Compared);
            return Ok(false);
        }
        let reference_queue = fixture.reference_context().command_queue();
        let candidate_queue = fixture.candidate_context().command_queue();
        let mut candidate_outputs = Vec::with_capacity(self.outputs.len());
        for (index, pair) in self.outputs.iter().enumerate() {
            candidate_outputs.push(compare_blobs(
                index,
                pair.reference(),
                pair.candidate(),
                reference_queue.as_ref(),
                candidate_queue.as_ref(),
            )?);
        }
        self.candidate_outputs = candidate_outputs;
        self.advance(Stage::Compared);
        Ok(true)
    }

    /// Waits for queued work, releases every tensor pair and drops both layers.
    ///
    /// Valid from any stage; calling it again is a no-op.
    pub fn deinit(&mut self) -> Result<(), ParityError> {
        if self.stage == Stage::Deinitialized {
            return Ok(());
        }
        let fixture = self.fixture;
        let reference = fixture
            .reference_context()
            .synchronize()
            .map_err(execution(Side::Reference, "synchronize"));
        let candidate = fixture
            .candidate_context()
            .synchronize()
            .map_err(execution(Side::Candidate, "synchronize"));

        for pair in self.inputs.drain(..).chain(self.outputs.drain(..)) {
            pair.release();
        }
        self.reference_layer = None;
        self.candidate_layer = None;
        self.advance(Stage::Deinitialized);
        reference.and(candidate)
    }

    fn expect_stage(&self, operation: &'static str, expected: Stage) -> Result<(), ParityError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(ParityError::InvalidStage {
                operation,
                stage: self.stage,
            })
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(
            layer = ?self.layer_type,
            from = %self.stage,
            to = %stage,
            "layer test stage"
        );
        self.stage = stage;
    }
}

impl Drop for LayerTest<'_> {
    fn drop(&mut self) {
        let _ = self.deinit();
    }
}

impl fmt::Debug for LayerTest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerTest")
            .field("layer_type", &self.layer_type)
            .field("stage", &self.stage)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

fn layer_pair<'a>(
    reference: &'a mut Option<Layer>,
    candidate: &'a mut Option<Layer>,
    stage: Stage,
) -> Result<(&'a mut Layer, &'a mut Layer), ParityError> {
    match (reference.as_mut(), candidate.as_mut()) {
        (Some(reference), Some(candidate)) => Ok((reference, candidate)),
        _ => Err(ParityError::InvalidStage {
            operation: "layer access",
            stage,
        }),
    }
}

fn halves(pairs: &[BlobPair], side: Side) -> Vec<&Blob> {
    pairs
        .iter()
        .map(|pair| match side {
            Side::Reference => pair.reference(),
            Side::Candidate => pair.candidate(),
        })
        .collect()
}

fn halves_mut(pairs: &mut [BlobPair], side: Side) -> Vec<&mut Blob> {
    pairs
        .iter_mut()
        .map(|pair| match side {
            Side::Reference => pair.reference_mut(),
            Side::Candidate => pair.candidate_mut(),
        })
        .collect()
}

fn execution(side: Side, stage: &'static str) -> impl Fn(BackendError) -> ParityError {
    move |source| ParityError::Execution {
        side,
        stage,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_lowercase() {
        assert_eq!(Stage::Uninitialized.to_string(), "uninitialized");
        assert_eq!(Stage::Deinitialized.to_string(), "deinitialized");
        let err = ParityError::InvalidStage {
            operation: "forward",
            stage: Stage::Initialized,
        };
        assert_eq!(err.to_string(), "forward is not valid in stage initialized");
    }
}
