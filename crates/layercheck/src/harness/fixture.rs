use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, info};

use crate::backend::registry;
use crate::backend::spec::{Context, Device, DeviceType};
use crate::config::HarnessConfig;
use crate::error::ParityError;

/// Devices and contexts shared by every test of a suite.
///
/// Built once by [`ParityFixture::set_up`] and handed to each test by
/// reference. Tests take a [`FixtureSession`] so that at most one test drives
/// the contexts at a time.
pub struct ParityFixture {
    config: HarnessConfig,
    reference_device: Arc<dyn Device>,
    reference_context: Arc<dyn Context>,
    candidate_device: Arc<dyn Device>,
    candidate_context: Arc<dyn Context>,
    session: Mutex<()>,
}

/// Exclusive use of a fixture's contexts for the lifetime of the guard.
pub struct FixtureSession<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ParityFixture {
    pub const REFERENCE_DEVICE: DeviceType = DeviceType::Naive;

    /// Acquires both devices, creates their contexts and loads the candidate
    /// extension library. Any failure is fatal to the suite.
    pub fn set_up(config: HarnessConfig) -> Result<Self, ParityError> {
        let fixture = Self::acquire(config);
        if let Err(err) = &fixture {
            error!(%err, "fixture setup failed");
        }
        fixture
    }

    fn acquire(config: HarnessConfig) -> Result<Self, ParityError> {
        let reference_device = registry::get_device(&Self::REFERENCE_DEVICE).map_err(|err| {
            ParityError::setup(format!("reference device unavailable: {err}"))
        })?;
        let reference_context = reference_device
            .create_context(0)
            .map_err(|err| ParityError::setup(format!("reference context: {err}")))?;

        let candidate_device = registry::get_device(&config.device_type).map_err(|err| {
            ParityError::setup(format!("candidate device unavailable: {err}"))
        })?;
        let candidate_context = candidate_device
            .create_context(config.device_id)
            .map_err(|err| ParityError::setup(format!("candidate context: {err}")))?;
        candidate_context
            .load_library(&config.library_paths())
            .map_err(|err| ParityError::setup(format!("library load: {err}")))?;

        info!(
            reference = %Self::REFERENCE_DEVICE,
            candidate = %config.device_type,
            device_id = config.device_id,
            "parity fixture ready"
        );
        Ok(Self {
            config,
            reference_device,
            reference_context,
            candidate_device,
            candidate_context,
            session: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn reference_device(&self) -> &Arc<dyn Device> {
        &self.reference_device
    }

    pub fn reference_context(&self) -> &Arc<dyn Context> {
        &self.reference_context
    }

    pub fn candidate_device(&self) -> &Arc<dyn Device> {
        &self.candidate_device
    }

    pub fn candidate_context(&self) -> &Arc<dyn Context> {
        &self.candidate_context
    }

    /// Blocks until no other test holds the fixture.
    pub fn session(&self) -> FixtureSession<'_> {
        FixtureSession {
            _guard: self
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Waits for outstanding candidate work and releases both contexts.
    pub fn tear_down(self) -> Result<(), ParityError> {
        self.candidate_context
            .synchronize()
            .map_err(|err| ParityError::setup(format!("candidate teardown: {err}")))
    }
}

impl fmt::Debug for ParityFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParityFixture")
            .field("reference", &self.reference_device.device_type())
            .field("candidate", &self.candidate_device.device_type())
            .field("config", &self.config)
            .finish()
    }
}
