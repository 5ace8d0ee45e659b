mod config;
mod error;
mod executor;
mod gateway;
mod log;
mod runner;
mod service;
mod state;
pub mod steps;

pub use config::{CorruptStatePolicy, LogResetPolicy, SetupConfig};
pub use error::{Result, SetupError};
pub use executor::{is_root, CommandOutput};
pub use gateway::{Gateway, RunOutcome, StepParams, View};
pub use log::LogSink;
pub use runner::{Runner, TickOutcome};
pub use service::{create_service, DryrunService, LiveService, SetupService};
pub use state::{OverallState, StateStore};
pub use steps::{CommandSpec, StepCatalog, StepDefinition, StepStatus};

use std::sync::Arc;
use tracing::info;

/// Everything needed to build the gateway or the runner from one config
pub struct Wizard {
    config: SetupConfig,
    catalog: Arc<StepCatalog>,
    service: Arc<dyn SetupService>,
}

impl Wizard {
    pub fn new(config: SetupConfig) -> Result<Self> {
        let service = create_service(&config);
        Self::with_service(config, service)
    }

    pub fn with_service(config: SetupConfig, service: Arc<dyn SetupService>) -> Result<Self> {
        let catalog = Arc::new(config.catalog()?);
        Ok(Self {
            config,
            catalog,
            service,
        })
    }

    pub fn config(&self) -> &SetupConfig {
        &self.config
    }

    pub fn catalog(&self) -> &StepCatalog {
        &self.catalog
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(self.config.state_path(), self.catalog.clone())
            .with_corrupt_policy(self.config.state.on_corrupt)
    }

    pub fn log(&self) -> LogSink {
        LogSink::new(self.config.log_path())
    }

    pub fn gateway(&self) -> Gateway {
        Gateway::new(
            self.catalog.clone(),
            self.store(),
            self.log(),
            self.service.clone(),
        )
    }

    pub fn runner(&self) -> Runner {
        Runner::new(
            self.catalog.clone(),
            self.store(),
            self.log(),
            self.service.clone(),
        )
        .with_listener_pause(self.config.listener_pause())
    }

    /// Clear the previous run's log when the web UI cold-starts
    pub fn reset_log_on_start(&self) -> Result<bool> {
        let reset = match self.config.log.reset_on_start {
            LogResetPolicy::Always => true,
            LogResetPolicy::Never => false,
            LogResetPolicy::FreshRun => {
                let state = self.store().load()?;
                state
                    .entries(&self.catalog)
                    .all(|(_, status)| status == StepStatus::Pending)
            }
        };

        if reset {
            info!("Clearing previous setup log at {:?}", self.config.log_path());
            self.log().reset()?;
        }
        Ok(reset)
    }
}
