use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::error::Result;
use super::executor::CommandOutput;
use super::log::LogSink;
use super::service::SetupService;
use super::state::StateStore;
use super::steps::{StepCatalog, StepDefinition, StepStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was requested, or another runner got there first
    Idle,
    Ran {
        step: String,
        status: StepStatus,
        autostart_disabled: bool,
    },
}

/// Out-of-band executor. Each `tick` runs at most one requested step.
pub struct Runner {
    catalog: Arc<StepCatalog>,
    store: StateStore,
    log: LogSink,
    service: Arc<dyn SetupService>,
    listener_pause: Duration,
}

impl Runner {
    pub fn new(
        catalog: Arc<StepCatalog>,
        store: StateStore,
        log: LogSink,
        service: Arc<dyn SetupService>,
    ) -> Self {
        Self {
            catalog,
            store,
            log,
            service,
            listener_pause: Duration::from_secs(2),
        }
    }

    pub fn with_listener_pause(mut self, pause: Duration) -> Self {
        self.listener_pause = pause;
        self
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    pub fn tick(&self) -> Result<TickOutcome> {
        let state = self.store.load()?;
        info!("Loaded state: {:?}", state);

        let Some(step) = state.first_requested(&self.catalog) else {
            info!("No requested steps found, nothing to run");
            return Ok(TickOutcome::Idle);
        };

        let listener_stopped = step.needs_listener_port && self.stop_listener();

        let outcome = match self.claim_and_run(step) {
            Ok(Some(ran)) => Ok(ran),
            // The tick that claimed the step restarts the listener once its step ends
            Ok(None) => return Ok(TickOutcome::Idle),
            Err(e) => Err(e),
        };

        // The UI must come back whatever happened to the step
        if listener_stopped {
            if let Err(e) = self.service.start_listener() {
                warn!("Failed to restart the web UI listener: {}", e);
            }
        }

        outcome
    }

    fn stop_listener(&self) -> bool {
        info!("Stopping the web UI listener to free its port");
        if let Err(e) = self.service.stop_listener() {
            warn!("Failed to stop the web UI listener: {}", e);
        }
        std::thread::sleep(self.listener_pause);
        true
    }

    /// `None` when the step is no longer `requested`, i.e. another tick claimed it
    fn claim_and_run(&self, step: &StepDefinition) -> Result<Option<TickOutcome>> {
        // Another tick may have claimed the step while this one was waiting
        let mut state = self.store.load()?;
        let current = state.status(&step.id);
        if current != StepStatus::Requested {
            info!("Step {} is already {}, leaving it alone", step.id, current);
            return Ok(None);
        }

        info!("Executing step: {}", step.id);
        state.transition(&step.id, StepStatus::InProgress)?;
        self.store.save(&state)?;

        let status = execute_and_record(self.service.as_ref(), &self.log, step, None)?;
        state.transition(&step.id, status)?;
        self.store.save(&state)?;

        let autostart_disabled = status == StepStatus::Done && self.catalog.is_last(&step.id);
        if autostart_disabled {
            info!("Final step done, disabling autostart");
            self.service.disable_autostart();
        }

        Ok(Some(TickOutcome::Ran {
            step: step.id.clone(),
            status,
            autostart_disabled,
        }))
    }
}

/// Run a step's command and append its output to the log. Launch failures count as failed.
pub(crate) fn execute_and_record(
    service: &dyn SetupService,
    log: &LogSink,
    step: &StepDefinition,
    input: Option<&str>,
) -> Result<StepStatus> {
    let output = match service.run_command(&step.command, input) {
        Ok(output) => output,
        Err(e) => {
            error!("Step {} could not be started: {}", step.id, e);
            CommandOutput::launch_failure(e)
        }
    };

    log.append(&step.title, &output.stdout, &output.stderr)?;

    let status = if output.success {
        info!("Step {} completed", step.id);
        StepStatus::Done
    } else {
        error!("Step {} failed with code {:?}", step.id, output.code);
        StepStatus::Failed
    };
    Ok(status)
}
