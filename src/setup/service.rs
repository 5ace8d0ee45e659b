use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::config::SetupConfig;
use super::error::Result;
use super::executor::{self, CommandOutput};
use super::steps::CommandSpec;

/// Trait abstracting the host operations the wizard performs
pub trait SetupService: Send + Sync {
    /// Run a step's command to completion. `Err` means it could not be launched.
    fn run_command(&self, cmd: &CommandSpec, input: Option<&str>) -> Result<CommandOutput>;

    /// Stop the process serving the web UI so its port is free
    fn stop_listener(&self) -> Result<()>;
    fn start_listener(&self) -> Result<()>;

    /// Remove whatever keeps re-invoking the wizard. Must be idempotent.
    fn disable_autostart(&self);
}

/// Live service that executes real system commands
pub struct LiveService {
    workdir: PathBuf,
    unit: String,
    cron_marker: String,
}

impl LiveService {
    pub fn new(config: &SetupConfig) -> Self {
        Self {
            workdir: config.general.workdir.clone(),
            unit: config.autostart.unit.clone(),
            cron_marker: config.autostart.cron_marker.clone(),
        }
    }
}

impl SetupService for LiveService {
    fn run_command(&self, cmd: &CommandSpec, input: Option<&str>) -> Result<CommandOutput> {
        executor::run_captured(cmd, &self.workdir, input)
    }

    fn stop_listener(&self) -> Result<()> {
        executor::stop_unit(&self.unit)
    }

    fn start_listener(&self) -> Result<()> {
        executor::start_unit(&self.unit)
    }

    fn disable_autostart(&self) {
        executor::disable_autostart(&self.unit, &self.cron_marker);
    }
}

/// Dryrun service that simulates operations without system changes
pub struct DryrunService;

impl SetupService for DryrunService {
    fn run_command(&self, cmd: &CommandSpec, _input: Option<&str>) -> Result<CommandOutput> {
        info!("Dryrun: would run {}", cmd.display());
        Ok(CommandOutput {
            success: true,
            code: Some(0),
            stdout: format!("[dryrun] {}\n", cmd.display()),
            stderr: String::new(),
        })
    }

    fn stop_listener(&self) -> Result<()> {
        info!("Dryrun: skipping listener stop");
        Ok(())
    }

    fn start_listener(&self) -> Result<()> {
        info!("Dryrun: skipping listener start");
        Ok(())
    }

    fn disable_autostart(&self) {
        info!("Dryrun: skipping autostart removal");
    }
}

/// Create the appropriate service based on dryrun mode
pub fn create_service(config: &SetupConfig) -> Arc<dyn SetupService> {
    if config.general.dryrun {
        Arc::new(DryrunService)
    } else {
        Arc::new(LiveService::new(config))
    }
}
