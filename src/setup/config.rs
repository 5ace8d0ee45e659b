use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::error::Result;
use super::steps::StepCatalog;

const DEFAULT_CONFIG_PATH: &str = "/etc/init-setup/init-setup.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub state: StateConfig,
    pub log: LogConfig,
    pub steps: StepsConfig,
    /// Per-step command overrides, keyed by step id (e.g. `migrate = "make migrate-all"`)
    pub commands: BTreeMap<String, String>,
    pub autostart: AutostartConfig,
}

impl SetupConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: SetupConfig = toml::from_str(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Relative paths are taken against the working directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.general.workdir.join(path)
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.resolve(&self.state.state_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.log.log_file)
    }

    pub fn listener_pause(&self) -> Duration {
        Duration::from_millis(self.steps.listener_pause_ms)
    }

    pub fn catalog(&self) -> Result<StepCatalog> {
        StepCatalog::standard(&self.steps.make_program, &self.commands)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub title: String,
    /// Directory the provisioning commands run in
    pub workdir: PathBuf,
    /// Simulate every command instead of running it
    pub dryrun: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            title: "Initial Setup".to_string(),
            workdir: PathBuf::from("."),
            dryrun: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:80".to_string(),
        }
    }
}

/// What to do with a state file that exists but cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptStatePolicy {
    /// Move the file aside and start from a fresh all-pending state
    #[default]
    Reset,
    /// Refuse to continue
    Fail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub state_file: PathBuf,
    pub on_corrupt: CorruptStatePolicy,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(".init-setup-state.json"),
            on_corrupt: CorruptStatePolicy::Reset,
        }
    }
}

/// When the web UI clears the log at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogResetPolicy {
    /// Every cold start
    Always,
    /// Only while no step has left `pending`, so a restart mid-run keeps the output
    #[default]
    FreshRun,
    Never,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub log_file: PathBuf,
    pub reset_on_start: LogResetPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("init-setup-log.txt"),
            reset_on_start: LogResetPolicy::FreshRun,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StepsConfig {
    pub make_program: String,
    /// Pause after stopping the UI listener so the port is released
    pub listener_pause_ms: u64,
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            make_program: "make".to_string(),
            listener_pause_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutostartConfig {
    /// systemd unit hosting the web UI
    pub unit: String,
    /// Crontab lines containing this marker are removed on completion
    pub cron_marker: String,
}

impl Default for AutostartConfig {
    fn default() -> Self {
        Self {
            unit: "init-setup".to_string(),
            cron_marker: "init-setup --run-step".to_string(),
        }
    }
}
