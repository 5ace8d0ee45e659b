#![allow(dead_code)]

use init_setup::setup::{
    CommandOutput, CommandSpec, OverallState, SetupConfig, SetupError, SetupService, StepStatus,
    Wizard,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// What a mocked command should do
#[derive(Debug, Clone)]
pub enum MockResult {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    LaunchError(String),
}

impl MockResult {
    pub fn fail(code: i32, stderr: &str) -> Self {
        MockResult::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Records every host operation in order; commands succeed unless told otherwise
#[derive(Default)]
pub struct MockService {
    calls: Mutex<Vec<String>>,
    inputs: Mutex<Vec<Option<String>>>,
    results: Mutex<HashMap<String, MockResult>>,
    state_on_stop: Mutex<Option<(PathBuf, String)>>,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Keyed by the command line, e.g. `make init-cert`
    pub fn set_result(&self, command: &str, result: MockResult) {
        self.results
            .lock()
            .unwrap()
            .insert(command.to_string(), result);
    }

    /// Stands in for a second tick that claims the step while this one waits for the port
    pub fn write_state_on_stop(&self, dir: &Path, json: &str) {
        *self.state_on_stop.lock().unwrap() = Some((dir.to_path_buf(), json.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<Option<String>> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SetupService for MockService {
    fn run_command(
        &self,
        cmd: &CommandSpec,
        input: Option<&str>,
    ) -> Result<CommandOutput, SetupError> {
        let line = cmd.display();
        self.record(format!("run {line}"));
        self.inputs.lock().unwrap().push(input.map(str::to_string));

        match self.results.lock().unwrap().get(&line).cloned() {
            None => Ok(CommandOutput {
                success: true,
                code: Some(0),
                stdout: format!("ran {line}\n"),
                stderr: String::new(),
            }),
            Some(MockResult::Exit {
                code,
                stdout,
                stderr,
            }) => Ok(CommandOutput {
                success: code == 0,
                code: Some(code),
                stdout,
                stderr,
            }),
            Some(MockResult::LaunchError(msg)) => Err(SetupError::Command(msg)),
        }
    }

    fn stop_listener(&self) -> Result<(), SetupError> {
        self.record("stop_listener".to_string());
        if let Some((dir, json)) = self.state_on_stop.lock().unwrap().take() {
            write_state(&dir, &json);
        }
        Ok(())
    }

    fn start_listener(&self) -> Result<(), SetupError> {
        self.record("start_listener".to_string());
        Ok(())
    }

    fn disable_autostart(&self) {
        self.record("disable_autostart".to_string());
    }
}

pub fn config(dir: &Path) -> SetupConfig {
    let mut config = SetupConfig::default();
    config.general.workdir = dir.to_path_buf();
    config.steps.listener_pause_ms = 0;
    config
}

pub fn wizard(dir: &Path, service: Arc<MockService>) -> Wizard {
    Wizard::with_service(config(dir), service).expect("wizard")
}

pub fn write_state(dir: &Path, json: &str) {
    std::fs::write(dir.join(".init-setup-state.json"), json).expect("write state");
}

pub fn statuses(wizard: &Wizard) -> Vec<(String, StepStatus)> {
    let state: OverallState = wizard.store().load().expect("load state");
    state
        .entries(wizard.catalog())
        .map(|(step, status)| (step.id.clone(), status))
        .collect()
}

pub fn status_of(wizard: &Wizard, id: &str) -> StepStatus {
    wizard.store().load().expect("load state").status(id)
}

pub fn active_count(wizard: &Wizard) -> usize {
    statuses(wizard)
        .iter()
        .filter(|(_, status)| status.is_active())
        .count()
}

pub fn env_params() -> init_setup::setup::StepParams {
    init_setup::setup::StepParams::new()
        .with("DOMAIN", "x")
        .with("AUTH_DOMAIN", "y")
        .with("ADMIN_USERNAME", "u")
        .with("ADMIN_PASSWORD", "p")
}
