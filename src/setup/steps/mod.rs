use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use super::error::{Result, SetupError};

pub const GENERATE_ENV: &str = "generate_env";
pub const INIT_CERT: &str = "init_cert";
pub const INIT_KEYCLOAK: &str = "init_keycloak";
pub const MIGRATE: &str = "migrate";
pub const DOCKER_UP: &str = "docker_up";

/// Lifecycle status of a single step, as persisted in the state file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Requested,
    InProgress,
    Done,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Requested => "requested",
            StepStatus::InProgress => "in_progress",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
        }
    }

    /// No automatic transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed)
    }

    /// Queued for, or currently held by, the runner
    pub fn is_active(&self) -> bool {
        matches!(self, StepStatus::Requested | StepStatus::InProgress)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Requested)
                | (StepStatus::Requested, StepStatus::InProgress)
                | (StepStatus::InProgress, StepStatus::Done)
                | (StepStatus::InProgress, StepStatus::Failed)
                // The synchronous step runs inline and skips the queue
                | (StepStatus::Pending, StepStatus::Done)
                | (StepStatus::Pending, StepStatus::Failed)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External program plus its fixed argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Split a shell-style command line such as `make init-cert`
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = shell_words::split(line)
            .map_err(|e| SetupError::Command(format!("cannot parse {line:?}: {e}")))?;
        if words.is_empty() {
            return Err(SetupError::EmptyCommand(line.to_string()));
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }

    /// Escaped command line for logs and dry runs
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| shell_escape::escape(s.as_str().into()).to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A value the operator types into the setup form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub secret: bool,
}

impl FormField {
    fn new(name: &str, label: &str, secret: bool) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            secret,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StepInput {
    /// Queued for the runner, needs only a confirmation click
    #[default]
    None,
    /// Runs inline in the request, fed these fields on stdin
    Form(Vec<FormField>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub id: String,
    pub title: String,
    pub command: CommandSpec,
    pub input: StepInput,
    /// The UI listener must be stopped while this step runs (it binds the same port)
    pub needs_listener_port: bool,
}

impl StepDefinition {
    pub fn new(id: &str, title: &str, command: CommandSpec) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            command,
            input: StepInput::None,
            needs_listener_port: false,
        }
    }

    pub fn with_form(mut self, fields: Vec<FormField>) -> Self {
        self.input = StepInput::Form(fields);
        self
    }

    pub fn with_listener_port(mut self) -> Self {
        self.needs_listener_port = true;
        self
    }

    pub fn is_synchronous(&self) -> bool {
        matches!(self.input, StepInput::Form(_))
    }

    pub fn form_fields(&self) -> &[FormField] {
        match &self.input {
            StepInput::Form(fields) => fields,
            StepInput::None => &[],
        }
    }
}

/// Immutable, ordered list of steps. Catalog order is execution order.
#[derive(Debug, Clone)]
pub struct StepCatalog {
    steps: Vec<StepDefinition>,
}

impl StepCatalog {
    pub fn new(steps: Vec<StepDefinition>) -> Self {
        Self { steps }
    }

    /// The five provisioning steps driven through `make`, with per-step overrides
    pub fn standard(make_program: &str, overrides: &BTreeMap<String, String>) -> Result<Self> {
        let make = |target: &str| CommandSpec::new(make_program, &[target]);

        let mut steps = vec![
            StepDefinition::new(GENERATE_ENV, ".env Created", make("generate-env")).with_form(vec![
                FormField::new("DOMAIN", "Main Domain (e.g. ap.example.com)", false),
                FormField::new("AUTH_DOMAIN", "Auth Domain (e.g. auth.example.com)", false),
                FormField::new("ADMIN_USERNAME", "Admin Username", false),
                FormField::new("ADMIN_PASSWORD", "Admin Password", true),
            ]),
            StepDefinition::new(INIT_CERT, "Certificates Initialized", make("init-cert"))
                .with_listener_port(),
            StepDefinition::new(INIT_KEYCLOAK, "Keycloak Initialized", make("init-keycloak")),
            StepDefinition::new(MIGRATE, "Database Migrated", make("migrate")),
            StepDefinition::new(DOCKER_UP, "Services Started", make("up")),
        ];

        for (id, line) in overrides {
            match steps.iter_mut().find(|s| &s.id == id) {
                Some(step) => step.command = CommandSpec::parse(line)?,
                None => warn!("Ignoring command override for unknown step {:?}", id),
            }
        }

        Ok(Self::new(steps))
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter()
    }

    pub fn get(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn last(&self) -> Option<&StepDefinition> {
        self.steps.last()
    }

    pub fn is_last(&self, id: &str) -> bool {
        self.last().is_some_and(|s| s.id == id)
    }
}
