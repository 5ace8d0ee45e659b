use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use zeroize::{Zeroize, Zeroizing};

use super::error::Result;
use super::log::LogSink;
use super::runner::execute_and_record;
use super::service::SetupService;
use super::state::StateStore;
use super::steps::{StepCatalog, StepDefinition, StepStatus};

/// What the web UI should show for the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// The synchronous step is pending: show its input form
    CollectInput { step: StepDefinition },
    /// A queued step is pending: ask for confirmation to request it
    Confirm { step: StepDefinition },
    /// A step is queued, running or failed
    Progress {
        step: StepDefinition,
        status: StepStatus,
        logs: String,
    },
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The synchronous step ran inline and finished with this status
    Executed(StepStatus),
    /// The step was handed to the runner
    Queued,
    /// Input for the synchronous step was incomplete
    Rejected(String),
    /// Unknown step, or not the pending current step
    Ignored,
}

/// Submitted form values. Wiped from memory on drop since they include the admin password.
#[derive(Default)]
pub struct StepParams {
    values: HashMap<String, String>,
}

impl StepParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Remove a value, e.g. the `step` selector that is not a form field
    pub fn take(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    fn insert(&mut self, name: String, value: String) {
        if let Some(mut replaced) = self.values.insert(name, value) {
            replaced.zeroize();
        }
    }
}

/// Builds the params straight from the request body so no plain map of the values is left behind
impl<'de> Deserialize<'de> for StepParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ParamsVisitor;

        impl<'de> Visitor<'de> for ParamsVisitor {
            type Value = StepParams;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of form fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<StepParams, A::Error> {
                let mut params = StepParams {
                    values: HashMap::with_capacity(map.size_hint().unwrap_or(0)),
                };
                // On error `params` is dropped, which wipes what was read so far
                while let Some((name, value)) = map.next_entry::<String, String>()? {
                    params.insert(name, value);
                }
                Ok(params)
            }
        }

        deserializer.deserialize_map(ParamsVisitor)
    }
}

impl Drop for StepParams {
    fn drop(&mut self) {
        for value in self.values.values_mut() {
            value.zeroize();
        }
    }
}

/// Synchronous front door used by the web UI
pub struct Gateway {
    catalog: Arc<StepCatalog>,
    store: StateStore,
    log: LogSink,
    service: Arc<dyn SetupService>,
    lock: Mutex<()>,
}

impl Gateway {
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
            lock: Mutex::new(()),
        }
    }

    pub fn view(&self) -> Result<View> {
        let state = self.store.load()?;

        let Some((step, status)) = state.current(&self.catalog) else {
            return Ok(View::Complete);
        };

        let view = match status {
            StepStatus::Pending if step.is_synchronous() => View::CollectInput { step: step.clone() },
            StepStatus::Pending => View::Confirm { step: step.clone() },
            _ => View::Progress {
                step: step.clone(),
                status,
                logs: self.log.read_all()?,
            },
        };
        Ok(view)
    }

    /// Handle a "run this step" request. Never starts a queued step itself.
    pub fn run(&self, step_id: &str, params: &StepParams) -> Result<RunOutcome> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.store.load()?;

        let Some(step) = self.catalog.get(step_id) else {
            info!("Ignoring request for unknown step {:?}", step_id);
            return Ok(RunOutcome::Ignored);
        };

        match state.current(&self.catalog) {
            Some((current, StepStatus::Pending)) if current.id == step.id => {}
            _ => {
                info!(
                    "Ignoring request for {} with status {}",
                    step.id,
                    state.status(&step.id)
                );
                return Ok(RunOutcome::Ignored);
            }
        }

        if step.is_synchronous() {
            let input = match build_input(step, params) {
                Ok(input) => input,
                Err(missing) => {
                    warn!("Rejecting {}: missing {}", step.id, missing);
                    return Ok(RunOutcome::Rejected(format!("{missing} is required")));
                }
            };

            info!("Running {} inline", step.id);
            let status = execute_and_record(self.service.as_ref(), &self.log, step, Some(input.as_str()))?;
            state.transition(&step.id, status)?;
            self.store.save(&state)?;
            return Ok(RunOutcome::Executed(status));
        }

        state.transition(&step.id, StepStatus::Requested)?;
        self.store.save(&state)?;
        info!("Requested {}", step.id);
        Ok(RunOutcome::Queued)
    }
}

/// stdin for the synchronous step: a confirmation line, then one field value per line
fn build_input(step: &StepDefinition, params: &StepParams) -> std::result::Result<Zeroizing<String>, String> {
    let mut input = Zeroizing::new(String::from("y\n"));
    for field in step.form_fields() {
        match params.get(&field.name) {
            Some(value) if !value.trim().is_empty() => {
                input.push_str(value);
                input.push('\n');
            }
            _ => return Err(field.name.clone()),
        }
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::steps::{CommandSpec, FormField};

    #[test]
    fn input_lists_fields_in_form_order() {
        let step = StepDefinition::new("env", "Env", CommandSpec::new("true", &[])).with_form(vec![
            FormField {
                name: "B".to_string(),
                label: "b".to_string(),
                secret: false,
            },
            FormField {
                name: "A".to_string(),
                label: "a".to_string(),
                secret: true,
            },
        ]);
        let params = StepParams::new().with("A", "first").with("B", "second");

        let input = build_input(&step, &params).unwrap();
        assert_eq!(input.as_str(), "y\nsecond\nfirst\n");

        let partial = StepParams::new().with("B", "second").with("A", "  ");
        assert_eq!(build_input(&step, &partial).unwrap_err(), "A");
    }

    #[test]
    fn params_deserialize_from_a_flat_map() {
        let mut params: StepParams =
            serde_json::from_str(r#"{"step": "generate_env", "DOMAIN": "x", "ADMIN_PASSWORD": "p"}"#)
                .unwrap();

        assert_eq!(params.take("step").as_deref(), Some("generate_env"));
        assert_eq!(params.get("step"), None);
        assert_eq!(params.get("DOMAIN"), Some("x"));
        assert_eq!(params.get("ADMIN_PASSWORD"), Some("p"));

        assert!(serde_json::from_str::<StepParams>(r#"{"DOMAIN": 1}"#).is_err());
    }
}
