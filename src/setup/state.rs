use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::config::CorruptStatePolicy;
use super::error::{Result, SetupError};
use super::steps::{StepCatalog, StepDefinition, StepStatus};

/// Status of every step, keyed by step id.
///
/// Ids the catalog does not know are kept so a newer file survives an older
/// binary, but no scan ever looks at them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverallState {
    steps: BTreeMap<String, StepStatus>,
}

impl OverallState {
    pub fn fresh(catalog: &StepCatalog) -> Self {
        let steps = catalog
            .iter()
            .map(|s| (s.id.clone(), StepStatus::Pending))
            .collect();
        Self { steps }
    }

    pub fn status(&self, id: &str) -> StepStatus {
        self.steps.get(id).copied().unwrap_or_default()
    }

    /// Move a step forward, rejecting anything outside the lifecycle
    pub fn transition(&mut self, id: &str, next: StepStatus) -> Result<()> {
        let from = self.status(id);
        if !from.can_transition_to(next) {
            return Err(SetupError::InvalidTransition {
                step: id.to_string(),
                from,
                to: next,
            });
        }
        self.steps.insert(id.to_string(), next);
        Ok(())
    }

    /// First step in catalog order that is not done. `None` once everything is done.
    pub fn current<'a>(&self, catalog: &'a StepCatalog) -> Option<(&'a StepDefinition, StepStatus)> {
        catalog
            .iter()
            .map(|step| (step, self.status(&step.id)))
            .find(|(_, status)| *status != StepStatus::Done)
    }

    pub fn first_requested<'a>(&self, catalog: &'a StepCatalog) -> Option<&'a StepDefinition> {
        catalog
            .iter()
            .find(|step| self.status(&step.id) == StepStatus::Requested)
    }

    /// Steps in catalog order with their status
    pub fn entries<'a>(
        &'a self,
        catalog: &'a StepCatalog,
    ) -> impl Iterator<Item = (&'a StepDefinition, StepStatus)> + 'a {
        catalog.iter().map(|step| (step, self.status(&step.id)))
    }

    fn fill_missing(&mut self, catalog: &StepCatalog) {
        for step in catalog.iter() {
            self.steps.entry(step.id.clone()).or_default();
        }
    }
}

/// Durable step status record, one JSON file replaced atomically on every save
pub struct StateStore {
    path: PathBuf,
    catalog: Arc<StepCatalog>,
    on_corrupt: CorruptStatePolicy,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, catalog: Arc<StepCatalog>) -> Self {
        Self {
            path: path.into(),
            catalog,
            on_corrupt: CorruptStatePolicy::default(),
        }
    }

    pub fn with_corrupt_policy(mut self, policy: CorruptStatePolicy) -> Self {
        self.on_corrupt = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state, creating and persisting a fresh one if none exists
    pub fn load(&self) -> Result<OverallState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state at {:?}, starting fresh", self.path);
                return self.reset();
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<OverallState>(&content) {
            Ok(mut state) => {
                state.fill_missing(&self.catalog);
                Ok(state)
            }
            Err(e) => self.recover_corrupt(e),
        }
    }

    pub fn save(&self, state: &OverallState) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(state)?;
        json.push(b'\n');
        atomic_write_file(&self.path, &json)?;
        Ok(())
    }

    fn reset(&self) -> Result<OverallState> {
        let state = OverallState::fresh(&self.catalog);
        self.save(&state)?;
        Ok(state)
    }

    fn recover_corrupt(&self, err: serde_json::Error) -> Result<OverallState> {
        let path = self.path.display().to_string();
        match self.on_corrupt {
            CorruptStatePolicy::Fail => Err(SetupError::CorruptState {
                path,
                reason: err.to_string(),
            }),
            CorruptStatePolicy::Reset => {
                let aside = self.path.with_extension("json.corrupt");
                warn!(
                    "State file {} is corrupt ({}), moving it to {:?} and starting fresh",
                    path, err, aside
                );
                fs::rename(&self.path, &aside)?;
                self.reset()
            }
        }
    }
}

fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("state"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    sync_parent_dir(parent)
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> std::io::Result<()> {
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::steps::{CommandSpec, StepDefinition};

    fn catalog() -> StepCatalog {
        StepCatalog::new(vec![
            StepDefinition::new("a", "A", CommandSpec::new("true", &[])),
            StepDefinition::new("b", "B", CommandSpec::new("true", &[])),
            StepDefinition::new("c", "C", CommandSpec::new("true", &[])),
        ])
    }

    #[test]
    fn current_is_first_step_not_done() {
        let catalog = catalog();
        let mut state = OverallState::fresh(&catalog);
        assert_eq!(state.current(&catalog).unwrap().0.id, "a");

        state.transition("a", StepStatus::Done).unwrap();
        let (step, status) = state.current(&catalog).unwrap();
        assert_eq!((step.id.as_str(), status), ("b", StepStatus::Pending));

        // Computing it again gives the same answer
        assert_eq!(state.current(&catalog).unwrap().0.id, "b");
    }

    #[test]
    fn failed_step_halts_the_scan() {
        let catalog = catalog();
        let mut state = OverallState::fresh(&catalog);
        state.transition("a", StepStatus::Done).unwrap();
        state.transition("b", StepStatus::Requested).unwrap();
        state.transition("b", StepStatus::InProgress).unwrap();
        state.transition("b", StepStatus::Failed).unwrap();

        let (step, status) = state.current(&catalog).unwrap();
        assert_eq!((step.id.as_str(), status), ("b", StepStatus::Failed));
        assert!(state.first_requested(&catalog).is_none());
        assert!(state.current(&catalog).is_some());
    }

    #[test]
    fn backward_transition_is_rejected() {
        let catalog = catalog();
        let mut state = OverallState::fresh(&catalog);
        state.transition("a", StepStatus::Done).unwrap();

        let err = state.transition("a", StepStatus::Requested).unwrap_err();
        assert!(matches!(err, SetupError::InvalidTransition { .. }));
        assert_eq!(state.status("a"), StepStatus::Done);
    }

    #[test]
    fn unknown_ids_are_ignored_by_scans() {
        let catalog = catalog();
        let state: OverallState =
            serde_json::from_str(r#"{"zzz": "requested", "a": "done", "b": "done", "c": "done"}"#)
                .unwrap();
        assert!(state.first_requested(&catalog).is_none());
        assert!(state.current(&catalog).is_none());
    }
}
