//! The execute step: selects phases for the configured blocks, drives them
//! over every guest and persists the aggregate results.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use testrig_core::{
    ensure_dir, plan_paths, ExportedResult, Guest, Outcome, PlanPaths, Test, TestResult,
    RESULTS_FILENAME, STEP_STATE_FILENAME,
};
use tracing::{debug, info, warn};

use crate::legacy::normalize_phase;
use crate::phase::{Phase, PhaseContext, PhaseInit, PhaseKind};
use crate::plan::{PhaseData, Plan};
use crate::registry::PhaseRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("Multiple execute steps defined in '{plan}'.")]
    MultipleExecuteSteps { plan: String },
    #[error("No guests available for execution.")]
    NoGuests,
    #[error("unsupported execute method '{method}' (supported: {supported})")]
    UnsupportedMethod { method: String, supported: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Todo,
    Done,
}

#[derive(Debug, Serialize, Deserialize)]
struct StepState {
    status: StepStatus,
}

pub struct ExecuteStep {
    plan_name: String,
    data: Vec<PhaseData>,
    tests: Vec<Test>,
    worktree: PathBuf,
    environment: BTreeMap<String, String>,
    paths: PlanPaths,
    registry: PhaseRegistry,
    phases: Vec<Box<dyn Phase>>,
    status: StepStatus,
    results: Vec<TestResult>,
}

impl ExecuteStep {
    /// `plan_workdir` holds the plan data directory and the step workdir.
    pub fn new(plan: &Plan, plan_workdir: &Path) -> Self {
        Self {
            plan_name: plan.name.clone(),
            data: plan.execute_data(),
            tests: plan.tests().to_vec(),
            worktree: plan.worktree(),
            environment: plan.environment(),
            paths: plan_paths(plan_workdir),
            registry: PhaseRegistry::builtin(),
            phases: Vec::new(),
            status: StepStatus::Todo,
            results: Vec::new(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.paths.execute_workdir
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn phases(&self) -> &[Box<dyn Phase>] {
        &self.phases
    }

    /// Prepare the phases. Legacy methods are remapped before the registry
    /// is consulted; at most one block may produce results.
    pub fn wake(&mut self) -> Result<()> {
        self.load();

        let mut phases = Vec::with_capacity(self.data.len() + 1);
        let mut executors = 0usize;
        for data in &self.data {
            let normalized = normalize_phase(data);
            for warning in &normalized.warnings {
                warn!(plan = %self.plan_name, "{}", warning);
            }
            let entry = self.registry.lookup(&normalized.data.how)?;
            if entry.kind == PhaseKind::Executor {
                executors += 1;
            }
            phases.push((entry, normalized));
        }
        if executors > 1 {
            return Err(StepError::MultipleExecuteSteps {
                plan: self.plan_name.clone(),
            }
            .into());
        }

        self.phases.clear();
        for (entry, normalized) in phases {
            let phase = (entry.construct)(PhaseInit {
                data: normalized.data,
                default_framework: normalized.default_framework,
                tests: self.tests.clone(),
            })?;
            self.phases.push(phase);
        }
        if executors == 0 {
            let data = PhaseData::default_executor();
            debug!(plan = %self.plan_name, method = %data.how, "no executor configured, using default");
            let default = normalize_phase(&data);
            self.phases.push(self.registry.construct(PhaseInit {
                data: default.data,
                default_framework: default.default_framework,
                tests: self.tests.clone(),
            })?);
        }
        self.phases.sort_by_key(|phase| phase.order());

        if self.status == StepStatus::Done {
            debug!(plan = %self.plan_name, "execute step already done");
            return Ok(());
        }
        self.status = StepStatus::Todo;
        self.save()
    }

    /// Run every enabled phase on every guest, guest by guest.
    pub fn go(&mut self, guests: &[&dyn Guest]) -> Result<()> {
        if self.status == StepStatus::Done {
            info!(plan = %self.plan_name, "execute step already done");
            self.summary();
            return Ok(());
        }
        if guests.is_empty() {
            return Err(StepError::NoGuests.into());
        }

        ensure_dir(&self.paths.data_directory)?;
        ensure_dir(&self.paths.execute_workdir)?;
        let mut ctx = PhaseContext::new(
            self.plan_name.clone(),
            self.paths.clone(),
            self.worktree.clone(),
            self.environment.clone(),
        );
        self.results.clear();

        for guest in guests {
            for phase in self.phases.iter_mut() {
                if !phase.enabled_on_guest(*guest) {
                    debug!(guest = guest.name(), phase = %phase.name(), "phase not enabled on guest");
                    continue;
                }
                info!(guest = guest.name(), phase = %phase.name(), "running phase");
                phase.go(*guest, &mut ctx)?;
                if phase.kind() == PhaseKind::Executor {
                    self.results.extend(phase.take_results());
                }
            }
        }

        self.summary();
        self.status = StepStatus::Done;
        self.save()
    }

    /// Package requirements of every result-producing phase.
    pub fn requires(&self) -> BTreeSet<String> {
        self.phases
            .iter()
            .filter(|phase| phase.kind() == PhaseKind::Executor)
            .flat_map(|phase| phase.requires())
            .collect()
    }

    pub fn show(&self) -> String {
        let mut out = String::new();
        for phase in &self.phases {
            out.push_str(&format!("{} ({})\n", phase.name(), phase.kind().as_str()));
            for (key, value) in phase.describe() {
                out.push_str(&format!("    {:<10} {}\n", key, value));
            }
        }
        out
    }

    /// Log and return the result overview.
    pub fn summary(&self) -> String {
        let total = self.results.len();
        let mut line = format!(
            "{} {} executed",
            total,
            if total == 1 { "test" } else { "tests" }
        );
        let counts: Vec<String> = Outcome::ALL
            .iter()
            .filter_map(|outcome| {
                let count = self
                    .results
                    .iter()
                    .filter(|result| result.result == *outcome)
                    .count();
                (count > 0).then(|| format!("{} {}", count, outcome))
            })
            .collect();
        if !counts.is_empty() {
            line.push_str(&format!(" ({})", counts.join(", ")));
        }
        info!(plan = %self.plan_name, "{}", line);
        line
    }

    /// Restore status and results. Missing or unreadable documents leave
    /// the step without results.
    pub fn load(&mut self) {
        let state_path = self.paths.execute_workdir.join(STEP_STATE_FILENAME);
        match read_optional_yaml::<StepState>(&state_path) {
            Ok(Some(state)) => self.status = state.status,
            Ok(None) => debug!(path = %state_path.display(), "no step state yet"),
            Err(err) => debug!(path = %state_path.display(), error = %err, "ignoring unreadable step state"),
        }

        let results_path = self.paths.execute_workdir.join(RESULTS_FILENAME);
        let loaded = read_optional_yaml::<serde_yaml::Mapping>(&results_path)
            .and_then(|document| document.map(results_from_document).transpose());
        self.results = match loaded {
            Ok(Some(results)) => results,
            Ok(None) => {
                debug!(path = %results_path.display(), "no results yet");
                Vec::new()
            }
            Err(err) => {
                debug!(path = %results_path.display(), error = %err, "ignoring unreadable results");
                Vec::new()
            }
        };
    }

    pub fn save(&self) -> Result<()> {
        let state = serde_yaml::to_string(&StepState {
            status: self.status,
        })?;
        atomic_write_bytes(
            &self.paths.execute_workdir.join(STEP_STATE_FILENAME),
            state.as_bytes(),
        )?;

        let mut document = serde_yaml::Mapping::new();
        for result in &self.results {
            document.insert(
                serde_yaml::Value::String(result.name.clone()),
                serde_yaml::to_value(result.export())?,
            );
        }
        let results = serde_yaml::to_string(&document)?;
        atomic_write_bytes(
            &self.paths.execute_workdir.join(RESULTS_FILENAME),
            results.as_bytes(),
        )
        .with_context(|| format!("failed to save results of '{}'", self.plan_name))
    }
}

/// Rebuild results from the persisted document, keeping document order.
fn results_from_document(document: serde_yaml::Mapping) -> Result<Vec<TestResult>> {
    document
        .into_iter()
        .map(|(name, value)| {
            let name = name
                .as_str()
                .ok_or_else(|| anyhow!("result key is not a test name: {:?}", name))?
                .to_string();
            let exported: ExportedResult = serde_yaml::from_value(value)
                .with_context(|| format!("invalid result of '{}'", name))?;
            Ok(TestResult::from_export(name, exported))
        })
        .collect()
}

fn read_optional_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_yaml::from_str(&raw)?))
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
