use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use testrig_core::{Framework, Guest, PlanPaths, Test, TestResult};

use crate::plan::PhaseData;
use crate::reboot::RebootState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Runs tests and produces results.
    Executor,
    /// Acts on the guest without producing results.
    Auxiliary,
}

impl PhaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executor => "executor",
            Self::Auxiliary => "auxiliary",
        }
    }
}

/// Everything a phase constructor receives.
#[derive(Debug, Clone)]
pub struct PhaseInit {
    pub data: PhaseData,
    pub default_framework: Framework,
    pub tests: Vec<Test>,
}

/// Run state shared by every phase invocation within one run of the step.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub plan_name: String,
    pub paths: PlanPaths,
    pub worktree: PathBuf,
    pub environment: BTreeMap<String, String>,
    pub reboot: RebootState,
}

impl PhaseContext {
    pub fn new(
        plan_name: impl Into<String>,
        paths: PlanPaths,
        worktree: PathBuf,
        environment: BTreeMap<String, String>,
    ) -> Self {
        Self {
            plan_name: plan_name.into(),
            paths,
            worktree,
            environment,
            reboot: RebootState::new(),
        }
    }
}

pub trait Phase {
    fn kind(&self) -> PhaseKind;

    fn data(&self) -> &PhaseData;

    fn name(&self) -> String {
        self.data()
            .name
            .clone()
            .unwrap_or_else(|| self.data().how.clone())
    }

    fn order(&self) -> i64 {
        self.data().order
    }

    fn enabled_on_guest(&self, guest: &dyn Guest) -> bool {
        let guests = self.data().guests();
        guests.is_empty() || guests.iter().any(|name| name == guest.name())
    }

    fn go(&mut self, guest: &dyn Guest, ctx: &mut PhaseContext) -> Result<()>;

    /// Drain results produced since the last call.
    fn take_results(&mut self) -> Vec<TestResult> {
        Vec::new()
    }

    fn requires(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Key/value lines shown by `show`.
    fn describe(&self) -> Vec<(&'static str, String)> {
        let data = self.data();
        let mut lines = vec![("how", data.how.clone()), ("order", data.order.to_string())];
        if let Some(name) = &data.name {
            lines.push(("name", name.clone()));
        }
        let guests = data.guests();
        if !guests.is_empty() {
            lines.push(("where", guests.join(", ")));
        }
        lines
    }
}
