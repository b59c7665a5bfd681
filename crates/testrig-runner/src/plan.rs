use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use testrig_core::{Test, DEFAULT_PHASE_ORDER};
use testrig_schemas::{validate, PLAN_SCHEMA};

use crate::executor::EXECUTE_INTERNAL_METHOD;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

fn default_order() -> i64 {
    DEFAULT_PHASE_ORDER
}

/// One configured block of the execute step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PhaseData {
    pub how: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_order")]
    pub order: i64,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<OneOrMany<String>>,
    #[serde(default)]
    pub exit_first: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl PhaseData {
    pub fn new(how: impl Into<String>) -> Self {
        Self {
            how: how.into(),
            name: None,
            order: DEFAULT_PHASE_ORDER,
            where_: None,
            exit_first: false,
            script: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn default_executor() -> Self {
        Self::new(EXECUTE_INTERNAL_METHOD)
    }

    /// Guest names this phase is limited to; empty means every guest.
    pub fn guests(&self) -> Vec<String> {
        self.where_
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Discover {
    #[serde(default)]
    pub tests: Vec<Test>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,
    #[serde(default)]
    pub environment: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub discover: Discover,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<OneOrMany<PhaseData>>,
}

impl Plan {
    pub fn tests(&self) -> &[Test] {
        &self.discover.tests
    }

    pub fn execute_data(&self) -> Vec<PhaseData> {
        self.execute
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    pub fn environment(&self) -> BTreeMap<String, String> {
        self.environment
            .iter()
            .map(|(key, value)| (key.clone(), yaml_scalar_to_string(value)))
            .collect()
    }

    pub fn worktree(&self) -> PathBuf {
        self.worktree.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

pub fn parse_plan(raw: &str) -> Result<Plan> {
    let document: serde_yaml::Value = serde_yaml::from_str(raw)?;
    let as_json = serde_json::to_value(&document)
        .map_err(|e| anyhow!("plan document is not JSON compatible: {}", e))?;
    validate(PLAN_SCHEMA, &as_json)?;
    Ok(serde_yaml::from_value(document)?)
}

/// Make `path` absolute against the current directory. Tests run with the
/// worktree as their cwd, so every path handed to a guest must be absolute.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("failed to resolve the current directory")?
        .join(path))
}

/// Load a plan document; a relative worktree is resolved against the
/// directory holding the plan file.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    let mut plan =
        parse_plan(&raw).with_context(|| format!("invalid plan {}", path.display()))?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tree = match plan.worktree.take() {
        Some(tree) if tree.is_absolute() => tree,
        Some(tree) => base.join(tree),
        None => base.to_path_buf(),
    };
    plan.worktree = Some(absolute_path(&tree)?);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use testrig_core::Framework;

    const PLAN: &str = r#"
name: /plans/smoke
environment:
  RETRIES: 3
  MODE: fast
discover:
  tests:
    - name: /tests/shell
      test: ./shell.sh
    - name: /tests/lib
      test: make run
      framework: beakerlib
      duration: 10m
execute:
  - how: reboot
    script: ./trigger.sh
    order: 40
    where: client
  - how: tmt
    exit-first: true
"#;

    #[test]
    fn parse_plan_reads_phases_and_tests() {
        let plan = parse_plan(PLAN).expect("plan should parse");
        assert_eq!(plan.name, "/plans/smoke");
        assert_eq!(plan.tests().len(), 2);
        assert_eq!(plan.tests()[1].framework, Some(Framework::Beakerlib));

        let phases = plan.execute_data();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].how, "reboot");
        assert_eq!(phases[0].order, 40);
        assert_eq!(phases[0].guests(), vec!["client".to_string()]);
        assert!(phases[1].exit_first);
        assert_eq!(phases[1].order, DEFAULT_PHASE_ORDER);
        assert!(phases[1].guests().is_empty());
    }

    #[test]
    fn environment_scalars_become_strings() {
        let plan = parse_plan(PLAN).expect("plan should parse");
        let env = plan.environment();
        assert_eq!(env.get("RETRIES").map(String::as_str), Some("3"));
        assert_eq!(env.get("MODE").map(String::as_str), Some("fast"));
    }

    #[test]
    fn single_execute_mapping_is_accepted() {
        let plan = parse_plan("name: /plans/one\nexecute:\n  how: shell\n").expect("plan");
        assert_eq!(plan.execute_data(), vec![PhaseData::new("shell")]);
    }

    #[test]
    fn load_plan_resolves_worktree_next_to_the_plan() {
        let root = crate::testing::TempDirGuard::new("testrig_plan_load");
        let plan_path = root.path.join("plan.yaml");
        fs::write(&plan_path, "name: /plans/tree\nworktree: tree\n").expect("plan file");
        let plan = load_plan(&plan_path).expect("plan should load");
        assert_eq!(plan.worktree(), root.path.join("tree"));
    }

    #[test]
    fn schema_violations_are_reported() {
        let err = parse_plan("name: /plans/bad\nexecute:\n  order: 3\n")
            .expect_err("execute without how should fail");
        assert!(err.to_string().contains("schema validation failed"), "{}", err);
    }
}
