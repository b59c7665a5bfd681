use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::time::{Duration, Instant};
use testrig_core::{
    format_duration, Framework, Guest, Test, TestResult, PROCESS_TIMEOUT, SCRIPTS, TEST_DATA,
    TEST_METADATA_FILENAME, TEST_OUTPUT_FILENAME, TESTRIG_ENV_PLAN_DATA, TESTRIG_ENV_TEST_DATA,
    TESTRIG_ENV_TEST_NAME, TESTRIG_ENV_TREE,
};
use tracing::{debug, info};

use crate::extract::ResultExtractor;
use crate::framework::policy_for;
use crate::phase::{Phase, PhaseContext, PhaseInit, PhaseKind};
use crate::plan::PhaseData;
use crate::scripts::push_scripts;

pub const EXECUTE_INTERNAL_METHOD: &str = "tmt";

/// Runs the discovered tests one by one on each guest.
pub struct ExecuteInternal {
    data: PhaseData,
    default_framework: Framework,
    tests: Vec<Test>,
    results: Vec<TestResult>,
}

impl ExecuteInternal {
    pub fn construct(init: PhaseInit) -> Result<Box<dyn Phase>> {
        Ok(Box::new(Self {
            data: init.data,
            default_framework: init.default_framework,
            tests: init.tests,
            results: Vec::new(),
        }))
    }

    fn test_environment(
        &self,
        test: &Test,
        extractor: &ResultExtractor,
        ctx: &PhaseContext,
    ) -> Result<BTreeMap<String, String>> {
        let mut env = ctx.environment.clone();
        env.extend(test.environment.clone());
        let test_data = extractor.data_path(test, Some(TEST_DATA), true, false)?;
        env.insert(
            TESTRIG_ENV_TEST_DATA.to_string(),
            test_data.to_string_lossy().to_string(),
        );
        env.insert(TESTRIG_ENV_TEST_NAME.to_string(), test.name.clone());
        env.insert(
            TESTRIG_ENV_PLAN_DATA.to_string(),
            ctx.paths.data_directory.to_string_lossy().to_string(),
        );
        env.insert(
            TESTRIG_ENV_TREE.to_string(),
            ctx.worktree.to_string_lossy().to_string(),
        );
        ctx.reboot.publish(&mut env, &ctx.paths.reboot_request);
        Ok(env)
    }

    fn run_test(
        &self,
        guest: &dyn Guest,
        test: &Test,
        extractor: &ResultExtractor,
        ctx: &PhaseContext,
    ) -> Result<TestResult> {
        let mut test = test.clone();
        let env = self.test_environment(&test, extractor, ctx)?;
        let cwd = match &test.path {
            Some(path) => ctx.worktree.join(path.trim_start_matches('/')),
            None => ctx.worktree.clone(),
        };
        let budget = Duration::from_secs(test.duration_seconds());

        debug!(guest = guest.name(), test = %test.name, command = %test.test, "running test");
        let started = Instant::now();
        let output = guest.execute(&test.test, Some(&cwd), &env, Some(budget))?;
        let elapsed = started.elapsed();

        let output_path = extractor.data_path(&test, Some(TEST_OUTPUT_FILENAME), true, false)?;
        let mut combined = output.stdout;
        combined.push_str(&output.stderr);
        fs::write(&output_path, combined)
            .with_context(|| format!("failed to write {}", output_path.display()))?;

        test.returncode = match output.returncode {
            Some(code) => Some(code),
            None if elapsed >= budget => Some(PROCESS_TIMEOUT),
            None => None,
        };
        test.real_duration = Some(format_duration(elapsed));

        guest.pull(&extractor.data_path(&test, None, true, false)?)?;

        let framework = test.framework_or(self.default_framework);
        let result = policy_for(framework)
            .determine(extractor, &test)
            .interpret(test.result);
        info!(
            guest = guest.name(),
            duration = result.duration.as_deref().unwrap_or("-"),
            "{} {}",
            result.result,
            result.name
        );
        Ok(result)
    }
}

impl Phase for ExecuteInternal {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Executor
    }

    fn data(&self) -> &PhaseData {
        &self.data
    }

    fn go(&mut self, guest: &dyn Guest, ctx: &mut PhaseContext) -> Result<()> {
        let extractor = ResultExtractor::new(&ctx.paths.execute_workdir);
        for test in &self.tests {
            let metadata = extractor.data_path(test, Some(TEST_METADATA_FILENAME), true, true)?;
            fs::write(&metadata, serde_yaml::to_string(test)?)
                .with_context(|| format!("failed to write {}", metadata.display()))?;
        }
        if !guest.is_local() {
            push_scripts(guest, &ctx.paths.scripts_dir, SCRIPTS)?;
        }

        for test in &self.tests {
            let result = self.run_test(guest, test, &extractor, ctx)?;
            let stop = self.data.exit_first && result.result.is_failure();
            self.results.push(result);
            if stop {
                info!(test = %test.name, "stopping after first failure (exit-first)");
                break;
            }
        }
        Ok(())
    }

    fn take_results(&mut self) -> Vec<TestResult> {
        std::mem::take(&mut self.results)
    }

    fn requires(&self) -> BTreeSet<String> {
        self.tests
            .iter()
            .flat_map(|test| policy_for(test.framework_or(self.default_framework)).requires())
            .map(|package| package.to_string())
            .collect()
    }

    fn describe(&self) -> Vec<(&'static str, String)> {
        let mut lines = vec![
            ("how", self.data.how.clone()),
            ("order", self.data.order.to_string()),
            ("framework", self.default_framework.to_string()),
        ];
        if let Some(name) = &self.data.name {
            lines.push(("name", name.clone()));
        }
        let guests = self.data.guests();
        if !guests.is_empty() {
            lines.push(("where", guests.join(", ")));
        }
        if self.data.exit_first {
            lines.push(("exit-first", "true".to_string()));
        }
        lines
    }
}
