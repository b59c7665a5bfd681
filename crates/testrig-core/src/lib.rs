use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

pub mod guest;
pub mod result;
pub mod script;

pub use guest::{CommandOutput, Guest, GuestError, PushOptions};
pub use result::{ExportedResult, Outcome, ResultInterpret, TestResult};
pub use script::{
    Script, SCRIPTS, SCRIPTS_DIR, TESTRIG_FILE_SUBMIT_SCRIPT, TESTRIG_REBOOT_SCRIPT,
    TESTRIG_REPORT_RESULT_SCRIPT,
};
pub use test::{duration_to_seconds, format_duration, Framework, Test};

/// Test data directory name, used both under the step workdir and nested
/// inside every per-test directory for guest-pulled artifacts.
pub const TEST_DATA: &str = "data";
pub const TEST_OUTPUT_FILENAME: &str = "output.txt";
pub const TEST_JOURNAL_FILENAME: &str = "journal.txt";
pub const TEST_METADATA_FILENAME: &str = "metadata.yaml";
pub const BEAKERLIB_RESULTS_FILENAME: &str = "TestResults";
/// File written by the report-result helper inside the test data directory.
pub const REPORT_RESULT_OUTPUT: &str = "restraint-result";
pub const REBOOT_REQUEST_FILENAME: &str = "reboot-request";

pub const RESULTS_FILENAME: &str = "results.yaml";
pub const STEP_STATE_FILENAME: &str = "step.yaml";

/// Return code reported by guest backends when a test exceeds its duration.
pub const PROCESS_TIMEOUT: i32 = 124;
pub const DEFAULT_TEST_DURATION: &str = "5m";
pub const DEFAULT_PHASE_ORDER: i64 = 50;

pub const TESTRIG_ENV_TEST_DATA: &str = "TESTRIG_TEST_DATA";
pub const TESTRIG_ENV_TEST_NAME: &str = "TESTRIG_TEST_NAME";
pub const TESTRIG_ENV_PLAN_DATA: &str = "TESTRIG_PLAN_DATA";
pub const TESTRIG_ENV_TREE: &str = "TESTRIG_TREE";
pub const TESTRIG_ENV_REBOOT_REQUEST: &str = "TESTRIG_REBOOT_REQUEST";

#[derive(Debug, Clone)]
pub struct PlanPaths {
    pub root: PathBuf,
    pub data_directory: PathBuf,
    pub execute_workdir: PathBuf,
    pub scripts_dir: PathBuf,
    pub reboot_request: PathBuf,
}

pub fn plan_paths(plan_workdir: &Path) -> PlanPaths {
    let data_directory = plan_workdir.join(TEST_DATA);
    PlanPaths {
        root: plan_workdir.to_path_buf(),
        reboot_request: data_directory.join(REBOOT_REQUEST_FILENAME),
        data_directory,
        execute_workdir: plan_workdir.join("execute"),
        scripts_dir: plan_workdir.join("scripts"),
    }
}

/// Turn a plan or test name into a single path-safe component.
pub fn sanitize_for_fs(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "default".to_string()
    } else {
        out
    }
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}
