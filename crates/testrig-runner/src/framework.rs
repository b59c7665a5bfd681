use testrig_core::{Framework, Outcome, Test, TestResult, TEST_OUTPUT_FILENAME};
use tracing::warn;

use crate::extract::ResultExtractor;

/// Which result strategies apply to tests of one framework, and in which
/// order.
pub trait FrameworkPolicy: Sync {
    fn framework(&self) -> Framework;

    /// Packages the guest needs for tests of this framework.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    fn determine(&self, extractor: &ResultExtractor, test: &Test) -> TestResult;
}

#[derive(Debug, Clone, Copy)]
pub struct ShellPolicy;

#[derive(Debug, Clone, Copy)]
pub struct BeakerlibPolicy;

impl FrameworkPolicy for ShellPolicy {
    fn framework(&self) -> Framework {
        Framework::Shell
    }

    /// Prefer an explicit report-result file, fall back to the exit code.
    fn determine(&self, extractor: &ResultExtractor, test: &Test) -> TestResult {
        match extractor.check_result_file(test) {
            Ok(Some(result)) => result,
            Ok(None) => extractor.check_shell(test),
            Err(err) => {
                warn!(test = %test.name, error = %err, "unusable report-result file");
                let log = extractor
                    .data_path(test, Some(TEST_OUTPUT_FILENAME), false, false)
                    .ok();
                let mut result = TestResult::new(test.name.clone(), Outcome::Error)
                    .with_duration(test.real_duration.clone())
                    .with_note(format!("report-result: {}", err));
                result.log.extend(log);
                result
            }
        }
    }
}

impl FrameworkPolicy for BeakerlibPolicy {
    fn framework(&self) -> Framework {
        Framework::Beakerlib
    }

    fn requires(&self) -> &'static [&'static str] {
        &["beakerlib"]
    }

    fn determine(&self, extractor: &ResultExtractor, test: &Test) -> TestResult {
        extractor.check_beakerlib(test)
    }
}

static SHELL: ShellPolicy = ShellPolicy;
static BEAKERLIB: BeakerlibPolicy = BeakerlibPolicy;

pub fn policy_for(framework: Framework) -> &'static dyn FrameworkPolicy {
    match framework {
        Framework::Shell => &SHELL,
        Framework::Beakerlib => &BEAKERLIB,
    }
}
