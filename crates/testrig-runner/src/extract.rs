//! Result determination for executed tests.
//!
//! Each strategy turns one kind of raw artifact into a [`TestResult`]:
//! the process exit code, a beakerlib `TestResults` log, or the
//! out-of-band file written by the report-result helper. Problems with the
//! artifacts themselves degrade into an `error` result with a note so one
//! broken test never stops its siblings.

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use testrig_core::{
    ensure_dir, Outcome, Test, TestResult, BEAKERLIB_RESULTS_FILENAME, PROCESS_TIMEOUT,
    REPORT_RESULT_OUTPUT, TEST_DATA, TEST_JOURNAL_FILENAME, TEST_OUTPUT_FILENAME,
};
use tracing::{debug, warn};

const BEAKERLIB_RESULT_KEY: &str = "TESTRESULT_RESULT_STRING=";
const BEAKERLIB_STATE_KEY: &str = "TESTRESULT_STATE=";
const BEAKERLIB_COMPLETE_STATE: &str = "complete";
const REPORT_RESULT_MARKER: &str = "TESTRESULT";

/// The report-result file exists but cannot be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum ResultFileError {
    #[error("Test result not found in result file '{}'.", path.display())]
    MissingResultLine { path: PathBuf },
    #[error("failed to read result file '{}': {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ResultExtractor {
    workdir: PathBuf,
}

impl ResultExtractor {
    /// `workdir` is the execute step working directory every log reference
    /// is made relative to.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn test_dir(&self, test: &Test) -> PathBuf {
        self.workdir
            .join(TEST_DATA)
            .join(test.name.trim_start_matches('/'))
    }

    /// Location of a test's artifact directory, or of `filename` inside it.
    ///
    /// With `create` the directory and its nested data directory (where
    /// guest-side helpers drop files) are created. The path is relative to
    /// the step workdir unless `full` is set, so persisted log references
    /// survive moving the workdir.
    pub fn data_path(
        &self,
        test: &Test,
        filename: Option<&str>,
        full: bool,
        create: bool,
    ) -> Result<PathBuf> {
        let directory = self.test_dir(test);
        if create && !directory.join(TEST_DATA).is_dir() {
            ensure_dir(&directory.join(TEST_DATA))?;
        }
        let path = match filename {
            Some(name) => directory.join(name),
            None => directory,
        };
        if full {
            return Ok(path);
        }
        Ok(path
            .strip_prefix(&self.workdir)
            .map(Path::to_path_buf)
            .unwrap_or(path))
    }

    fn full_path(&self, test: &Test, filename: &str) -> PathBuf {
        self.test_dir(test).join(filename)
    }

    fn relative_path(&self, test: &Test, filename: &str) -> PathBuf {
        Path::new(TEST_DATA)
            .join(test.name.trim_start_matches('/'))
            .join(filename)
    }

    fn base_result(&self, test: &Test, outcome: Outcome) -> TestResult {
        TestResult::new(test.name.clone(), outcome).with_duration(test.real_duration.clone())
    }

    /// Exit code 0 passes, 1 fails, anything else is an error.
    pub fn check_shell(&self, test: &Test) -> TestResult {
        let outcome = match test.returncode {
            Some(0) => Outcome::Pass,
            Some(1) => Outcome::Fail,
            _ => Outcome::Error,
        };
        let mut result = self
            .base_result(test, outcome)
            .with_log(self.relative_path(test, TEST_OUTPUT_FILENAME));
        if test.returncode == Some(PROCESS_TIMEOUT) {
            result = result.with_note("timeout");
            self.timeout_hint(test);
        }
        result
    }

    /// Read the beakerlib `TestResults` log of a test.
    pub fn check_beakerlib(&self, test: &Test) -> TestResult {
        let mut result = self.base_result(test, Outcome::Error);
        for log in [TEST_OUTPUT_FILENAME, TEST_JOURNAL_FILENAME] {
            if self.full_path(test, log).is_file() {
                result = result.with_log(self.relative_path(test, log));
            }
        }

        if test.returncode == Some(PROCESS_TIMEOUT) {
            self.timeout_hint(test);
            return result.with_note("timeout");
        }

        let results_path = self.full_path(test, BEAKERLIB_RESULTS_FILENAME);
        let content = match fs::read_to_string(&results_path) {
            Ok(content) => content,
            Err(err) => {
                debug!(path = %results_path.display(), error = %err, "unable to read beakerlib results");
                return result.with_note("beakerlib: TestResults missing");
            }
        };

        let Some((result_string, state)) = parse_beakerlib_results(&content) else {
            debug!(path = %results_path.display(), "no result or state found in beakerlib results");
            return result.with_note("beakerlib: Result/State missing");
        };

        if state != BEAKERLIB_COMPLETE_STATE {
            return result.with_note(format!("beakerlib: State '{}'", state));
        }

        match result_string.to_lowercase().parse::<Outcome>() {
            Ok(outcome) => {
                result.result = outcome;
                result
            }
            Err(_) => result.with_note(format!("beakerlib: invalid result '{}'", result_string)),
        }
    }

    fn report_result_path(&self, test: &Test) -> PathBuf {
        self.test_dir(test)
            .join(TEST_DATA)
            .join(REPORT_RESULT_OUTPUT)
    }

    /// Whether the report-result helper left a result file for `test`.
    pub fn has_result_file(&self, test: &Test) -> bool {
        self.report_result_path(test).is_file()
    }

    /// Interpret the file written by the report-result helper.
    ///
    /// `Ok(None)` means no file exists, so the caller can fall back to
    /// another strategy. A file without any result line is an error.
    pub fn check_result_file(
        &self,
        test: &Test,
    ) -> std::result::Result<Option<TestResult>, ResultFileError> {
        let path = self.report_result_path(test);
        if !path.is_file() {
            return Ok(None);
        }
        debug!(path = %path.display(), "report-result output file detected");
        let content = fs::read_to_string(&path).map_err(|source| ResultFileError::Unreadable {
            path: path.clone(),
            source,
        })?;
        let Some(literal) = first_report_result(&content) else {
            return Err(ResultFileError::MissingResultLine { path });
        };

        let result = self
            .base_result(test, Outcome::Error)
            .with_log(self.relative_path(test, TEST_OUTPUT_FILENAME));
        let result = match report_result_outcome(&literal) {
            Some(outcome) => TestResult { result: outcome, ..result },
            None => result.with_note(format!(
                "invalid test result '{}' in result file",
                literal
            )),
        };
        Ok(Some(result))
    }

    /// Append a duration increase hint to the test output.
    pub fn timeout_hint(&self, test: &Test) {
        let output = self.full_path(test, TEST_OUTPUT_FILENAME);
        let hint = format!(
            "\nMaximum test time '{}' exceeded.\nAdjust the test 'duration' attribute if necessary.\n",
            test.duration
        );
        let appended = output
            .parent()
            .map(ensure_dir)
            .unwrap_or(Ok(()))
            .and_then(|_| {
                let mut file = OpenOptions::new().create(true).append(true).open(&output)?;
                file.write_all(hint.as_bytes())?;
                Ok(())
            });
        if let Err(err) = appended {
            warn!(path = %output.display(), error = %err, "failed to append timeout hint");
        }
    }
}

fn strip_quotes(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('"').unwrap_or(trimmed);
    trimmed.strip_suffix('"').unwrap_or(trimmed)
}

fn value_after<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content
        .lines()
        .find_map(|line| line.find(key).map(|idx| &line[idx + key.len()..]))
}

/// Extract the result string and state from a beakerlib `TestResults` log.
fn parse_beakerlib_results(content: &str) -> Option<(String, String)> {
    let result = strip_quotes(value_after(content, BEAKERLIB_RESULT_KEY)?);
    if result.is_empty() {
        return None;
    }
    let raw_state = value_after(content, BEAKERLIB_STATE_KEY)?;
    let raw_state = raw_state.strip_prefix('"').unwrap_or(raw_state);
    let state: String = raw_state
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if state.is_empty() {
        return None;
    }
    Some((result.to_string(), state))
}

/// Value of the first line mentioning `TESTRESULT`; later lines are ignored.
fn first_report_result(content: &str) -> Option<String> {
    let line = content
        .lines()
        .find(|line| line.contains(REPORT_RESULT_MARKER))?;
    let value = line.split_once('=').map(|(_, v)| v).unwrap_or("");
    Some(value.trim().to_string())
}

fn report_result_outcome(literal: &str) -> Option<Outcome> {
    match literal {
        "PASS" => Some(Outcome::Pass),
        "FAIL" => Some(Outcome::Fail),
        "SKIP" => Some(Outcome::Info),
        "WARN" => Some(Outcome::Warn),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TempDirGuard;

    fn executed(name: &str, returncode: Option<i32>) -> Test {
        let mut test = Test::new(name, "./run.sh");
        test.returncode = returncode;
        test.real_duration = Some("00:00:03".to_string());
        test
    }

    fn write_artifact(extractor: &ResultExtractor, test: &Test, name: &str, content: &str) {
        let path = extractor
            .data_path(test, Some(name), true, true)
            .expect("data path");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("artifact parent");
        }
        fs::write(path, content).expect("write artifact");
    }

    #[test]
    fn data_path_is_relative_unless_full() {
        let root = TempDirGuard::new("testrig_extract_paths");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/smoke", Some(0));

        let relative = extractor
            .data_path(&test, Some("output.txt"), false, false)
            .expect("relative path");
        assert_eq!(relative, PathBuf::from("data/tests/smoke/output.txt"));

        let full = extractor
            .data_path(&test, None, true, true)
            .expect("full path");
        assert_eq!(full, root.path.join("data/tests/smoke"));
        assert!(full.join("data").is_dir(), "nested data dir is created");
    }

    #[test]
    fn check_shell_maps_exit_codes() {
        let root = TempDirGuard::new("testrig_extract_shell");
        let extractor = ResultExtractor::new(&root.path);
        for (code, outcome) in [
            (Some(0), Outcome::Pass),
            (Some(1), Outcome::Fail),
            (Some(2), Outcome::Error),
            (Some(255), Outcome::Error),
            (None, Outcome::Error),
        ] {
            let result = extractor.check_shell(&executed("/tests/a", code));
            assert_eq!(result.result, outcome, "exit code {:?}", code);
            assert!(result.note.is_none(), "exit code {:?}", code);
            assert_eq!(result.duration.as_deref(), Some("00:00:03"));
            assert_eq!(result.log, vec![PathBuf::from("data/tests/a/output.txt")]);
        }
    }

    #[test]
    fn check_shell_timeout_notes_and_appends_hint() {
        let root = TempDirGuard::new("testrig_extract_timeout");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/slow", Some(PROCESS_TIMEOUT));
        write_artifact(&extractor, &test, TEST_OUTPUT_FILENAME, "partial output");

        let result = extractor.check_shell(&test);
        assert_eq!(result.result, Outcome::Error);
        assert_eq!(result.note.as_deref(), Some("timeout"));

        let output = fs::read_to_string(root.path.join("data/tests/slow/output.txt"))
            .expect("output should exist");
        assert!(output.starts_with("partial output"));
        assert!(output.contains("Maximum test time '5m' exceeded."), "{}", output);
    }

    #[test]
    fn check_beakerlib_complete_pass() {
        let root = TempDirGuard::new("testrig_extract_bkr_pass");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/lib", Some(0));
        write_artifact(&extractor, &test, TEST_OUTPUT_FILENAME, "out");
        write_artifact(
            &extractor,
            &test,
            BEAKERLIB_RESULTS_FILENAME,
            "TESTRESULT_RESULT_STRING=PASS\nTESTRESULT_STATE=\"complete\"\n",
        );

        let result = extractor.check_beakerlib(&test);
        assert_eq!(result.result, Outcome::Pass);
        assert!(result.note.is_none());
        assert_eq!(result.log, vec![PathBuf::from("data/tests/lib/output.txt")]);
    }

    #[test]
    fn check_beakerlib_incomplete_state_is_error_regardless_of_result() {
        let root = TempDirGuard::new("testrig_extract_bkr_state");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/lib", Some(0));
        for result_string in ["PASS", "FAIL", "WARN"] {
            write_artifact(
                &extractor,
                &test,
                BEAKERLIB_RESULTS_FILENAME,
                &format!(
                    "TESTRESULT_RESULT_STRING={}\nTESTRESULT_STATE=incomplete\n",
                    result_string
                ),
            );
            let result = extractor.check_beakerlib(&test);
            assert_eq!(result.result, Outcome::Error);
            assert_eq!(result.note.as_deref(), Some("beakerlib: State 'incomplete'"));
        }
    }

    #[test]
    fn check_beakerlib_degrades_missing_or_malformed_logs() {
        let root = TempDirGuard::new("testrig_extract_bkr_missing");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/lib", Some(0));

        let missing = extractor.check_beakerlib(&test);
        assert_eq!(missing.result, Outcome::Error);
        assert_eq!(missing.note.as_deref(), Some("beakerlib: TestResults missing"));
        assert!(missing.log.is_empty());

        write_artifact(&extractor, &test, TEST_JOURNAL_FILENAME, "journal");
        write_artifact(
            &extractor,
            &test,
            BEAKERLIB_RESULTS_FILENAME,
            "TESTRESULT_RESULT_STRING=PASS\n",
        );
        let malformed = extractor.check_beakerlib(&test);
        assert_eq!(malformed.result, Outcome::Error);
        assert_eq!(malformed.note.as_deref(), Some("beakerlib: Result/State missing"));
        assert_eq!(malformed.log, vec![PathBuf::from("data/tests/lib/journal.txt")]);

        write_artifact(
            &extractor,
            &test,
            BEAKERLIB_RESULTS_FILENAME,
            "TESTRESULT_RESULT_STRING=BOGUS\nTESTRESULT_STATE=complete\n",
        );
        let invalid = extractor.check_beakerlib(&test);
        assert_eq!(invalid.result, Outcome::Error);
        assert_eq!(invalid.note.as_deref(), Some("beakerlib: invalid result 'BOGUS'"));
    }

    #[test]
    fn check_beakerlib_timeout_wins_over_log_content() {
        let root = TempDirGuard::new("testrig_extract_bkr_timeout");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/lib", Some(PROCESS_TIMEOUT));
        write_artifact(
            &extractor,
            &test,
            BEAKERLIB_RESULTS_FILENAME,
            "TESTRESULT_RESULT_STRING=PASS\nTESTRESULT_STATE=complete\n",
        );
        let result = extractor.check_beakerlib(&test);
        assert_eq!(result.result, Outcome::Error);
        assert_eq!(result.note.as_deref(), Some("timeout"));
        assert!(root.path.join("data/tests/lib/output.txt").is_file());
    }

    #[test]
    fn check_result_file_absent_is_a_side_effect_free_probe() {
        let root = TempDirGuard::new("testrig_extract_rr_absent");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/a", Some(0));
        for _ in 0..2 {
            assert!(extractor.check_result_file(&test).expect("probe").is_none());
            assert!(!extractor.has_result_file(&test));
        }
        assert!(!root.path.join("data").exists());
    }

    #[test]
    fn check_result_file_maps_vocabulary() {
        let root = TempDirGuard::new("testrig_extract_rr_map");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/a", Some(1));
        let path = format!("{}/{}", TEST_DATA, REPORT_RESULT_OUTPUT);
        for (literal, outcome) in [
            ("PASS", Outcome::Pass),
            ("FAIL", Outcome::Fail),
            ("SKIP", Outcome::Info),
            ("WARN", Outcome::Warn),
        ] {
            write_artifact(&extractor, &test, &path, &format!("TESTRESULT={}\n", literal));
            let result = extractor
                .check_result_file(&test)
                .expect("readable")
                .expect("present");
            assert_eq!(result.result, outcome, "{}", literal);
            assert!(result.note.is_none());
        }

        write_artifact(&extractor, &test, &path, "TESTRESULT=MAYBE\n");
        let invalid = extractor
            .check_result_file(&test)
            .expect("readable")
            .expect("present");
        assert_eq!(invalid.result, Outcome::Error);
        assert_eq!(
            invalid.note.as_deref(),
            Some("invalid test result 'MAYBE' in result file")
        );
    }

    #[test]
    fn check_result_file_honours_first_line_only() {
        let root = TempDirGuard::new("testrig_extract_rr_first");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/a", Some(0));
        let path = format!("{}/{}", TEST_DATA, REPORT_RESULT_OUTPUT);
        write_artifact(
            &extractor,
            &test,
            &path,
            "noise\nphase-1 TESTRESULT=WARN\nTESTRESULT=PASS\n",
        );
        let result = extractor
            .check_result_file(&test)
            .expect("readable")
            .expect("present");
        assert_eq!(result.result, Outcome::Warn);
    }

    #[test]
    fn check_result_file_without_result_line_is_an_error() {
        let root = TempDirGuard::new("testrig_extract_rr_empty");
        let extractor = ResultExtractor::new(&root.path);
        let test = executed("/tests/a", Some(0));
        let path = format!("{}/{}", TEST_DATA, REPORT_RESULT_OUTPUT);
        write_artifact(&extractor, &test, &path, "nothing useful\n");
        let err = extractor
            .check_result_file(&test)
            .expect_err("file without a result line");
        assert!(matches!(err, ResultFileError::MissingResultLine { .. }));
    }
}
