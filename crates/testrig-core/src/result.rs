use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Canonical test outcome shared by every framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Info,
    Warn,
    Error,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Pass,
        Outcome::Fail,
        Outcome::Info,
        Outcome::Warn,
        Outcome::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(anyhow!("unknown outcome '{}'", other)),
        }
    }
}

/// How the determined outcome of a test is interpreted (the test's
/// `result` metadata key).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultInterpret {
    #[default]
    Respect,
    Xfail,
    Pass,
    Info,
    Warn,
    Error,
    Fail,
    Custom,
}

impl ResultInterpret {
    fn forced(self) -> Option<Outcome> {
        match self {
            Self::Pass => Some(Outcome::Pass),
            Self::Info => Some(Outcome::Info),
            Self::Warn => Some(Outcome::Warn),
            Self::Error => Some(Outcome::Error),
            Self::Fail => Some(Outcome::Fail),
            Self::Respect | Self::Xfail | Self::Custom => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum LogRef {
    Single(PathBuf),
    Many(Vec<PathBuf>),
}

/// Exported shape of a result inside the persisted results document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedResult {
    pub result: Outcome,
    log: LogRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub name: String,
    pub result: Outcome,
    pub log: Vec<PathBuf>,
    pub duration: Option<String>,
    pub note: Option<String>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, result: Outcome) -> Self {
        Self {
            name: name.into(),
            result,
            log: Vec::new(),
            duration: None,
            note: None,
        }
    }

    pub fn with_log(mut self, log: impl Into<PathBuf>) -> Self {
        self.log.push(log.into());
        self
    }

    pub fn with_duration(mut self, duration: Option<String>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Apply the test's result interpretation to the determined outcome.
    pub fn interpret(mut self, how: ResultInterpret) -> Self {
        let original = self.result;
        let interpreted = match how {
            ResultInterpret::Respect | ResultInterpret::Custom => original,
            ResultInterpret::Xfail => match original {
                Outcome::Pass => Outcome::Fail,
                Outcome::Fail => Outcome::Pass,
                other => other,
            },
            forced => forced.forced().unwrap_or(original),
        };
        if interpreted != original {
            let note = format!("original result: {}", original);
            self.note = Some(match self.note.take() {
                Some(existing) => format!("{}, {}", existing, note),
                None => note,
            });
            self.result = interpreted;
        }
        self
    }

    pub fn export(&self) -> ExportedResult {
        let log = if self.log.len() == 1 {
            LogRef::Single(self.log[0].clone())
        } else {
            LogRef::Many(self.log.clone())
        };
        ExportedResult {
            result: self.result,
            log,
            duration: self.duration.clone(),
            note: self.note.clone(),
        }
    }

    pub fn from_export(name: impl Into<String>, exported: ExportedResult) -> Self {
        let log = match exported.log {
            LogRef::Single(path) => vec![path],
            LogRef::Many(paths) => paths,
        };
        Self {
            name: name.into(),
            result: exported.result,
            log,
            duration: exported.duration,
            note: exported.note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xfail_swaps_pass_and_fail_and_keeps_original() {
        let result = TestResult::new("/t", Outcome::Fail).interpret(ResultInterpret::Xfail);
        assert_eq!(result.result, Outcome::Pass);
        assert_eq!(result.note.as_deref(), Some("original result: fail"));

        let untouched = TestResult::new("/t", Outcome::Error).interpret(ResultInterpret::Xfail);
        assert_eq!(untouched.result, Outcome::Error);
        assert!(untouched.note.is_none());
    }

    #[test]
    fn forced_interpretation_appends_to_existing_note() {
        let result = TestResult::new("/t", Outcome::Error)
            .with_note("timeout")
            .interpret(ResultInterpret::Info);
        assert_eq!(result.result, Outcome::Info);
        assert_eq!(result.note.as_deref(), Some("timeout, original result: error"));
    }

    #[test]
    fn export_uses_single_path_for_one_log() {
        let single = TestResult::new("/t", Outcome::Pass).with_log("data/t/output.txt");
        let yaml = serde_yaml::to_string(&single.export()).expect("export should serialize");
        assert!(yaml.contains("log: data/t/output.txt"), "{}", yaml);

        let many = TestResult::new("/t", Outcome::Pass)
            .with_log("data/t/output.txt")
            .with_log("data/t/journal.txt");
        let value = serde_json::to_value(many.export()).expect("export should serialize");
        assert_eq!(value["log"].as_array().map(Vec::len), Some(2));
        assert!(value.get("note").is_none());
    }

    #[test]
    fn unknown_outcome_is_rejected() {
        assert!("skip".parse::<Outcome>().is_err());
        assert_eq!("warn".parse::<Outcome>().expect("warn"), Outcome::Warn);
    }
}
