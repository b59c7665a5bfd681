use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use testrig_core::{CommandOutput, Guest, GuestError, PushOptions};

static TEMP_SEQ: AtomicUsize = AtomicUsize::new(0);

pub struct TempDirGuard {
    pub path: PathBuf,
}

impl TempDirGuard {
    pub fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "{}_{}_{}_{}",
            prefix,
            std::process::id(),
            Utc::now().timestamp_micros(),
            TEMP_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        fs::create_dir_all(&path).expect("temp dir");
        Self { path }
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestCall {
    Execute {
        command: String,
        env: BTreeMap<String, String>,
    },
    Push {
        source: PathBuf,
        destinations: Vec<String>,
    },
    Pull(PathBuf),
    Reboot {
        command: Option<String>,
        hard: bool,
        timeout: Option<u64>,
    },
}

type ExecuteHook = Box<dyn Fn(&str, &BTreeMap<String, String>) -> CommandOutput + Send + Sync>;

/// Scripted guest recording every call it receives.
pub struct FakeGuest {
    name: String,
    local: bool,
    calls: Mutex<Vec<GuestCall>>,
    on_execute: Option<ExecuteHook>,
    reboot_responses: Mutex<VecDeque<Result<(), GuestError>>>,
}

impl FakeGuest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            local: false,
            calls: Mutex::new(Vec::new()),
            on_execute: None,
            reboot_responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn on_execute(
        mut self,
        hook: impl Fn(&str, &BTreeMap<String, String>) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        self.on_execute = Some(Box::new(hook));
        self
    }

    /// Queue the outcome of the next reboot call; unqueued calls succeed.
    pub fn push_reboot_response(&self, response: Result<(), GuestError>) {
        self.reboot_responses
            .lock()
            .expect("reboot responses")
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<GuestCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn reboots(&self) -> Vec<GuestCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, GuestCall::Reboot { .. }))
            .collect()
    }

    fn record(&self, call: GuestCall) {
        self.calls.lock().expect("calls").push(call);
    }
}

impl Guest for FakeGuest {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_local(&self) -> bool {
        self.local
    }

    fn execute(
        &self,
        command: &str,
        _cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput, GuestError> {
        self.record(GuestCall::Execute {
            command: command.to_string(),
            env: env.clone(),
        });
        Ok(match &self.on_execute {
            Some(hook) => hook(command, env),
            None => CommandOutput {
                returncode: Some(0),
                ..CommandOutput::default()
            },
        })
    }

    fn push(
        &self,
        source: &Path,
        destinations: &[&str],
        _options: PushOptions,
    ) -> Result<(), GuestError> {
        self.record(GuestCall::Push {
            source: source.to_path_buf(),
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
        });
        Ok(())
    }

    fn pull(&self, source: &Path) -> Result<(), GuestError> {
        self.record(GuestCall::Pull(source.to_path_buf()));
        Ok(())
    }

    fn reboot(
        &self,
        command: Option<&str>,
        hard: bool,
        timeout: Option<u64>,
    ) -> Result<(), GuestError> {
        self.record(GuestCall::Reboot {
            command: command.map(str::to_string),
            hard,
            timeout,
        });
        self.reboot_responses
            .lock()
            .expect("reboot responses")
            .pop_front()
            .unwrap_or(Ok(()))
    }
}
