use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Conditions raised by a guest backend.
#[derive(Debug, thiserror::Error)]
pub enum GuestError {
    /// The backend cannot honour a custom soft-reboot command.
    #[error("guest '{guest}' does not support soft reboot")]
    SoftRebootUnsupported { guest: String },
    #[error("failed to reboot guest using the custom command '{command}': {message}")]
    RebootCommandFailed { command: String, message: String },
    #[error("guest '{guest}' transport failure: {message}")]
    Transport { guest: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code of the command; `None` when it was killed by a signal.
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Permission bits applied to every destination.
    pub mode: Option<u32>,
}

impl PushOptions {
    pub fn executable() -> Self {
        Self {
            mode: Some(0o755),
        }
    }
}

/// A provisioned execution environment. Every call blocks until the
/// backend has finished.
pub trait Guest: Send + Sync {
    fn name(&self) -> &str;

    /// Whether commands run directly on the host, so helper scripts need
    /// not be pushed.
    fn is_local(&self) -> bool {
        false
    }

    /// Run `command` through a shell. A non-zero exit is reported in the
    /// output, not as an error; errors mean the guest could not be reached.
    fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, GuestError>;

    fn push(
        &self,
        source: &Path,
        destinations: &[&str],
        options: PushOptions,
    ) -> Result<(), GuestError>;

    /// Copy `source` from the guest back to the same path on the host.
    fn pull(&self, source: &Path) -> Result<(), GuestError>;

    fn reboot(
        &self,
        command: Option<&str>,
        hard: bool,
        timeout: Option<u64>,
    ) -> Result<(), GuestError>;
}
