use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use testrig_core::{CommandOutput, Guest, GuestError, PushOptions, PROCESS_TIMEOUT};
use tracing::{debug, warn};

/// Guest backed by the host itself.
#[derive(Debug, Clone)]
pub struct LocalGuest {
    name: String,
}

impl LocalGuest {
    pub fn new() -> Self {
        Self::named("localhost")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LocalGuest {
    fn default() -> Self {
        Self::new()
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<Option<i32>> {
    // A budget too large to represent is no deadline at all.
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.code());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            // Kill the whole group so grandchildren release the pipes.
            let _ = Command::new("kill")
                .arg("-KILL")
                .arg(format!("-{}", child.id()))
                .status();
            let _ = child.kill();
            let _ = child.wait();
            return Ok(Some(PROCESS_TIMEOUT));
        }
        thread::sleep(Duration::from_millis(25));
    }
}

impl Guest for LocalGuest {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_local(&self) -> bool {
        true
    }

    fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, GuestError> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        if let Some(dir) = cwd.filter(|d| d.is_dir()) {
            cmd.current_dir(dir);
        }
        cmd.envs(env);
        cmd.process_group(0);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!(guest = %self.name, command, "executing");
        let mut child = cmd.spawn().map_err(|err| GuestError::Transport {
            guest: self.name.clone(),
            message: format!("failed to spawn bash: {}", err),
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let returncode = wait_with_deadline(&mut child, timeout)?;
        if returncode == Some(PROCESS_TIMEOUT) {
            warn!(guest = %self.name, command, "command exceeded its time budget");
        }

        Ok(CommandOutput {
            returncode,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }

    fn push(
        &self,
        source: &Path,
        destinations: &[&str],
        options: PushOptions,
    ) -> Result<(), GuestError> {
        for destination in destinations {
            let target = Path::new(destination);
            if target == source {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source, target)?;
            if let Some(mode) = options.mode {
                fs::set_permissions(target, fs::Permissions::from_mode(mode))?;
            }
        }
        Ok(())
    }

    fn pull(&self, _source: &Path) -> Result<(), GuestError> {
        Ok(())
    }

    fn reboot(
        &self,
        _command: Option<&str>,
        hard: bool,
        _timeout: Option<u64>,
    ) -> Result<(), GuestError> {
        if !hard {
            return Err(GuestError::SoftRebootUnsupported {
                guest: self.name.clone(),
            });
        }
        Err(GuestError::Transport {
            guest: self.name.clone(),
            message: "refusing to hard reboot the host".to_string(),
        })
    }
}
