//! Host side of the mid-suite reboot protocol.
//!
//! A test that needs a reboot runs the `rig-reboot` helper, which writes a
//! small JSON request into the plan data directory. After running its
//! trigger action the phase pulls that directory back, and if a request is
//! present it consumes it (the file is deleted before anything else sees
//! the new count) and reboots the guest.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use testrig_core::{Guest, GuestError, TESTRIG_ENV_REBOOT_REQUEST, TESTRIG_REBOOT_SCRIPT};
use tracing::{debug, error, info, warn};

use crate::phase::{Phase, PhaseContext, PhaseInit, PhaseKind};
use crate::plan::PhaseData;
use crate::scripts::push_scripts;

pub const REBOOT_METHOD: &str = "reboot";

/// Reboot counter of the current run. Starts at zero for every fresh run
/// and is never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebootState {
    count: u32,
}

impl RebootState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    fn advance(&mut self) -> u32 {
        self.count += 1;
        self.count
    }

    /// Export the request path and the counter under every variable the
    /// guest-side helpers read.
    pub fn publish(&self, env: &mut BTreeMap<String, String>, request_path: &Path) {
        env.insert(
            TESTRIG_ENV_REBOOT_REQUEST.to_string(),
            request_path.to_string_lossy().to_string(),
        );
        for variable in TESTRIG_REBOOT_SCRIPT.related_variables {
            env.insert(variable.to_string(), self.count.to_string());
        }
    }
}

/// A reboot requested from inside the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebootRequest {
    pub command: Option<String>,
    /// Seconds to wait for the guest; `None` leaves it to the backend.
    pub timeout: Option<u64>,
}

impl RebootRequest {
    /// Parse the request document. Missing, empty or ill-formed fields
    /// all fall back to the backend defaults.
    pub fn parse(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "malformed reboot request, using defaults");
                return Self::default();
            }
        };
        let command = value
            .get("command")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let timeout = match value.get("timeout") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        Self { command, timeout }
    }
}

pub fn reboot_requested(request_path: &Path) -> bool {
    request_path.is_file()
}

/// Take the pending request, if any. The file is removed before the counter
/// advances, so a request is never acted on twice.
pub fn consume_reboot_request(
    request_path: &Path,
    state: &mut RebootState,
) -> Result<Option<RebootRequest>> {
    if !reboot_requested(request_path) {
        return Ok(None);
    }
    let raw = fs::read_to_string(request_path)?;
    let request = RebootRequest::parse(&raw);
    fs::remove_file(request_path)?;
    let count = state.advance();
    debug!(count, ?request, "reboot request consumed");
    Ok(Some(request))
}

/// Soft reboot with the requested command, falling back once to a hard
/// reboot when the backend cannot run custom commands.
pub fn reboot_guest(guest: &dyn Guest, request: &RebootRequest) -> Result<()> {
    match guest.reboot(request.command.as_deref(), false, request.timeout) {
        Ok(()) => Ok(()),
        Err(GuestError::SoftRebootUnsupported { .. }) => {
            warn!(
                guest = guest.name(),
                "Guest does not support soft reboot, trying hard reboot."
            );
            guest.reboot(None, true, request.timeout)?;
            Ok(())
        }
        Err(err @ GuestError::RebootCommandFailed { .. }) => {
            error!(
                guest = guest.name(),
                command = request.command.as_deref().unwrap_or("default"),
                "Failed to reboot guest using the custom command."
            );
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

pub struct RebootPhase {
    data: PhaseData,
    script: String,
}

impl RebootPhase {
    pub fn construct(init: PhaseInit) -> Result<Box<dyn Phase>> {
        let script = init
            .data
            .script
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("reboot phase requires a 'script' to run"))?;
        Ok(Box::new(Self {
            data: init.data,
            script,
        }))
    }
}

impl Phase for RebootPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Auxiliary
    }

    fn data(&self) -> &PhaseData {
        &self.data
    }

    fn go(&mut self, guest: &dyn Guest, ctx: &mut PhaseContext) -> Result<()> {
        if !guest.is_local() {
            push_scripts(guest, &ctx.paths.scripts_dir, &[TESTRIG_REBOOT_SCRIPT])?;
        }

        ctx.reboot.publish(&mut ctx.environment, &ctx.paths.reboot_request);

        match guest.execute(&self.script, Some(&ctx.worktree), &ctx.environment, None) {
            Ok(output) => {
                debug!(guest = guest.name(), returncode = ?output.returncode, "reboot script executed")
            }
            Err(err) => {
                warn!(guest = guest.name(), error = %err, "reboot script failed")
            }
        }
        guest.pull(&ctx.paths.data_directory)?;

        debug!(path = %ctx.paths.reboot_request.display(), "checking for reboot request");
        let Some(request) = consume_reboot_request(&ctx.paths.reboot_request, &mut ctx.reboot)?
        else {
            return Ok(());
        };
        info!(
            guest = guest.name(),
            count = ctx.reboot.count(),
            "reboot in progress"
        );
        reboot_guest(guest, &request)
    }

    fn describe(&self) -> Vec<(&'static str, String)> {
        let mut lines = vec![
            ("how", self.data.how.clone()),
            ("order", self.data.order.to_string()),
            ("script", self.script.clone()),
        ];
        if let Some(name) = &self.data.name {
            lines.push(("name", name.clone()));
        }
        lines
    }
}
