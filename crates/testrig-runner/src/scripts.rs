use anyhow::{anyhow, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use testrig_core::{ensure_dir, Guest, PushOptions, Script, SCRIPTS_DIR};
use tracing::debug;

/// Write the bundled source of `script` into `dir` (once) and return its path.
pub fn install_script(dir: &Path, script: &Script) -> Result<PathBuf> {
    let target = dir.join(script.source_name());
    if target.is_file() {
        return Ok(target);
    }
    let file = SCRIPTS_DIR
        .get_file(script.source_name())
        .ok_or_else(|| anyhow!("helper script '{}' is not bundled", script.source_name()))?;
    ensure_dir(dir)?;
    fs::write(&target, file.contents())?;
    fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
    Ok(target)
}

/// Install every script on the guest under its path and all its aliases.
pub fn push_scripts(guest: &dyn Guest, source_dir: &Path, scripts: &[Script]) -> Result<()> {
    for script in scripts {
        let source = install_script(source_dir, script)?;
        let destinations = script.destinations();
        debug!(guest = guest.name(), script = script.path, "pushing helper script");
        guest.push(&source, &destinations, PushOptions::executable())?;
    }
    Ok(())
}
