use include_dir::{include_dir, Dir};

/// Guest-side helper scripts shipped with the runner.
pub static SCRIPTS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/scripts");

/// An injectable helper script: where it lives on the guest, the names it is
/// also reachable under, and the environment it relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Script {
    pub path: &'static str,
    pub aliases: &'static [&'static str],
    pub related_variables: &'static [&'static str],
}

impl Script {
    /// Name of the bundled source file in [`SCRIPTS_DIR`].
    pub fn source_name(&self) -> &'static str {
        self.path.rsplit('/').next().unwrap_or(self.path)
    }

    /// The primary path followed by every alias.
    pub fn destinations(&self) -> Vec<&'static str> {
        let mut out = Vec::with_capacity(self.aliases.len() + 1);
        out.push(self.path);
        out.extend_from_slice(self.aliases);
        out
    }
}

pub const TESTRIG_REPORT_RESULT_SCRIPT: Script = Script {
    path: "/usr/local/bin/rig-report-result",
    aliases: &[
        "/usr/local/bin/rstrnt-report-result",
        "/usr/local/bin/rhts-report-result",
    ],
    related_variables: &[],
};

pub const TESTRIG_FILE_SUBMIT_SCRIPT: Script = Script {
    path: "/usr/local/bin/rig-file-submit",
    aliases: &[
        "/usr/local/bin/rstrnt-report-log",
        "/usr/local/bin/rhts-submit-log",
        "/usr/local/bin/rhts_submit_log",
    ],
    related_variables: &[],
};

pub const TESTRIG_REBOOT_SCRIPT: Script = Script {
    path: "/usr/local/bin/rig-reboot",
    aliases: &[
        "/usr/local/bin/rstrnt-reboot",
        "/usr/local/bin/rhts-reboot",
    ],
    related_variables: &["TESTRIG_REBOOT_COUNT", "REBOOTCOUNT", "RSTRNT_REBOOTCOUNT"],
};

pub const SCRIPTS: &[Script] = &[
    TESTRIG_REPORT_RESULT_SCRIPT,
    TESTRIG_FILE_SUBMIT_SCRIPT,
    TESTRIG_REBOOT_SCRIPT,
];
