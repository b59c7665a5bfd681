use testrig_core::Framework;

use crate::executor::EXECUTE_INTERNAL_METHOD;
use crate::plan::PhaseData;

/// Result of mapping a possibly deprecated execute method onto the
/// canonical one.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPhase {
    pub data: PhaseData,
    /// Framework used for tests that do not declare one.
    pub default_framework: Framework,
    pub warnings: Vec<String>,
}

fn legacy_framework(how: &str) -> Option<Framework> {
    match how {
        "shell" | "shell.tmt" => Some(Framework::Shell),
        "beakerlib" | "beakerlib.tmt" => Some(Framework::Beakerlib),
        _ => None,
    }
}

/// Map the old `shell`, `beakerlib`, `shell.tmt` and `beakerlib.tmt`
/// methods to the internal executor plus an implied default framework.
/// Any other method passes through untouched.
pub fn normalize_phase(data: &PhaseData) -> NormalizedPhase {
    let Some(framework) = legacy_framework(&data.how) else {
        return NormalizedPhase {
            data: data.clone(),
            default_framework: Framework::Shell,
            warnings: Vec::new(),
        };
    };
    let warnings = vec![
        format!("The '{}' execute method has been deprecated.", data.how),
        format!(
            "Use 'how: {}' in the execute step instead (L2).",
            EXECUTE_INTERNAL_METHOD
        ),
        format!("Set 'framework: {}' in test metadata (L1).", framework),
        "Support for old methods will be dropped in a future release.".to_string(),
    ];
    let mut normalized = data.clone();
    normalized.how = EXECUTE_INTERNAL_METHOD.to_string();
    NormalizedPhase {
        data: normalized,
        default_framework: framework,
        warnings,
    }
}
