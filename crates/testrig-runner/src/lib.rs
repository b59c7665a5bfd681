pub mod executor;
pub mod extract;
pub mod framework;
pub mod legacy;
pub mod local;
pub mod phase;
pub mod plan;
pub mod reboot;
pub mod registry;
pub mod scripts;
pub mod step;

#[cfg(test)]
mod testing;

pub use executor::{ExecuteInternal, EXECUTE_INTERNAL_METHOD};
pub use extract::{ResultExtractor, ResultFileError};
pub use framework::{policy_for, FrameworkPolicy};
pub use legacy::{normalize_phase, NormalizedPhase};
pub use local::LocalGuest;
pub use phase::{Phase, PhaseContext, PhaseInit, PhaseKind};
pub use plan::{absolute_path, load_plan, parse_plan, PhaseData, Plan};
pub use reboot::{RebootPhase, RebootRequest, RebootState, REBOOT_METHOD};
pub use registry::PhaseRegistry;
pub use step::{ExecuteStep, StepError, StepStatus};
