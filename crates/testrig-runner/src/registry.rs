use anyhow::Result;
use std::collections::BTreeMap;

use crate::executor::{ExecuteInternal, EXECUTE_INTERNAL_METHOD};
use crate::phase::{Phase, PhaseInit, PhaseKind};
use crate::reboot::{RebootPhase, REBOOT_METHOD};
use crate::step::StepError;

pub type PhaseConstructor = fn(PhaseInit) -> Result<Box<dyn Phase>>;

#[derive(Clone, Copy)]
pub struct PhaseRegistration {
    pub kind: PhaseKind,
    pub construct: PhaseConstructor,
}

/// Method name to phase constructor. Entries are added explicitly; nothing
/// is discovered at runtime.
#[derive(Clone, Default)]
pub struct PhaseRegistry {
    entries: BTreeMap<&'static str, PhaseRegistration>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(
                EXECUTE_INTERNAL_METHOD,
                PhaseKind::Executor,
                ExecuteInternal::construct,
            )
            .register(REBOOT_METHOD, PhaseKind::Auxiliary, RebootPhase::construct);
        registry
    }

    pub fn register(
        &mut self,
        method: &'static str,
        kind: PhaseKind,
        construct: PhaseConstructor,
    ) -> &mut Self {
        self.entries
            .insert(method, PhaseRegistration { kind, construct });
        self
    }

    pub fn supported_methods(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn lookup(&self, method: &str) -> Result<PhaseRegistration> {
        self.entries.get(method).copied().ok_or_else(|| {
            StepError::UnsupportedMethod {
                method: method.to_string(),
                supported: self.supported_methods().join(", "),
            }
            .into()
        })
    }

    pub fn construct(&self, init: PhaseInit) -> Result<Box<dyn Phase>> {
        let entry = self.lookup(&init.data.how)?;
        (entry.construct)(init)
    }
}
