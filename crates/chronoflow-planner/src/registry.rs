//! Procedure kinds known to the planner.

use std::collections::BTreeMap;
use std::fmt;

use chronoflow_core::{Error, Result};

use crate::procedure::ProcedureSpec;

/// Builds a procedure spec from an operation's JSON parameters.
pub type SpecConstructor = fn(&serde_json::Value) -> Result<Box<dyn ProcedureSpec>>;

#[derive(Clone, Default)]
pub struct ProcedureRegistry {
    constructors: BTreeMap<String, SpecConstructor>,
}

impl fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a kind twice is a programming error.
    pub fn register(&mut self, kind: &str, ctor: SpecConstructor) -> Result<()> {
        if self.constructors.contains_key(kind) {
            return Err(Error::Internal(format!(
                "duplicate registration for procedure kind {kind:?}"
            )));
        }
        self.constructors.insert(kind.to_string(), ctor);
        Ok(())
    }

    pub fn create(&self, kind: &str, spec: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
        let ctor = self
            .constructors
            .get(kind)
            .ok_or_else(|| Error::UnknownProcedure(kind.to_string()))?;
        ctor(spec)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
