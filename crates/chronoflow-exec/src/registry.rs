//! Everything an operation kind contributes: its spec constructor for the
//! planner plus how to run it.

use std::collections::BTreeMap;
use std::fmt;

use chronoflow_core::{Error, Result};
use chronoflow_planner::{ProcedureRegistry, ProcedureSpec, SpecConstructor};

use crate::context::{ExecutionContext, SourceContext};
use crate::dataset::Dataset;
use crate::source::Source;
use crate::transformation::Transformation;

pub type TransformationConstructor =
    fn(&dyn ProcedureSpec, Dataset, &ExecutionContext) -> Result<Box<dyn Transformation>>;

pub type SourceConstructor = fn(&dyn ProcedureSpec, SourceContext) -> Result<Box<dyn Source>>;

#[derive(Clone, Default)]
pub struct Registry {
    procedures: ProcedureRegistry,
    transformations: BTreeMap<&'static str, TransformationConstructor>,
    sources: BTreeMap<&'static str, SourceConstructor>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("procedures", &self.procedures)
            .field("transformations", &self.transformations.keys().collect::<Vec<_>>())
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn duplicate(what: &str, kind: &str) -> Error {
    Error::Internal(format!("duplicate {what} registration for {kind:?}"))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_procedure(&mut self, kind: &str, ctor: SpecConstructor) -> Result<()> {
        self.procedures.register(kind, ctor)
    }

    pub fn register_transformation(&mut self, kind: &'static str, ctor: TransformationConstructor) -> Result<()> {
        if self.transformations.insert(kind, ctor).is_some() {
            return Err(duplicate("transformation", kind));
        }
        Ok(())
    }

    pub fn register_source(&mut self, kind: &'static str, ctor: SourceConstructor) -> Result<()> {
        if self.sources.insert(kind, ctor).is_some() {
            return Err(duplicate("source", kind));
        }
        Ok(())
    }

    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.procedures
    }

    pub fn transformation(&self, kind: &str) -> Result<TransformationConstructor> {
        self.transformations
            .get(kind)
            .copied()
            .ok_or_else(|| Error::UnknownProcedure(format!("no transformation for {kind}")))
    }

    pub fn source(&self, kind: &str) -> Result<SourceConstructor> {
        self.sources
            .get(kind)
            .copied()
            .ok_or_else(|| Error::UnknownProcedure(format!("no source for {kind}")))
    }
}
