//! Procedure specs and the graph node that carries them.
//!
//! A procedure is an operation after its parameters were decoded by the
//! kind's registered constructor. Kinds that can be folded into a storage
//! read declare a [`PushDownRule`] and implement [`ProcedureSpec::push_down`].

use std::any::Any;
use std::fmt;

use chronoflow_core::id::ProcedureId;
use chronoflow_core::{BoundsSpec, Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Where a push-down may land and which kinds it may cross on the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushDownRule {
    pub root: &'static str,
    pub through: &'static [&'static str],
}

impl PushDownRule {
    pub fn passes(&self, kind: &str) -> bool {
        self.through.contains(&kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDownOutcome {
    Applied,
    /// The root already has the field this push-down would write.
    Conflict,
    /// The root cannot express this procedure at all.
    Unsupported,
}

/// Object-safe plumbing every spec gets for free from `Clone + Serialize`.
pub trait SpecBase {
    fn copy(&self) -> Box<dyn ProcedureSpec>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn to_json(&self) -> serde_json::Value;
}

impl<T> SpecBase for T
where
    T: ProcedureSpec + Clone + Serialize,
{
    fn copy(&self) -> Box<dyn ProcedureSpec> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

pub trait ProcedureSpec: SpecBase + fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    /// Time range this procedure needs from storage, if any.
    fn time_bounds(&self) -> Option<BoundsSpec> {
        None
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        None
    }

    /// Whether `root` may accept this push-down at all.
    fn match_root(&self, _root: &dyn ProcedureSpec) -> bool {
        true
    }

    /// Write this procedure into `root`. Must leave `root` untouched unless
    /// the outcome is `Applied`.
    fn push_down(&self, _root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        PushDownOutcome::Unsupported
    }

    /// Merge into a root that already carries a push-down of the same
    /// kind from an upstream procedure.
    fn combine(&self, _root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        PushDownOutcome::Conflict
    }

    /// False for kinds that only exist to be pushed into a source.
    fn has_transformation(&self) -> bool {
        true
    }

    /// Called when the planner rewires a parent edge from `old` to `new`.
    fn parent_changed(&mut self, _old: ProcedureId, _new: ProcedureId) {}
}

impl dyn ProcedureSpec {
    pub fn downcast_ref<T: ProcedureSpec>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: ProcedureSpec>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

impl Clone for Box<dyn ProcedureSpec> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Decode an operation's JSON parameters, mapping rejection to `InvalidSpec`.
pub fn decode_spec<T: DeserializeOwned>(kind: &str, spec: &serde_json::Value) -> Result<T> {
    let v = if spec.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        spec.clone()
    };
    serde_json::from_value(v).map_err(|e| Error::InvalidSpec(format!("{kind}: {e}")))
}

/// A node of the logical or physical plan. Edges are stored on both ends
/// as identifier lists.
#[derive(Debug, Clone)]
pub struct Procedure {
    pub id: ProcedureId,
    pub spec: Box<dyn ProcedureSpec>,
    pub parents: Vec<ProcedureId>,
    pub children: Vec<ProcedureId>,
}

impl Procedure {
    pub fn new(id: ProcedureId, spec: Box<dyn ProcedureSpec>) -> Self {
        Self {
            id,
            spec,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.spec.kind()
    }

    pub fn is_source(&self) -> bool {
        self.parents.is_empty()
    }
}

pub(crate) fn remove_id(ids: &mut Vec<ProcedureId>, id: ProcedureId) {
    ids.retain(|x| *x != id);
}
