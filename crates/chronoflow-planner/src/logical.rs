//! Operation DAG → logical plan.
//!
//! The logical plan is the operation graph with every operation replaced by
//! its decoded procedure spec and a procedure id derived from the operation
//! id. It is never mutated after construction; the physical planner copies
//! it and also consults it for ancestry and pristine specs.

use std::collections::{BTreeMap, BTreeSet};

use chronoflow_core::id::{OperationId, ProcedureId};
use chronoflow_core::operation::OperationDag;
use chronoflow_core::{Error, Result, Time};
use tracing::debug;

use crate::procedure::Procedure;
use crate::registry::ProcedureRegistry;

#[derive(Debug, Clone)]
pub struct LogicalPlan {
    pub now: Time,
    pub procedures: BTreeMap<ProcedureId, Procedure>,
    /// Topological order.
    pub order: Vec<ProcedureId>,
    /// Operation each procedure was built from.
    pub operations: BTreeMap<ProcedureId, OperationId>,
}

impl LogicalPlan {
    pub fn procedure(&self, id: &ProcedureId) -> Option<&Procedure> {
        self.procedures.get(id)
    }

    /// Procedures in topological order.
    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.order.iter().filter_map(|id| self.procedures.get(id))
    }

    /// Every transitive parent of `id`.
    pub fn ancestors(&self, id: &ProcedureId) -> BTreeSet<ProcedureId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<ProcedureId> = self
            .procedures
            .get(id)
            .map(|p| p.parents.clone())
            .unwrap_or_default();
        while let Some(p) = stack.pop() {
            if seen.insert(p) {
                if let Some(pr) = self.procedures.get(&p) {
                    stack.extend(pr.parents.iter().copied());
                }
            }
        }
        seen
    }
}

/// Build the logical plan for `dag`. `now` overrides the DAG's own *now*;
/// with neither set the wall clock is used.
pub fn plan_logical(
    dag: &OperationDag,
    registry: &ProcedureRegistry,
    now: Option<Time>,
) -> Result<LogicalPlan> {
    dag.validate()?;
    let order = dag.topological_order()?;
    let now = now.or(dag.now).unwrap_or_else(Time::now);

    let mut procedures = BTreeMap::new();
    let mut operations = BTreeMap::new();
    let mut ids = Vec::with_capacity(order.len());
    for op_id in &order {
        let op = dag
            .operation(op_id)
            .ok_or_else(|| Error::Internal(format!("operation {op_id} vanished")))?;
        let spec = registry.create(&op.kind, &op.spec)?;
        let id = ProcedureId::from_operation(op_id);
        procedures.insert(id, Procedure::new(id, spec));
        operations.insert(id, op_id.clone());
        ids.push(id);
    }

    for e in &dag.edges {
        let parent = ProcedureId::from_operation(&e.parent);
        let child = ProcedureId::from_operation(&e.child);
        if let Some(p) = procedures.get_mut(&parent) {
            p.children.push(child);
        }
        if let Some(c) = procedures.get_mut(&child) {
            c.parents.push(parent);
        }
    }

    debug!(procedures = ids.len(), now = %now, "logical plan built");
    Ok(LogicalPlan {
        now,
        procedures,
        order: ids,
        operations,
    })
}
