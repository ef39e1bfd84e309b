//! The operation DAG handed to the planner.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::OperationId;
use crate::time::Time;

/// One node of the input DAG. `spec` is interpreted by the kind's registered
/// constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub parent: OperationId,
    pub child: OperationId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationDag {
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Fixed *now* for relative times; wall clock when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now: Option<Time>,
}

impl OperationDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper used by tests and embedders.
    pub fn op(mut self, id: &str, kind: &str, spec: serde_json::Value) -> Self {
        self.operations.push(Operation {
            id: OperationId::new(id),
            kind: kind.to_string(),
            spec,
        });
        self
    }

    pub fn edge(mut self, parent: &str, child: &str) -> Self {
        self.edges.push(Edge {
            parent: OperationId::new(parent),
            child: OperationId::new(child),
        });
        self
    }

    pub fn operation(&self, id: &OperationId) -> Option<&Operation> {
        self.operations.iter().find(|o| &o.id == id)
    }

    pub fn parents(&self, id: &OperationId) -> Vec<OperationId> {
        self.edges
            .iter()
            .filter(|e| &e.child == id)
            .map(|e| e.parent.clone())
            .collect()
    }

    pub fn children(&self, id: &OperationId) -> Vec<OperationId> {
        self.edges
            .iter()
            .filter(|e| &e.parent == id)
            .map(|e| e.child.clone())
            .collect()
    }

    /// Rejects duplicate ids, dangling edges and cycles.
    pub fn validate(&self) -> Result<()> {
        if self.operations.is_empty() {
            return Err(Error::InvalidSpec("query has no operations".into()));
        }
        let mut seen = HashSet::new();
        for op in &self.operations {
            if op.id.as_str().is_empty() {
                return Err(Error::InvalidSpec("operation id must not be empty".into()));
            }
            if !seen.insert(&op.id) {
                return Err(Error::InvalidSpec(format!("duplicate operation id {:?}", op.id.as_str())));
            }
        }
        for e in &self.edges {
            for end in [&e.parent, &e.child] {
                if !seen.contains(end) {
                    return Err(Error::InvalidSpec(format!(
                        "edge references unknown operation {:?}",
                        end.as_str()
                    )));
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm; ready nodes are taken in declaration order.
    pub fn topological_order(&self) -> Result<Vec<OperationId>> {
        let pos: HashMap<&OperationId, usize> = self
            .operations
            .iter()
            .enumerate()
            .map(|(i, o)| (&o.id, i))
            .collect();
        let n = self.operations.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for e in &self.edges {
            let (Some(&p), Some(&c)) = (pos.get(&e.parent), pos.get(&e.child)) else {
                return Err(Error::InvalidSpec(format!(
                    "edge {} -> {} references unknown operation",
                    e.parent, e.child
                )));
            };
            in_degree[c] += 1;
            dependents[p].push(c);
        }

        let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = pop_lowest(&mut ready) {
            order.push(self.operations[i].id.clone());
            for &c in &dependents[i] {
                in_degree[c] -= 1;
                if in_degree[c] == 0 {
                    ready.push_back(c);
                }
            }
        }
        if order.len() != n {
            return Err(Error::InvalidSpec("found cycle in query".into()));
        }
        Ok(order)
    }
}

fn pop_lowest(ready: &mut VecDeque<usize>) -> Option<usize> {
    let (at, _) = ready.iter().enumerate().min_by_key(|(_, i)| **i)?;
    ready.remove(at)
}
