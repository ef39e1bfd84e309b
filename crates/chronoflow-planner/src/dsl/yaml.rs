//! YAML / JSON query files → `OperationDag`.
//!
//! Either spell the graph out:
//! ```yaml
//! operations:
//!   - { id: from0, kind: from, spec: { database: mydb } }
//!   - { id: range1, kind: range, spec: { start: "-1h" } }
//!   - { id: sum2, kind: sum }
//! edges:
//!   - { parent: from0, child: range1 }
//!   - { parent: range1, child: sum2 }
//! ```
//! or, for a linear query, list `steps` and let each feed the next:
//! ```yaml
//! config: { worker_threads: 2 }
//! steps:
//!   - { kind: from, spec: { database: mydb } }
//!   - { kind: range, spec: { start: "-1h" } }
//!   - { kind: sum }
//! ```

use chronoflow_core::id::OperationId;
use chronoflow_core::operation::{Edge, Operation, OperationDag};
use chronoflow_core::{EngineConfig, Error, Result, Time};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFile {
    pub config: Option<EngineConfig>,
    pub now: Option<Time>,
    pub operations: Vec<Operation>,
    pub edges: Vec<Edge>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Defaults to `{kind}{index}`.
    #[serde(default)]
    pub id: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub dag: OperationDag,
    pub config: EngineConfig,
}

pub fn parse_yaml_query(src: &str) -> Result<ParsedQuery> {
    let doc: QueryFile =
        serde_yaml::from_str(src).map_err(|e| Error::ParseError(format!("yaml: {e}")))?;
    doc.into_query()
}

pub fn parse_json_query(src: &str) -> Result<ParsedQuery> {
    let doc: QueryFile = serde_json::from_str(src)?;
    doc.into_query()
}

impl QueryFile {
    pub fn into_query(self) -> Result<ParsedQuery> {
        let mut dag = OperationDag {
            operations: self.operations,
            edges: self.edges,
            now: self.now,
        };
        if !self.steps.is_empty() {
            if !dag.operations.is_empty() {
                return Err(Error::InvalidSpec(
                    "a query file has either operations or steps, not both".into(),
                ));
            }
            let mut prev: Option<OperationId> = None;
            for (i, step) in self.steps.into_iter().enumerate() {
                let id = OperationId::new(step.id.unwrap_or_else(|| format!("{}{i}", step.kind)));
                if let Some(p) = prev.take() {
                    dag.edges.push(Edge {
                        parent: p,
                        child: id.clone(),
                    });
                }
                dag.operations.push(Operation {
                    id: id.clone(),
                    kind: step.kind,
                    spec: step.spec,
                });
                prev = Some(id);
            }
        }
        if dag.operations.is_empty() {
            return Err(Error::InvalidSpec("empty query".into()));
        }
        dag.validate()?;
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(ParsedQuery { dag, config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_steps_are_chained() {
        let q = parse_yaml_query(
            r#"
config: { worker_threads: 2 }
now: 1000
steps:
  - { kind: from, spec: { database: mydb } }
  - { kind: range, spec: { start: "-1h" } }
  - { id: total, kind: sum }
"#,
        )
        .expect("parse");
        assert_eq!(q.config.worker_threads, 2);
        assert_eq!(q.dag.now, Some(Time(1000)));
        let ids: Vec<_> = q.dag.operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["from0", "range1", "total"]);
        assert_eq!(q.dag.edges.len(), 2);
        assert_eq!(q.dag.edges[1].child.as_str(), "total");
        assert_eq!(q.dag.operations[0].spec["database"], "mydb");
    }

    #[test]
    fn explicit_graph_from_json() {
        let q = parse_json_query(
            r#"{
  "operations": [
    {"id": "a", "kind": "from", "spec": {"database": "db"}},
    {"id": "b", "kind": "first"},
    {"id": "c", "kind": "last"}
  ],
  "edges": [{"parent": "a", "child": "b"}, {"parent": "a", "child": "c"}]
}"#,
        )
        .expect("parse");
        assert_eq!(q.dag.children(&"a".into()).len(), 2);
    }

    #[test]
    fn rejects_bad_files() {
        assert_eq!(parse_yaml_query("steps: [").unwrap_err().kind(), "parse_error");
        assert_eq!(parse_yaml_query("steps: []").unwrap_err().kind(), "invalid_spec");
        let both = "operations: [{id: a, kind: from}]\nsteps: [{kind: sum}]";
        assert_eq!(parse_yaml_query(both).unwrap_err().kind(), "invalid_spec");
        let cyclic = r#"
operations: [{id: a, kind: map}, {id: b, kind: map}]
edges: [{parent: a, child: b}, {parent: b, child: a}]
"#;
        assert_eq!(parse_yaml_query(cyclic).unwrap_err().kind(), "invalid_spec");
    }
}
