#![forbid(unsafe_code)]
//! chronoflow-planner: operation DAG → logical plan → physical plan.
//!
//! - `procedure` defines the spec trait every operation kind implements,
//!   including the optional push-down hooks.
//! - `registry` maps kind names to spec constructors.
//! - `logical` decodes the DAG into procedures.
//! - `physical` unions time bounds and folds push-downs into sources,
//!   duplicating sources shared by branches that need different reads.
//! - `dsl` loads DAGs from YAML or JSON query files.

pub mod dsl;
pub mod logical;
pub mod physical;
pub mod procedure;
pub mod registry;

pub use dsl::yaml::{parse_json_query, parse_yaml_query};
pub use logical::{plan_logical, LogicalPlan};
pub use physical::{plan_physical, PhysicalPlan};
pub use procedure::{decode_spec, Procedure, ProcedureSpec, PushDownOutcome, PushDownRule};
pub use registry::{ProcedureRegistry, SpecConstructor};
