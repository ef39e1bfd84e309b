#![forbid(unsafe_code)]
//! chronoflow-core: shared vocabulary of the query engine.
//!
//! Time and bounds, tag sets, column types, identifiers, the operation DAG
//! and expression tree the planner consumes, and configuration.
//! Also the caller-facing error. No threads or I/O here.

pub mod bounds;
pub mod config;
pub mod error;
pub mod expression;
pub mod hash;
pub mod id;
pub mod operation;
pub mod tags;
pub mod time;
pub mod types;

pub use bounds::{Bounds, BoundsSpec};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use tags::{Tags, TagsKey};
pub use time::{Duration, QueryTime, Time};
pub use types::{ColKind, ColMeta, DataType, Value, TIME_COL, VALUE_COL};
