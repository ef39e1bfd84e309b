//! `from`: the storage read every query starts with.
//!
//! The procedure spec doubles as the target of every push-down: `range`,
//! `filter`, `limit`, `group`, `first`/`last` and `sum`/`count` write their
//! parameters here, each guarded by its `*_set` flag so a second push-down
//! of the same kind is detected as a conflict.

use chronoflow_core::expression::Expression;
use chronoflow_core::{BoundsSpec, Duration, Error, Result};
use chronoflow_exec::{ReadWindow, Registry, Source, SourceContext, StorageSource};
use chronoflow_io::{AggregateType, Predicate, ReadSpec};
use chronoflow_planner::{decode_spec, ProcedureSpec};
use serde::{Deserialize, Serialize};

use crate::downcast;

pub const FROM_KIND: &str = "from";

/// Splits the read into fixed windows, each read separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromWindow {
    pub every: Duration,
    #[serde(default)]
    pub period: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FromProcedureSpec {
    pub database: String,
    pub hosts: Vec<String>,
    pub window: Option<FromWindow>,

    pub bounds_set: bool,
    pub bounds: BoundsSpec,

    pub filter_set: bool,
    pub filter: Option<Expression>,

    pub descending_set: bool,
    pub descending: bool,

    pub limit_set: bool,
    pub points_limit: i64,
    pub series_limit: i64,
    pub series_offset: i64,

    pub grouping_set: bool,
    /// Never set by a push-down yet; storage ignores it.
    pub order_by_time: bool,
    pub merge_all: bool,
    pub group_keys: Vec<String>,
    pub group_except: Vec<String>,
    pub group_keep: Vec<String>,

    pub aggregate_set: bool,
    pub aggregate_type: Option<AggregateType>,
}

impl ProcedureSpec for FromProcedureSpec {
    fn kind(&self) -> &'static str {
        FROM_KIND
    }

    fn time_bounds(&self) -> Option<BoundsSpec> {
        self.bounds_set.then_some(self.bounds)
    }
}

impl FromProcedureSpec {
    /// The storage request this spec describes, minus the time range.
    pub fn read_spec(&self) -> Result<ReadSpec> {
        let predicate = match (&self.filter, self.filter_set) {
            (Some(e), true) => Some(
                Predicate::from_expression(e)
                    .map_err(|err| Error::Internal(format!("pushed filter {e} has no storage form: {err}")))?,
            ),
            _ => None,
        };
        let mut spec = ReadSpec {
            database: self.database.clone(),
            hosts: self.hosts.clone(),
            predicate,
            ..ReadSpec::default()
        };
        if self.descending_set {
            spec.descending = self.descending;
        }
        if self.limit_set {
            spec.points_limit = self.points_limit;
            spec.series_limit = self.series_limit;
            spec.series_offset = self.series_offset;
        }
        if self.grouping_set {
            spec.order_by_time = self.order_by_time;
            spec.merge_all = self.merge_all;
            spec.group_keys = self.group_keys.clone();
            spec.group_except = self.group_except.clone();
        }
        if self.aggregate_set {
            spec.aggregate_type = self.aggregate_type;
        }
        Ok(spec)
    }

    fn read_window(&self) -> Option<ReadWindow> {
        self.window.map(|w| {
            let period = if w.period.is_zero() { w.every } else { w.period };
            ReadWindow { every: w.every, period }
        })
    }
}

fn create_spec(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    let spec: FromProcedureSpec = decode_spec(FROM_KIND, v)?;
    if spec.database.is_empty() {
        return Err(Error::InvalidSpec("from requires a database".into()));
    }
    if let Some(w) = spec.window {
        if w.every.nanos() <= 0 || w.period.nanos() < 0 {
            return Err(Error::InvalidSpec(format!("from: invalid read window every={} period={}", w.every, w.period)));
        }
    }
    Ok(Box::new(spec))
}

fn create_source(spec: &dyn ProcedureSpec, ctx: SourceContext) -> Result<Box<dyn Source>> {
    let s = downcast::<FromProcedureSpec>(spec)?;
    let bounds = if s.bounds_set { s.bounds.resolve(ctx.now) } else { ctx.bounds };
    let read = s.read_spec()?;
    Ok(Box::new(StorageSource::new(ctx, read, bounds, s.read_window())))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(FROM_KIND, create_spec)?;
    r.register_source(FROM_KIND, create_source)
}
