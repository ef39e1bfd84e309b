//! `range`: restricts the read to a time interval. Only exists in plans;
//! it must be pushed into a `from`.

use chronoflow_core::{BoundsSpec, QueryTime, Result};
use chronoflow_exec::Registry;
use chronoflow_planner::{decode_spec, ProcedureSpec, PushDownOutcome, PushDownRule};
use serde::{Deserialize, Serialize};

use crate::filter::FILTER_KIND;
use crate::from::{FromProcedureSpec, FROM_KIND};
use crate::group::GROUP_KIND;
use crate::limit::LIMIT_KIND;

pub const RANGE_KIND: &str = "range";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeProcedureSpec {
    pub start: QueryTime,
    #[serde(default)]
    pub stop: QueryTime,
}

impl RangeProcedureSpec {
    pub fn bounds(&self) -> BoundsSpec {
        BoundsSpec::new(self.start, self.stop)
    }
}

impl ProcedureSpec for RangeProcedureSpec {
    fn kind(&self) -> &'static str {
        RANGE_KIND
    }

    fn time_bounds(&self) -> Option<BoundsSpec> {
        Some(self.bounds())
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        Some(PushDownRule {
            root: FROM_KIND,
            through: &[GROUP_KIND, LIMIT_KIND, FILTER_KIND],
        })
    }

    fn push_down(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        let Some(from) = root.downcast_mut::<FromProcedureSpec>() else {
            return PushDownOutcome::Unsupported;
        };
        if from.bounds_set {
            return PushDownOutcome::Conflict;
        }
        from.bounds_set = true;
        from.bounds = self.bounds();
        PushDownOutcome::Applied
    }

    fn has_transformation(&self) -> bool {
        false
    }
}

fn create_spec(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    Ok(Box::new(decode_spec::<RangeProcedureSpec>(RANGE_KIND, v)?))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(RANGE_KIND, create_spec)
}
