#![forbid(unsafe_code)]
//! chronoflow-operators: the builtin operation kinds.
//!
//! Each module owns one kind, or a family of them (`aggregates`,
//! `selectors`): the procedure spec the planner works with, its push-down
//! rule into `from`, and the source or transformation the executor builds
//! for it. [`register_builtins`] installs every kind into a
//! [`chronoflow_exec::Registry`].

pub mod aggregates;
pub mod filter;
pub mod from;
pub mod group;
pub mod join;
pub mod limit;
pub mod map;
pub mod range;
pub mod selectors;
pub mod sort;
pub mod window;

use std::sync::Arc;

use chronoflow_core::{Error, Result};
use chronoflow_exec::Registry;
use chronoflow_planner::ProcedureSpec;
use once_cell::sync::OnceCell;

pub use filter::FilterProcedureSpec;
pub use from::FromProcedureSpec;
pub use group::GroupProcedureSpec;
pub use join::JoinProcedureSpec;
pub use limit::LimitProcedureSpec;
pub use map::MapProcedureSpec;
pub use range::RangeProcedureSpec;
pub use sort::SortProcedureSpec;
pub use window::WindowProcedureSpec;

/// Registers every builtin kind. Fails if any kind is already present.
pub fn register_builtins(r: &mut Registry) -> Result<()> {
    from::register(r)?;
    range::register(r)?;
    filter::register(r)?;
    limit::register(r)?;
    group::register(r)?;
    window::register(r)?;
    join::register(r)?;
    map::register(r)?;
    sort::register(r)?;
    selectors::register(r)?;
    aggregates::register(r)?;
    Ok(())
}

static BUILTINS: OnceCell<Arc<Registry>> = OnceCell::new();

/// Process-wide registry holding the builtin kinds, built on first use.
pub fn registry() -> Result<Arc<Registry>> {
    BUILTINS
        .get_or_try_init(|| {
            let mut r = Registry::new();
            register_builtins(&mut r)?;
            Ok::<_, Error>(Arc::new(r))
        })
        .cloned()
}

pub(crate) fn downcast<T: ProcedureSpec>(spec: &dyn ProcedureSpec) -> Result<&T> {
    spec.downcast_ref::<T>()
        .ok_or_else(|| Error::Internal(format!("invalid spec type for {} procedure", spec.kind())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_registered_once() {
        let r = registry().expect("builtins");
        let kinds: Vec<&str> = r.procedures().kinds().collect();
        assert_eq!(
            kinds,
            [
                "count", "filter", "first", "from", "group", "join", "last", "limit", "map", "max",
                "mean", "min", "mode", "range", "sample", "skew", "sort", "spread", "sum", "window",
            ]
        );
        assert!(r.source("from").is_ok());
        assert!(r.transformation("range").is_err());
        assert!(r.transformation("join").is_ok());
        let mut again = Registry::new();
        register_builtins(&mut again).expect("fresh registry");
        assert_eq!(register_builtins(&mut again).unwrap_err().kind(), "internal");
    }
}
