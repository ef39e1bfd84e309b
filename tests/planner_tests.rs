//! Planning with the builtin kinds: bounds, push-down into `from` and
//! source duplication.

use chronoflow_core::expression::{BinaryOp, Expression, LogicalOp};
use chronoflow_core::operation::OperationDag;
use chronoflow_core::time::{HOUR, SECOND};
use chronoflow_core::{Bounds, BoundsSpec, QueryTime, Result, Time};
use chronoflow_io::AggregateType;
use chronoflow_operators::{registry, FromProcedureSpec};
use chronoflow_planner::{plan_logical, plan_physical, PhysicalPlan, Procedure};
use serde_json::json;

const NOW: Time = Time(1_000 * HOUR.0);

fn plan(dag: &OperationDag) -> Result<PhysicalPlan> {
    let r = registry()?;
    let logical = plan_logical(dag, r.procedures(), Some(NOW))?;
    plan_physical(&logical)
}

fn from_spec(p: &Procedure) -> &FromProcedureSpec {
    p.spec.downcast_ref::<FromProcedureSpec>().expect("from spec")
}

fn sources(plan: &PhysicalPlan) -> Vec<&FromProcedureSpec> {
    plan.sources().map(from_spec).collect()
}

fn tag_eq(tag: &str, value: &str) -> Expression {
    Expression::binary(BinaryOp::Eq, Expression::reference(tag), Expression::string(value))
}

fn from() -> OperationDag {
    OperationDag::new().op("from", "from", json!({"database": "mydb"}))
}

#[test]
fn range_and_sum_fold_into_one_read() {
    let dag = from()
        .op("range", "range", json!({"start": "-170h"}))
        .op("sum", "sum", json!({}))
        .edge("from", "range")
        .edge("range", "sum");
    let plan = plan(&dag).expect("plan");

    assert_eq!(plan.procedures.len(), 1);
    let src = plan.sources().next().expect("source");
    assert_eq!(plan.results, [src.id]);
    assert_eq!(plan.name(&src.id), "from");

    let spec = from_spec(src);
    assert!(spec.bounds_set);
    assert_eq!(spec.bounds, BoundsSpec::new(QueryTime::Relative(HOUR.mul(-170)), QueryTime::NOW));
    assert!(spec.aggregate_set);
    assert_eq!(spec.aggregate_type, Some(AggregateType::Sum));
    assert!(!spec.limit_set && !spec.filter_set && !spec.grouping_set);

    assert_eq!(plan.resolved_bounds(), Bounds::new(NOW - HOUR.mul(170), NOW));
}

#[test]
fn first_and_last_each_get_their_own_read() {
    let dag = from()
        .op("first", "first", json!({}))
        .op("last", "last", json!({}))
        .edge("from", "first")
        .edge("from", "last");
    let plan = plan(&dag).expect("plan");

    assert_eq!(plan.of_kind("first").count(), 0);
    assert_eq!(plan.of_kind("last").count(), 0);
    let srcs = sources(&plan);
    assert_eq!(srcs.len(), 2);
    let mut descending: Vec<bool> = srcs.iter().map(|s| s.descending).collect();
    descending.sort();
    assert_eq!(descending, [false, true]);
    for s in &srcs {
        assert!(s.bounds_set && s.limit_set && s.descending_set);
        assert_eq!(s.points_limit, 1);
        assert_eq!(s.bounds, BoundsSpec::until_now());
    }

    assert_eq!(plan.results.len(), 2);
    let mut names: Vec<String> = plan.results.iter().map(|id| plan.name(id)).collect();
    names.sort();
    assert_eq!(names, ["from", "from.dup-1"]);
}

#[test]
fn sibling_filters_duplicate_the_read() {
    let dag = from()
        .op("fa", "filter", json!({"fn": tag_eq("host", "a")}))
        .op("fb", "filter", json!({"fn": tag_eq("host", "b")}))
        .edge("from", "fa")
        .edge("from", "fb");
    let plan = plan(&dag).expect("plan");
    assert_eq!(plan.of_kind("filter").count(), 0);
    let mut filters: Vec<String> = sources(&plan)
        .iter()
        .map(|s| {
            assert!(s.filter_set);
            s.filter.as_ref().map(|e| e.to_string()).unwrap_or_default()
        })
        .collect();
    filters.sort();
    assert_eq!(filters, [tag_eq("host", "a").to_string(), tag_eq("host", "b").to_string()]);
}

#[test]
fn filters_in_series_are_anded() {
    let dag = from()
        .op("f1", "filter", json!({"fn": tag_eq("host", "a")}))
        .op("f2", "filter", json!({"fn": tag_eq("region", "west")}))
        .edge("from", "f1")
        .edge("f1", "f2");
    let plan = plan(&dag).expect("plan");
    assert_eq!(plan.procedures.len(), 1);
    let src = sources(&plan)[0];
    assert_eq!(
        src.filter,
        Some(Expression::logical(LogicalOp::And, tag_eq("host", "a"), tag_eq("region", "west")))
    );
}

#[test]
fn sum_behind_map_stays_a_transformation() {
    let f = Expression::binary(BinaryOp::Mul, Expression::reference("$"), Expression::float(2.0));
    let dag = from()
        .op("range", "range", json!({"start": "-1h"}))
        .op("map", "map", json!({"fn": f}))
        .op("sum", "sum", json!({}))
        .edge("from", "range")
        .edge("range", "map")
        .edge("map", "sum");
    let plan = plan(&dag).expect("plan");
    assert_eq!(plan.of_kind("range").count(), 0);
    assert_eq!(plan.of_kind("sum").count(), 1);
    let src = sources(&plan)[0];
    assert!(src.bounds_set);
    assert!(!src.aggregate_set);
    let sum = plan.of_kind("sum").next().expect("sum");
    assert_eq!(plan.results, [sum.id]);
}

#[test]
fn grouped_reads_do_not_take_a_sum() {
    let dag = from()
        .op("group", "group", json!({"by": ["host"]}))
        .op("sum", "sum", json!({}))
        .edge("from", "group")
        .edge("group", "sum");
    let plan = plan(&dag).expect("plan");
    assert_eq!(plan.of_kind("group").count(), 0);
    assert_eq!(plan.of_kind("sum").count(), 1);
    let src = sources(&plan)[0];
    assert!(src.grouping_set);
    assert_eq!(src.group_keys, ["host"]);
    assert!(!src.aggregate_set);
}

#[test]
fn range_without_a_reachable_read_is_a_conflict() {
    let f = Expression::binary(BinaryOp::Mul, Expression::reference("$"), Expression::float(2.0));
    let dag = from()
        .op("map", "map", json!({"fn": f}))
        .op("range", "range", json!({"start": "-1h"}))
        .edge("from", "map")
        .edge("map", "range");
    assert_eq!(plan(&dag).expect_err("conflict").kind(), "push_down_conflict");
}

#[test]
fn bounds_are_the_union_of_every_range() {
    let dag = from()
        .op("r1", "range", json!({"start": "-2h", "stop": "-1h"}))
        .op("r2", "range", json!({"start": "-3h"}))
        .edge("from", "r1")
        .edge("from", "r2");
    let plan = plan(&dag).expect("plan");
    assert_eq!(plan.resolved_bounds(), Bounds::new(NOW - HOUR.mul(3), NOW));
    assert_eq!(sources(&plan).len(), 2);
}

#[test]
fn unbounded_plans_read_up_to_now() {
    let plan = plan(&from()).expect("plan");
    assert!(plan.bounds.is_empty());
    assert_eq!(plan.resolved_bounds(), Bounds::new(chronoflow_core::time::MIN_TIME, NOW));
}

#[test]
fn fingerprint_and_dot_are_stable() {
    let dag = from()
        .op("window", "window", json!({"every": "10s"}))
        .op("mean", "mean", json!({}))
        .edge("from", "window")
        .edge("window", "mean");
    let a = plan(&dag).expect("plan");
    let b = plan(&dag).expect("plan");
    assert_eq!(a.fingerprint(), b.fingerprint());
    let dot = a.to_dot(false);
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("window") && dot.contains("mean"));

    let other = from()
        .op("window", "window", json!({"every": "20s"}))
        .op("mean", "mean", json!({}))
        .edge("from", "window")
        .edge("window", "mean");
    let c = plan(&other).expect("plan");
    assert_ne!(a.fingerprint(), c.fingerprint());
}

#[test]
fn malformed_dags_are_rejected() {
    assert_eq!(plan(&OperationDag::new()).expect_err("empty").kind(), "invalid_spec");
    let cycle = from()
        .op("a", "sort", json!({}))
        .op("b", "sort", json!({}))
        .edge("from", "a")
        .edge("a", "b")
        .edge("b", "a");
    assert!(plan(&cycle).is_err());
    let bad = from().op("limit", "limit", json!({"n": -1})).edge("from", "limit");
    assert_eq!(plan(&bad).expect_err("negative").kind(), "invalid_spec");
    let unknown = from().op("x", "pivot", json!({})).edge("from", "x");
    assert_eq!(plan(&unknown).expect_err("unknown").kind(), "unknown_procedure");
}

#[test]
fn dag_now_is_used_when_none_is_given() {
    let mut dag = from().op("range", "range", json!({"start": "-1s"})).edge("from", "range");
    dag.now = Some(Time(42 * SECOND.0));
    let r = registry().expect("registry");
    let logical = plan_logical(&dag, r.procedures(), None).expect("logical");
    let plan = plan_physical(&logical).expect("physical");
    assert_eq!(plan.now, Time(42 * SECOND.0));
    assert_eq!(plan.resolved_bounds(), Bounds::new(Time(41 * SECOND.0), Time(42 * SECOND.0)));
}
