//! End-to-end queries: operation DAG → plan → executor → result blocks,
//! reading from the in-memory storage.


use chronoflow_core::expression::{BinaryOp, Expression};
use chronoflow_core::operation::OperationDag;
use chronoflow_core::time::SECOND;
use chronoflow_core::{EngineConfig, Value};
use chronoflow_io::{MemoryStorage, Points};
use serde_json::json;
use test_data_gen::*;

fn from() -> OperationDag {
    OperationDag::new().op("from", "from", json!({"database": "telegraf"}))
}

#[test]
fn range_and_sum_read_one_value_per_series() {
    let dag = from()
        .op("range", "range", json!({"start": "-170h"}))
        .op("sum", "sum", json!({}))
        .edge("from", "range")
        .edge("range", "sum");
    let storage = telegraf();
    let results = run(dag, storage.clone()).expect("query");
    assert_eq!(names(&results), ["from"], "sum runs inside the read");
    let hosts = by_host(&single(results));
    assert_eq!(hosts["a"], [(NOW.0, Value::Float(55.0))]);
    assert_eq!(hosts["b"], [(NOW.0, Value::Float(550.0))]);
    assert_eq!(storage.reads(), 1);
}

#[test]
fn count_is_an_integer() {
    let dag = from().op("count", "count", json!({})).edge("from", "count");
    let hosts = by_host(&single(run(dag, telegraf()).expect("query")));
    assert_eq!(values(&hosts["a"]), [Value::Int(10)]);
    assert_eq!(values(&hosts["b"]), [Value::Int(10)]);
}

#[test]
fn tag_filter_runs_in_storage() {
    let pred = Expression::binary(BinaryOp::Eq, Expression::reference("host"), Expression::string("a"));
    let dag = from().op("filter", "filter", json!({"fn": pred})).edge("from", "filter");
    let results = run(dag, telegraf()).expect("query");
    assert_eq!(names(&results), ["from"]);
    let hosts = by_host(&single(results));
    assert_eq!(hosts.keys().collect::<Vec<_>>(), ["a"]);
    assert_eq!(hosts["a"].len(), 10);
}

#[test]
fn arithmetic_filter_runs_as_a_transformation() {
    let doubled = Expression::binary(BinaryOp::Mul, Expression::reference("_value"), Expression::float(2.0));
    let pred = Expression::binary(BinaryOp::Gt, doubled, Expression::float(10.0));
    let dag = from().op("filter", "filter", json!({"fn": pred})).edge("from", "filter");
    let results = run(dag, telegraf()).expect("query");
    assert_eq!(names(&results), ["filter"]);
    let hosts = by_host(&single(results));
    assert_eq!(floats(&hosts["a"]), [6.0, 7.0, 8.0, 9.0, 10.0]);
    assert_eq!(hosts["b"].len(), 10);
}

#[test]
fn window_partitions_each_series() {
    let dag = from().op("window", "window", json!({"every": "5s"})).edge("from", "window");
    let blocks = single(run(dag, telegraf()).expect("query"));
    assert_eq!(blocks.len(), 6);
    let mut a: Vec<(i64, usize)> = blocks
        .iter()
        .filter(|b| b.tags().get("host") == Some("a"))
        .map(|b| (b.bounds().start.0, b.nrows()))
        .collect();
    a.sort();
    assert_eq!(a, [(0, 4), (5 * SECOND.0, 5), (10 * SECOND.0, 1)]);
}

#[test]
fn group_merges_series_in_storage() {
    let dag = from().op("group", "group", json!({"by": ["region"]})).edge("from", "group");
    let results = run(dag, telegraf()).expect("query");
    assert_eq!(names(&results), ["from"]);
    let blocks = single(results);
    assert_eq!(blocks.len(), 1);
    let b = &blocks[0];
    assert_eq!(b.tags().get("region"), Some("west"));
    assert_eq!(b.tags().get("host"), None);
    assert_eq!(b.nrows(), 20);
    let times = b.times(b.time_idx().expect("time")).expect("times");
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn limit_keeps_the_first_rows_of_each_series() {
    let dag = from().op("limit", "limit", json!({"n": 2})).edge("from", "limit");
    let hosts = by_host(&single(run(dag, telegraf()).expect("query")));
    assert_eq!(floats(&hosts["a"]), [1.0, 2.0]);
    assert_eq!(floats(&hosts["b"]), [10.0, 20.0]);
}

#[test]
fn limit_offset_is_applied_after_the_read() {
    let dag = from()
        .op("limit", "limit", json!({"n": 2, "offset": 3}))
        .edge("from", "limit");
    let results = run(dag, telegraf()).expect("query");
    assert_eq!(names(&results), ["limit"]);
    let hosts = by_host(&single(results));
    assert_eq!(hosts["a"], [(4 * SECOND.0, Value::Float(4.0)), (5 * SECOND.0, Value::Float(5.0))]);
}

#[test]
fn first_and_last_read_single_points() {
    let dag = from()
        .op("first", "first", json!({}))
        .op("last", "last", json!({}))
        .edge("from", "first")
        .edge("from", "last");
    let storage = telegraf();
    let results = run(dag, storage.clone()).expect("query");
    assert_eq!(results.len(), 2);
    let mut seen: Vec<Vec<(i64, Value)>> = results
        .iter()
        .map(|(_, blocks)| by_host(blocks).remove("a").unwrap_or_default())
        .collect();
    seen.sort_by_key(|r| r.first().map(|(t, _)| *t));
    assert_eq!(
        seen,
        [
            vec![(SECOND.0, Value::Float(1.0))],
            vec![(10 * SECOND.0, Value::Float(10.0))],
        ]
    );
    assert_eq!(storage.reads(), 2, "each branch reads separately");
}

#[test]
fn join_combines_two_reads_on_tags() {
    let storage = MemoryStorage::new();
    storage.insert("cpu", tags(&[("host", "a")]), float_series(5, 1.0));
    storage.insert("mem", tags(&[("host", "a")]), float_series(5, 100.0));
    storage.insert("mem", tags(&[("host", "z")]), float_series(5, 100.0));
    let sum = Expression::binary(BinaryOp::Add, Expression::member("l", "_value"), Expression::member("r", "_value"));
    let dag = OperationDag::new()
        .op("cpu", "from", json!({"database": "cpu"}))
        .op("mem", "from", json!({"database": "mem"}))
        .op("join", "join", json!({"on": ["host"], "fn": sum, "tables": {"l": "cpu", "r": "mem"}}))
        .edge("cpu", "join")
        .edge("mem", "join");
    let results = run(dag, storage).expect("query");
    assert_eq!(names(&results), ["join"]);
    let hosts = by_host(&single(results));
    assert_eq!(hosts.keys().collect::<Vec<_>>(), ["a"]);
    assert_eq!(floats(&hosts["a"]), [101.0, 202.0, 303.0, 404.0, 505.0]);
}

#[test]
fn map_rewrites_values() {
    let f = Expression::binary(BinaryOp::Mul, Expression::reference("$"), Expression::float(10.0));
    let dag = from().op("map", "map", json!({"fn": f})).edge("from", "map");
    let hosts = by_host(&single(run(dag, telegraf()).expect("query")));
    assert_eq!(floats(&hosts["a"])[..3], [10.0, 20.0, 30.0]);
    assert_eq!(hosts["b"].len(), 10);
}

#[test]
fn sort_orders_a_merged_series() {
    let dag = from()
        .op("group", "group", json!({"by": []}))
        .op("sort", "sort", json!({"desc": true}))
        .edge("from", "group")
        .edge("group", "sort");
    let blocks = single(run(dag, telegraf()).expect("query"));
    assert_eq!(blocks.len(), 1);
    let got = floats(&chronoflow_exec::testing::rows(&blocks[0]).expect("rows"));
    assert_eq!(got.len(), 20);
    assert_eq!(got[..3], [100.0, 90.0, 80.0]);
    assert_eq!(got.last(), Some(&1.0));
}

#[test]
fn storage_failure_fails_the_query() {
    let storage = telegraf();
    storage.fail_after_frames(Some(1));
    let dag = from().op("map", "map", json!({"fn": Expression::reference("$")})).edge("from", "map");
    let err = run(dag, storage).expect_err("read fails");
    assert_eq!(err.kind(), "storage_read");
}

#[test]
fn unknown_database_is_a_storage_error() {
    let dag = OperationDag::new().op("from", "from", json!({"database": "nope"}));
    assert_eq!(run(dag, telegraf()).expect_err("no such db").kind(), "storage_read");
}

#[test]
fn cancel_stops_a_running_query() {
    let storage = MemoryStorage::new().with_frame_size(1);
    for i in 0..2000 {
        storage.insert("big", tags(&[("host", &format!("h{i}"))]), float_series(50, 1.0));
    }
    let mut dag = OperationDag::new()
        .op("from", "from", json!({"database": "big"}))
        .op("window", "window", json!({"every": "1s"}))
        .edge("from", "window");
    dag.now = Some(NOW);
    let ex = executor(storage, config()).expect("executor");
    let query = ex.query(&dag).expect("query");
    query.cancel();
    assert!(query.cancel_token().is_canceled());
    assert_eq!(query.collect().expect_err("canceled").kind(), "canceled");
}

#[test]
fn dropping_a_query_mid_stream_cancels_it() {
    let storage = MemoryStorage::new().with_frame_size(1);
    for i in 0..500 {
        storage.insert("big", tags(&[("host", &format!("h{i}"))]), float_series(50, 1.0));
    }
    let mut dag = OperationDag::new().op("from", "from", json!({"database": "big"}));
    dag.now = Some(NOW);
    // The source blocks on the full result queue until the reader catches up.
    let config = EngineConfig {
        queue_capacity: 4,
        ..config()
    };
    let ex = executor(storage, config).expect("executor");
    let mut query = ex.query(&dag).expect("query");
    let (_, mut stream) = query.results().pop().expect("one result");
    assert!(stream.next().expect("first block").is_ok());

    drop(query);
    let err = stream.find_map(|r| r.err()).expect("stream ends in an error");
    assert_eq!(err.kind(), "canceled");
    drop(stream);
    assert!(eventually(|| ex.allocator().reserved() == 0), "{} bytes still held", ex.allocator().reserved());
}

#[test]
fn planning_errors_never_start_a_query() {
    let storage = telegraf();
    let unknown = from().op("x", "nope", json!({})).edge("from", "x");
    assert_eq!(run(unknown, storage.clone()).expect_err("unknown").kind(), "unknown_procedure");

    let f = Expression::binary(BinaryOp::Mul, Expression::reference("$"), Expression::float(2.0));
    let stuck = from()
        .op("map", "map", json!({"fn": f}))
        .op("range", "range", json!({"start": "-1h"}))
        .edge("from", "map")
        .edge("map", "range");
    assert_eq!(run(stuck, storage.clone()).expect_err("range behind map").kind(), "push_down_conflict");
    assert_eq!(storage.reads(), 0);
}

#[test]
fn tiny_memory_limit_exhausts_resources() {
    let storage = MemoryStorage::new();
    storage.insert("db", tags(&[("host", "a")]), float_series(1000, 1.0));
    let config = EngineConfig {
        memory_limit_bytes: 1024,
        ..config()
    };
    let dag = OperationDag::new().op("from", "from", json!({"database": "db"}));
    assert_eq!(run_with(dag, storage, config).expect_err("over budget").kind(), "resource_exhausted");
}

#[test]
fn integer_series_keep_their_type() {
    let storage = MemoryStorage::new();
    storage.insert("db", tags(&[("host", "a")]), int_series(&[3, 1, 2]));
    storage.insert(
        "db",
        tags(&[("host", "b")]),
        Points::String {
            timestamps: vec![secs(1)],
            values: vec!["up".into()],
        },
    );
    let dag = OperationDag::new()
        .op("from", "from", json!({"database": "db"}))
        .op("sort", "sort", json!({}))
        .edge("from", "sort");
    let hosts = by_host(&single(run(dag, storage).expect("query")));
    assert_eq!(values(&hosts["a"]), [Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(values(&hosts["b"]), [Value::String("up".into())]);
}
