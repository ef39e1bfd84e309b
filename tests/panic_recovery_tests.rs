//! Panics inside transformations fail their query, not the process.
//! Needs `--features failpoints`.


use std::sync::{Mutex, MutexGuard, PoisonError};

use chronoflow_core::expression::{BinaryOp, Expression};
use chronoflow_core::operation::OperationDag;
use chronoflow_exec::failpoints;
use chronoflow_io::MemoryStorage;
use serde_json::json;
use test_data_gen::*;

// Failpoints are process-wide; tests arming them run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

struct Armed<'a> {
    name: &'static str,
    _serial: MutexGuard<'a, ()>,
}

fn arm(name: &'static str) -> Armed<'static> {
    let serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    failpoints::arm(name);
    Armed { name, _serial: serial }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        failpoints::disarm(self.name);
    }
}

fn doubled() -> OperationDag {
    let f = Expression::binary(BinaryOp::Mul, Expression::reference("$"), Expression::float(2.0));
    let mut dag = OperationDag::new()
        .op("from", "from", json!({"database": "telegraf"}))
        .op("map", "map", json!({"fn": f}))
        .edge("from", "map");
    dag.now = Some(NOW);
    dag
}

#[test]
fn panicking_dispatch_fails_the_query() {
    let ex = executor(telegraf(), config()).expect("executor");
    {
        let _armed = arm("panic_dispatch");
        let err = ex.query(&doubled()).expect("query").collect().expect_err("panicked");
        assert_eq!(err.kind(), "internal");
        assert!(err.to_string().contains("panicked"), "{err}");
    }
    let results = ex.query(&doubled()).expect("query").collect().expect("workers survived");
    let hosts = by_host(&results[0].1);
    assert_eq!(floats(&hosts["a"])[..2], [2.0, 4.0]);
}

#[test]
fn join_expression_panic_is_an_evaluation_error() {
    let storage = MemoryStorage::new();
    storage.insert("cpu", tags(&[("host", "a")]), float_series(3, 1.0));
    storage.insert("mem", tags(&[("host", "a")]), float_series(3, 2.0));
    let sum = Expression::binary(BinaryOp::Add, Expression::member("l", "_value"), Expression::member("r", "_value"));
    let mut dag = OperationDag::new()
        .op("cpu", "from", json!({"database": "cpu"}))
        .op("mem", "from", json!({"database": "mem"}))
        .op("join", "join", json!({"on": ["host"], "fn": sum, "tables": {"l": "cpu", "r": "mem"}}))
        .edge("cpu", "join")
        .edge("mem", "join");
    dag.now = Some(NOW);
    let ex = executor(storage, config()).expect("executor");

    let _armed = arm("join-eval");
    let err = ex.query(&dag).expect("query").collect().expect_err("panicked");
    assert_eq!(err.kind(), "expression_evaluation");
}

#[test]
fn disarmed_points_do_nothing() {
    let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    assert!(!failpoints::is_armed("panic_dispatch"));
    let results = run(doubled(), telegraf()).expect("query");
    assert_eq!(names(&results), ["map"]);
}
