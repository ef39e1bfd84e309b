//! Query files (YAML and JSON) loaded into a DAG and run.


use chronoflow_core::Value;
use chronoflow_io::MemoryStorage;
use chronoflow_planner::{parse_json_query, parse_yaml_query};
use test_data_gen::*;

const STORAGE: &str = r#"{
  "telegraf": [
    {"tags": {"host": "a"}, "points": {"type": "int", "timestamps": [1000000000, 2000000000, 3000000000], "values": [5, 7, 9]}},
    {"tags": {"host": "b"}, "points": {"type": "int", "timestamps": [1000000000, 2000000000], "values": [1, 2]}}
  ]
}"#;

fn storage() -> MemoryStorage {
    MemoryStorage::from_json(STORAGE).expect("storage json")
}

#[test]
fn yaml_steps_run_end_to_end() {
    let q = parse_yaml_query(
        r#"
config: { worker_threads: 2, seed: 3 }
now: 100000000000
steps:
  - { kind: from, spec: { database: telegraf } }
  - { kind: range, spec: { start: "-5m" } }
  - { id: total, kind: sum }
"#,
    )
    .expect("parse");
    assert_eq!(q.config.worker_threads, 2);
    assert_eq!(q.config.seed, Some(3));

    let ex = executor(storage(), q.config.clone()).expect("executor");
    let results = ex.query(&q.dag).expect("query").collect().expect("collect");
    assert_eq!(names(&results), ["from0"], "sum and range fold into the read");
    let hosts = by_host(&single(results));
    assert_eq!(values(&hosts["a"]), [Value::Int(21)]);
    assert_eq!(values(&hosts["b"]), [Value::Int(3)]);
}

#[test]
fn json_graph_with_branches() {
    let q = parse_json_query(
        r#"{
  "now": 100000000000,
  "operations": [
    {"id": "src", "kind": "from", "spec": {"database": "telegraf"}},
    {"id": "newest", "kind": "last"},
    {"id": "big", "kind": "filter", "spec": {"fn": {
      "type": "binary", "op": ">",
      "left": {"type": "reference", "path": ["_value"]},
      "right": {"type": "int", "value": 6}
    }}}
  ],
  "edges": [
    {"parent": "src", "child": "newest"},
    {"parent": "src", "child": "big"}
  ]
}"#,
    )
    .expect("parse");
    let ex = executor(storage(), q.config.clone()).expect("executor");
    let results = ex.query(&q.dag).expect("query").collect().expect("collect");
    assert_eq!(results.len(), 2);

    let mut rows: Vec<Vec<Value>> = results
        .iter()
        .map(|(_, blocks)| by_host(blocks).remove("a").map(|r| values(&r)).unwrap_or_default())
        .collect();
    rows.sort_by_key(|r| r.len());
    assert_eq!(rows, [vec![Value::Int(9)], vec![Value::Int(7), Value::Int(9)]]);
}

#[test]
fn file_config_falls_back_to_defaults() {
    let q = parse_yaml_query("steps: [{ kind: from, spec: { database: telegraf } }]").expect("parse");
    assert_eq!(q.config, chronoflow_core::EngineConfig::default());
    assert_eq!(q.dag.now, None);
    assert_eq!(q.dag.operations[0].id.as_str(), "from0");
}

#[test]
fn invalid_files_are_rejected_before_running() {
    assert_eq!(parse_yaml_query("steps: [").expect_err("yaml").kind(), "parse_error");
    assert_eq!(parse_json_query("{").expect_err("json").kind(), "parse_error");
    let zero_workers = "config: { worker_threads: 0 }\nsteps: [{ kind: from, spec: { database: x } }]";
    assert_eq!(parse_yaml_query(zero_workers).expect_err("config").kind(), "invalid_spec");
    let dangling = r#"
operations: [{ id: a, kind: from, spec: { database: x } }]
edges: [{ parent: a, child: nowhere }]
"#;
    assert_eq!(parse_yaml_query(dangling).expect_err("edge").kind(), "invalid_spec");
}

#[test]
fn unknown_kinds_fail_at_planning() {
    let q = parse_yaml_query(
        r#"
now: 100000000000
steps:
  - { kind: from, spec: { database: telegraf } }
  - { kind: histogram }
"#,
    )
    .expect("parse");
    let ex = executor(storage(), config()).expect("executor");
    assert_eq!(ex.query(&q.dag).err().map(|e| e.kind()), Some("unknown_procedure"));
}
