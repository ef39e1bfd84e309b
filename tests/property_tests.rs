//! Properties that hold for any input data.


use chronoflow_block::BlockBuilder;
use chronoflow_core::expression::{BinaryOp, Expression};
use chronoflow_core::operation::OperationDag;
use chronoflow_core::{ColMeta, DataType, Time, Value, TIME_COL, VALUE_COL};
use chronoflow_exec::testing::rows;
use chronoflow_io::MemoryStorage;
use chronoflow_mem::Allocator;
use proptest::prelude::*;
use serde_json::json;
use test_data_gen::*;

fn builder(values: &[i64]) -> BlockBuilder {
    let mut b = BlockBuilder::new(&Allocator::unlimited());
    let t = b.add_column(ColMeta::time()).expect("time");
    let v = b.add_column(ColMeta::value(DataType::Int)).expect("value");
    let times: Vec<Time> = (0..values.len() as i64).map(Time).collect();
    b.append_times(t, &times).expect("times");
    b.append_ints(v, values).expect("values");
    b
}

fn int_storage(series: &[(&str, &str, &[i64])]) -> MemoryStorage {
    let s = MemoryStorage::new().with_frame_size(3);
    for &(db, host, values) in series {
        s.insert(db, tags(&[("host", host)]), int_series(values));
    }
    s
}

fn ints(blocks: &[chronoflow_block::Block]) -> Vec<i64> {
    let mut out: Vec<i64> = by_host(blocks)
        .values()
        .flatten()
        .map(|(_, v)| match v {
            Value::Int(i) => *i,
            other => panic!("int expected, got {other:?}"),
        })
        .collect();
    out.sort();
    out
}

fn sum_dag(through_map: bool) -> OperationDag {
    let mut dag = OperationDag::new().op("from", "from", json!({"database": "db"}));
    if through_map {
        let f = Expression::binary(BinaryOp::Add, Expression::reference("$"), Expression::int(0));
        dag = dag
            .op("map", "map", json!({"fn": f}))
            .op("sum", "sum", json!({}))
            .edge("from", "map")
            .edge("map", "sum");
    } else {
        dag = dag.op("sum", "sum", json!({})).edge("from", "sum");
    }
    dag
}

fn join_dag(left: &str, right: &str) -> OperationDag {
    let sum = Expression::binary(BinaryOp::Add, Expression::member("l", "_value"), Expression::member("r", "_value"));
    OperationDag::new()
        .op("cpu", "from", json!({"database": "cpu"}))
        .op("mem", "from", json!({"database": "mem"}))
        .op("join", "join", json!({"on": ["host"], "fn": sum, "tables": {"l": left, "r": right}}))
        .edge("cpu", "join")
        .edge("mem", "join")
}

proptest! {
    #[test]
    fn sort_orders_a_permutation_and_is_idempotent(
        values in prop::collection::vec(-1_000i64..1_000, 0..200),
        desc in any::<bool>(),
    ) {
        let cols = [VALUE_COL.to_string(), TIME_COL.to_string()];
        let mut b = builder(&values);
        b.sort(&cols, desc).expect("sort");
        let once = b.block().expect("block");
        b.sort(&cols, desc).expect("sort");
        let twice = b.block().expect("block");
        prop_assert_eq!(rows(&once).expect("rows"), rows(&twice).expect("rows"));

        let got = once.ints(1).expect("ints").to_vec();
        let mut want = values.clone();
        want.sort();
        if desc {
            want.reverse();
        }
        prop_assert_eq!(got, want);
    }

    #[test]
    fn clear_data_keeps_columns(values in prop::collection::vec(any::<i64>(), 1..50)) {
        let mut b = builder(&values);
        prop_assert_eq!(b.nrows(), values.len());
        b.clear_data();
        prop_assert_eq!(b.nrows(), 0);
        prop_assert_eq!(b.ncols(), 2);
        prop_assert_eq!(b.reserved_bytes(), 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 24, ..ProptestConfig::default() })]

    #[test]
    fn pushed_and_unpushed_sums_agree(
        a in prop::collection::vec(-1_000i64..1_000, 1..40),
        b in prop::collection::vec(-1_000i64..1_000, 1..40),
    ) {
        let storage = || int_storage(&[("db", "a", &a[..]), ("db", "b", &b[..])]);
        let pushed = single(run(sum_dag(false), storage()).expect("pushed"));
        let mapped = single(run(sum_dag(true), storage()).expect("mapped"));
        let mut want = vec![a.iter().sum::<i64>(), b.iter().sum::<i64>()];
        want.sort();
        prop_assert_eq!(ints(&pushed), want.clone());
        prop_assert_eq!(ints(&mapped), want);
    }

    #[test]
    fn limit_keeps_at_most_n_rows(
        values in prop::collection::vec(-1_000i64..1_000, 0..40),
        n in 1i64..20,
        offset in 0i64..5,
    ) {
        let dag = OperationDag::new()
            .op("from", "from", json!({"database": "db"}))
            .op("limit", "limit", json!({"n": n, "offset": offset}))
            .edge("from", "limit");
        let results = run(dag, int_storage(&[("db", "a", &values[..])])).expect("query");
        let total: usize = results.iter().flat_map(|(_, b)| b).map(|b| b.nrows()).sum();
        let want = values.len().saturating_sub(offset as usize).min(n as usize);
        prop_assert_eq!(total, want);
    }

    #[test]
    fn tumbling_windows_keep_every_row_in_well_formed_blocks(
        values in prop::collection::vec(-1_000i64..1_000, 1..60),
        every in 1i64..10,
    ) {
        let dag = OperationDag::new()
            .op("from", "from", json!({"database": "db"}))
            .op("window", "window", json!({"every": format!("{every}s")}))
            .edge("from", "window");
        let blocks = single(run(dag, int_storage(&[("db", "a", &values[..])])).expect("query"));
        let total: usize = blocks.iter().map(|b| b.nrows()).sum();
        prop_assert_eq!(total, values.len());
        for b in &blocks {
            for j in 0..b.ncols() {
                let col = b.column(j).expect("column");
                prop_assert!(col.is_common() || col.len() == b.nrows(), "column {} of {}", j, b.key());
            }
            for i in 0..b.nrows() {
                let row_tags = b.tags_for_row(i);
                prop_assert_eq!(row_tags.get("host"), b.tags().get("host"));
            }
            let bounds = b.bounds();
            for t in b.times(b.time_idx().expect("time")).expect("times") {
                prop_assert!(bounds.contains(*t));
            }
        }
    }

    #[test]
    fn join_is_commutative_for_symmetric_functions(
        cpu in prop::collection::vec(-1_000i64..1_000, 1..20),
        mem in prop::collection::vec(-1_000i64..1_000, 1..20),
    ) {
        let storage = || int_storage(&[("cpu", "a", &cpu[..]), ("mem", "a", &mem[..])]);
        let lr = single(run(join_dag("cpu", "mem"), storage()).expect("l-r"));
        let rl = single(run(join_dag("mem", "cpu"), storage()).expect("r-l"));
        prop_assert_eq!(ints(&lr).len(), cpu.len().min(mem.len()));
        prop_assert_eq!(ints(&lr), ints(&rl));
    }

    #[test]
    fn filtering_twice_is_filtering_once(
        values in prop::collection::vec(-1_000i64..1_000, 0..40),
        k in -1_000i64..1_000,
    ) {
        let pred = || {
            let shifted = Expression::binary(BinaryOp::Add, Expression::reference("$"), Expression::int(0));
            json!({"fn": Expression::binary(BinaryOp::Gt, shifted, Expression::int(k))})
        };
        let once = OperationDag::new()
            .op("from", "from", json!({"database": "db"}))
            .op("f1", "filter", pred())
            .edge("from", "f1");
        let twice = once.clone().op("f2", "filter", pred()).edge("f1", "f2");
        let storage = || int_storage(&[("db", "a", &values[..])]);
        let a = ints(&single(run(once, storage()).expect("once")));
        let b = ints(&single(run(twice, storage()).expect("twice")));
        let mut want: Vec<i64> = values.iter().copied().filter(|v| *v > k).collect();
        want.sort();
        prop_assert_eq!(&a, &want);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn grouped_blocks_carry_only_common_tags(
        regions in prop::collection::vec(0usize..3, 1..8),
    ) {
        let storage = MemoryStorage::new().with_frame_size(3);
        for (i, r) in regions.iter().enumerate() {
            let (host, region) = (format!("h{i}"), format!("r{r}"));
            storage.insert("db", tags(&[("host", host.as_str()), ("region", region.as_str())]), int_series(&[i as i64, 1]));
        }
        let dag = OperationDag::new()
            .op("from", "from", json!({"database": "db"}))
            .op("group", "group", json!({"by": ["region"]}))
            .edge("from", "group");
        let blocks = single(run(dag, storage).expect("query"));
        let mut distinct = regions.clone();
        distinct.sort();
        distinct.dedup();
        prop_assert_eq!(blocks.len(), distinct.len());
        for b in &blocks {
            prop_assert_eq!(b.tags().len(), 1);
            let region = b.tags().get("region").expect("region tag").to_string();
            let members = regions.iter().filter(|r| format!("r{r}") == region).count();
            prop_assert_eq!(b.nrows(), 2 * members);
        }
    }
}
