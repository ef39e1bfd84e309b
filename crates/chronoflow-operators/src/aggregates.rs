//! Aggregate kinds: `sum`, `count`, `mean`, `spread`, `skew` and `mode`.
//!
//! `sum` and `count` push straight into an ungrouped, unlimited `from`,
//! letting storage fold each series.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chronoflow_core::{Result, Value};
use chronoflow_exec::{Aggregate, AggregateTransformation, Dataset, ExecutionContext, Fold, Registry, Transformation};
use chronoflow_io::AggregateType;
use chronoflow_planner::{decode_spec, ProcedureSpec, PushDownOutcome, PushDownRule};
use serde::{Deserialize, Serialize};

use crate::downcast;
use crate::from::{FromProcedureSpec, FROM_KIND};

pub const SUM_KIND: &str = "sum";
pub const COUNT_KIND: &str = "count";
pub const MEAN_KIND: &str = "mean";
pub const SPREAD_KIND: &str = "spread";
pub const SKEW_KIND: &str = "skew";
pub const MODE_KIND: &str = "mode";

macro_rules! aggregate_specs {
    ($($spec:ident),* $(,)?) => {$(
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $spec {}
    )*};
}

aggregate_specs!(
    SumProcedureSpec,
    CountProcedureSpec,
    MeanProcedureSpec,
    SpreadProcedureSpec,
    SkewProcedureSpec,
    ModeProcedureSpec,
);

const STORAGE_RULE: PushDownRule = PushDownRule {
    root: FROM_KIND,
    through: &[],
};

fn storage_can_fold(root: &dyn ProcedureSpec) -> bool {
    root.downcast_ref::<FromProcedureSpec>()
        .map_or(false, |f| !f.grouping_set && !f.limit_set)
}

fn push_aggregate(root: &mut dyn ProcedureSpec, ty: AggregateType) -> PushDownOutcome {
    let Some(from) = root.downcast_mut::<FromProcedureSpec>() else {
        return PushDownOutcome::Unsupported;
    };
    if from.aggregate_set {
        return PushDownOutcome::Conflict;
    }
    from.aggregate_set = true;
    from.aggregate_type = Some(ty);
    PushDownOutcome::Applied
}

impl ProcedureSpec for SumProcedureSpec {
    fn kind(&self) -> &'static str {
        SUM_KIND
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        Some(STORAGE_RULE)
    }

    fn match_root(&self, root: &dyn ProcedureSpec) -> bool {
        storage_can_fold(root)
    }

    fn push_down(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        push_aggregate(root, AggregateType::Sum)
    }
}

impl ProcedureSpec for CountProcedureSpec {
    fn kind(&self) -> &'static str {
        COUNT_KIND
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        Some(STORAGE_RULE)
    }

    fn match_root(&self, root: &dyn ProcedureSpec) -> bool {
        storage_can_fold(root)
    }

    fn push_down(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        push_aggregate(root, AggregateType::Count)
    }
}

macro_rules! plain_kinds {
    ($(($spec:ident, $kind:ident)),* $(,)?) => {$(
        impl ProcedureSpec for $spec {
            fn kind(&self) -> &'static str {
                $kind
            }
        }
    )*};
}

plain_kinds!(
    (MeanProcedureSpec, MEAN_KIND),
    (SpreadProcedureSpec, SPREAD_KIND),
    (SkewProcedureSpec, SKEW_KIND),
    (ModeProcedureSpec, MODE_KIND),
);

/// Column types the arithmetic aggregates fold.
trait Numeric: Copy + PartialOrd + Send + 'static {
    const ZERO: Self;
    fn add(self, o: Self) -> Self;
    fn diff(self, o: Self) -> Self;
    fn as_f64(self) -> f64;
    fn into_value(self) -> Value;
}

impl Numeric for i64 {
    const ZERO: Self = 0;
    fn add(self, o: Self) -> Self {
        self.wrapping_add(o)
    }
    fn diff(self, o: Self) -> Self {
        self.wrapping_sub(o)
    }
    fn as_f64(self) -> f64 {
        self as f64
    }
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl Numeric for u64 {
    const ZERO: Self = 0;
    fn add(self, o: Self) -> Self {
        self.wrapping_add(o)
    }
    fn diff(self, o: Self) -> Self {
        self.wrapping_sub(o)
    }
    fn as_f64(self) -> f64 {
        self as f64
    }
    fn into_value(self) -> Value {
        Value::UInt(self)
    }
}

impl Numeric for f64 {
    const ZERO: Self = 0.0;
    fn add(self, o: Self) -> Self {
        self + o
    }
    fn diff(self, o: Self) -> Self {
        self - o
    }
    fn as_f64(self) -> f64 {
        self
    }
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

struct SumFold<T>(T);

impl<T: Numeric> Fold<T> for SumFold<T> {
    fn fold(&mut self, vs: &[T]) {
        for v in vs {
            self.0 = self.0.add(*v);
        }
    }
    fn value(&self) -> Value {
        self.0.into_value()
    }
}

struct CountFold(i64);

impl<T> Fold<T> for CountFold {
    fn fold(&mut self, vs: &[T]) {
        self.0 += vs.len() as i64;
    }
    fn value(&self) -> Value {
        Value::Int(self.0)
    }
}

#[derive(Default)]
struct MeanFold {
    n: u64,
    sum: f64,
}

impl<T: Numeric> Fold<T> for MeanFold {
    fn fold(&mut self, vs: &[T]) {
        for v in vs {
            self.n += 1;
            self.sum += v.as_f64();
        }
    }
    fn value(&self) -> Value {
        if self.n == 0 {
            return Value::Float(f64::NAN);
        }
        Value::Float(self.sum / self.n as f64)
    }
}

struct SpreadFold<T> {
    min: Option<T>,
    max: Option<T>,
}

impl<T: Numeric> Fold<T> for SpreadFold<T> {
    fn fold(&mut self, vs: &[T]) {
        for &v in vs {
            if self.min.map_or(true, |m| v < m) {
                self.min = Some(v);
            }
            if self.max.map_or(true, |m| v > m) {
                self.max = Some(v);
            }
        }
    }
    fn value(&self) -> Value {
        match (self.max, self.min) {
            (Some(max), Some(min)) => max.diff(min).into_value(),
            _ => T::ZERO.into_value(),
        }
    }
}

/// Running central moments, updated one value at a time.
#[derive(Default)]
struct SkewFold {
    n: f64,
    m1: f64,
    m2: f64,
    m3: f64,
}

impl<T: Numeric> Fold<T> for SkewFold {
    fn fold(&mut self, vs: &[T]) {
        for v in vs {
            let n0 = self.n;
            self.n += 1.0;
            let delta = v.as_f64() - self.m1;
            let delta_n = delta / self.n;
            let t = delta * delta_n * n0;
            self.m3 += t * delta_n * (self.n - 2.0) - 3.0 * delta_n * self.m2;
            self.m2 += t;
            self.m1 += delta_n;
        }
    }
    fn value(&self) -> Value {
        if self.n < 2.0 {
            return Value::Float(f64::NAN);
        }
        Value::Float(self.n.sqrt() * self.m3 / self.m2.powf(1.5))
    }
}

/// `f64` ordered by `total_cmp`, so floats can key a map.
#[derive(Clone, Copy)]
struct OrdF64(f64);

impl PartialEq for OrdF64 {
    fn eq(&self, o: &Self) -> bool {
        self.cmp(o) == Ordering::Equal
    }
}

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, o: &Self) -> Option<Ordering> {
        Some(self.cmp(o))
    }
}

impl Ord for OrdF64 {
    fn cmp(&self, o: &Self) -> Ordering {
        self.0.total_cmp(&o.0)
    }
}

trait ModeKey: Send + 'static {
    type Key: Ord + Send;
    fn key(&self) -> Self::Key;
    fn value(k: &Self::Key) -> Value;
    fn zero() -> Value;
}

macro_rules! mode_keys {
    ($(($t:ty, $key:ty, $k:ident => $to_key:expr, $v:ident => $to_value:expr, $zero:expr)),* $(,)?) => {$(
        impl ModeKey for $t {
            type Key = $key;
            fn key(&self) -> $key {
                let $k = self;
                $to_key
            }
            fn value($v: &$key) -> Value {
                $to_value
            }
            fn zero() -> Value {
                $zero
            }
        }
    )*};
}

mode_keys!(
    (bool, bool, k => *k, v => Value::Bool(*v), Value::Bool(false)),
    (i64, i64, k => *k, v => Value::Int(*v), Value::Int(0)),
    (u64, u64, k => *k, v => Value::UInt(*v), Value::UInt(0)),
    (f64, OrdF64, k => OrdF64(*k), v => Value::Float(v.0), Value::Float(0.0)),
    (String, String, k => k.clone(), v => Value::String(v.clone()), Value::String(String::new())),
);

struct ModeFold<T: ModeKey> {
    counts: BTreeMap<T::Key, u64>,
}

impl<T: ModeKey> ModeFold<T> {
    fn new() -> Self {
        Self { counts: BTreeMap::new() }
    }
}

impl<T: ModeKey> Fold<T> for ModeFold<T> {
    fn fold(&mut self, vs: &[T]) {
        for v in vs {
            *self.counts.entry(v.key()).or_default() += 1;
        }
    }

    /// Most frequent value; the smallest one wins a tie.
    fn value(&self) -> Value {
        let mut best: Option<(&T::Key, u64)> = None;
        for (k, n) in &self.counts {
            if best.map_or(true, |(_, m)| *n > m) {
                best = Some((k, *n));
            }
        }
        best.map_or_else(T::zero, |(k, _)| T::value(k))
    }
}

struct Sum;

impl Aggregate for Sum {
    fn name(&self) -> &'static str {
        SUM_KIND
    }
    fn new_int(&self) -> Option<Box<dyn Fold<i64>>> {
        Some(Box::new(SumFold(0i64)))
    }
    fn new_uint(&self) -> Option<Box<dyn Fold<u64>>> {
        Some(Box::new(SumFold(0u64)))
    }
    fn new_float(&self) -> Option<Box<dyn Fold<f64>>> {
        Some(Box::new(SumFold(0f64)))
    }
}

struct Count;

impl Aggregate for Count {
    fn name(&self) -> &'static str {
        COUNT_KIND
    }
    fn new_bool(&self) -> Option<Box<dyn Fold<bool>>> {
        Some(Box::new(CountFold(0)))
    }
    fn new_int(&self) -> Option<Box<dyn Fold<i64>>> {
        Some(Box::new(CountFold(0)))
    }
    fn new_uint(&self) -> Option<Box<dyn Fold<u64>>> {
        Some(Box::new(CountFold(0)))
    }
    fn new_float(&self) -> Option<Box<dyn Fold<f64>>> {
        Some(Box::new(CountFold(0)))
    }
    fn new_string(&self) -> Option<Box<dyn Fold<String>>> {
        Some(Box::new(CountFold(0)))
    }
}

struct Mean;

impl Aggregate for Mean {
    fn name(&self) -> &'static str {
        MEAN_KIND
    }
    fn new_int(&self) -> Option<Box<dyn Fold<i64>>> {
        Some(Box::<MeanFold>::default())
    }
    fn new_uint(&self) -> Option<Box<dyn Fold<u64>>> {
        Some(Box::<MeanFold>::default())
    }
    fn new_float(&self) -> Option<Box<dyn Fold<f64>>> {
        Some(Box::<MeanFold>::default())
    }
}

struct Spread;

impl Spread {
    fn fold<T: Numeric>() -> Option<Box<dyn Fold<T>>> {
        Some(Box::new(SpreadFold::<T> { min: None, max: None }))
    }
}

impl Aggregate for Spread {
    fn name(&self) -> &'static str {
        SPREAD_KIND
    }
    fn new_int(&self) -> Option<Box<dyn Fold<i64>>> {
        Self::fold()
    }
    fn new_uint(&self) -> Option<Box<dyn Fold<u64>>> {
        Self::fold()
    }
    fn new_float(&self) -> Option<Box<dyn Fold<f64>>> {
        Self::fold()
    }
}

struct Skew;

impl Aggregate for Skew {
    fn name(&self) -> &'static str {
        SKEW_KIND
    }
    fn new_int(&self) -> Option<Box<dyn Fold<i64>>> {
        Some(Box::<SkewFold>::default())
    }
    fn new_uint(&self) -> Option<Box<dyn Fold<u64>>> {
        Some(Box::<SkewFold>::default())
    }
    fn new_float(&self) -> Option<Box<dyn Fold<f64>>> {
        Some(Box::<SkewFold>::default())
    }
}

struct Mode;

impl Aggregate for Mode {
    fn name(&self) -> &'static str {
        MODE_KIND
    }
    fn new_bool(&self) -> Option<Box<dyn Fold<bool>>> {
        Some(Box::new(ModeFold::<bool>::new()))
    }
    fn new_int(&self) -> Option<Box<dyn Fold<i64>>> {
        Some(Box::new(ModeFold::<i64>::new()))
    }
    fn new_uint(&self) -> Option<Box<dyn Fold<u64>>> {
        Some(Box::new(ModeFold::<u64>::new()))
    }
    fn new_float(&self) -> Option<Box<dyn Fold<f64>>> {
        Some(Box::new(ModeFold::<f64>::new()))
    }
    fn new_string(&self) -> Option<Box<dyn Fold<String>>> {
        Some(Box::new(ModeFold::<String>::new()))
    }
}

fn aggregate_transformation(
    dataset: Dataset,
    agg: Box<dyn Aggregate>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    Ok(Box::new(AggregateTransformation::new(
        dataset,
        agg,
        ctx.bounds,
        ctx.config.chunk_size,
    )))
}

macro_rules! registrations {
    ($(($kind:ident, $spec:ident, $agg:expr, $create:ident, $transform:ident)),* $(,)?) => {
        $(
            fn $create(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
                Ok(Box::new(decode_spec::<$spec>($kind, v)?))
            }

            fn $transform(
                spec: &dyn ProcedureSpec,
                dataset: Dataset,
                ctx: &ExecutionContext,
            ) -> Result<Box<dyn Transformation>> {
                downcast::<$spec>(spec)?;
                aggregate_transformation(dataset, Box::new($agg), ctx)
            }
        )*

        pub(crate) fn register(r: &mut Registry) -> Result<()> {
            $(
                r.register_procedure($kind, $create)?;
                r.register_transformation($kind, $transform)?;
            )*
            Ok(())
        }
    };
}

registrations!(
    (SUM_KIND, SumProcedureSpec, Sum, create_sum, sum_transformation),
    (COUNT_KIND, CountProcedureSpec, Count, create_count, count_transformation),
    (MEAN_KIND, MeanProcedureSpec, Mean, create_mean, mean_transformation),
    (SPREAD_KIND, SpreadProcedureSpec, Spread, create_spread, spread_transformation),
    (SKEW_KIND, SkewProcedureSpec, Skew, create_skew, skew_transformation),
    (MODE_KIND, ModeProcedureSpec, Mode, create_mode, mode_transformation),
);
