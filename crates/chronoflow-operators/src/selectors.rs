//! Selector kinds: `first`, `last`, `min`, `max` and `sample`.
//!
//! `first` and `sample` name rows chunk by chunk; `last`, `min` and `max`
//! keep a running best row over the block. `first` and `last` also push
//! into `from` as a one-point read in the matching direction.

use std::sync::{Mutex, PoisonError};

use chronoflow_core::{BoundsSpec, Error, Result};
use chronoflow_exec::{
    Dataset, ExecutionContext, IndexSelect, Picker, Registry, RowSelect, Selector, SelectorTransformation,
    Transformation,
};
use chronoflow_planner::{decode_spec, ProcedureSpec, PushDownOutcome, PushDownRule};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::downcast;
use crate::filter::FILTER_KIND;
use crate::from::{FromProcedureSpec, FROM_KIND};
use crate::group::GROUP_KIND;
use crate::limit::LIMIT_KIND;

pub const FIRST_KIND: &str = "first";
pub const LAST_KIND: &str = "last";
pub const MIN_KIND: &str = "min";
pub const MAX_KIND: &str = "max";
pub const SAMPLE_KIND: &str = "sample";

/// Parameters shared by the single-row selectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectSpec {
    #[serde(alias = "useRowTime")]
    pub use_row_time: bool,
}

macro_rules! selector_specs {
    ($($spec:ident),* $(,)?) => {$(
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $spec(pub SelectSpec);
    )*};
}

selector_specs!(FirstProcedureSpec, LastProcedureSpec, MinProcedureSpec, MaxProcedureSpec);

/// A point limit of one in the given direction, over `(min, now)`.
fn push_single_point(root: &mut dyn ProcedureSpec, descending: bool) -> PushDownOutcome {
    let Some(from) = root.downcast_mut::<FromProcedureSpec>() else {
        return PushDownOutcome::Unsupported;
    };
    if from.bounds_set || from.limit_set || from.descending_set {
        return PushDownOutcome::Conflict;
    }
    from.bounds_set = true;
    from.bounds = BoundsSpec::until_now();
    from.limit_set = true;
    from.points_limit = 1;
    from.descending_set = true;
    from.descending = descending;
    PushDownOutcome::Applied
}

const SINGLE_POINT_RULE: PushDownRule = PushDownRule {
    root: FROM_KIND,
    through: &[GROUP_KIND, LIMIT_KIND, FILTER_KIND],
};

impl ProcedureSpec for FirstProcedureSpec {
    fn kind(&self) -> &'static str {
        FIRST_KIND
    }

    fn time_bounds(&self) -> Option<BoundsSpec> {
        Some(BoundsSpec::until_now())
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        Some(SINGLE_POINT_RULE)
    }

    fn push_down(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        push_single_point(root, false)
    }
}

impl ProcedureSpec for LastProcedureSpec {
    fn kind(&self) -> &'static str {
        LAST_KIND
    }

    fn time_bounds(&self) -> Option<BoundsSpec> {
        Some(BoundsSpec::until_now())
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        Some(SINGLE_POINT_RULE)
    }

    fn push_down(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        push_single_point(root, true)
    }
}

impl ProcedureSpec for MinProcedureSpec {
    fn kind(&self) -> &'static str {
        MIN_KIND
    }
}

impl ProcedureSpec for MaxProcedureSpec {
    fn kind(&self) -> &'static str {
        MAX_KIND
    }
}

fn default_pos() -> i64 {
    -1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleProcedureSpec {
    pub n: i64,
    /// Row offset within every run of `n`; `-1` draws one per block.
    #[serde(default = "default_pos")]
    pub pos: i64,
    #[serde(default, alias = "useRowTime")]
    pub use_row_time: bool,
}

impl ProcedureSpec for SampleProcedureSpec {
    fn kind(&self) -> &'static str {
        SAMPLE_KIND
    }
}

// Pickers. Each one is built fresh per input block.

struct FirstPicker {
    done: bool,
}

impl<T> IndexSelect<T> for FirstPicker {
    fn select(&mut self, chunk: &[T]) -> Vec<usize> {
        if self.done || chunk.is_empty() {
            return Vec::new();
        }
        self.done = true;
        vec![0]
    }
}

struct LastPicker;

impl<T> RowSelect<T> for LastPicker {
    fn select(&mut self, chunk: &[T]) -> Option<usize> {
        chunk.len().checked_sub(1)
    }
}

/// Keeps the row whose value wins `better` against every earlier row.
/// Ties keep the earliest row.
struct BestPicker<T> {
    best: Option<T>,
    better: fn(&T, &T) -> bool,
}

impl<T: Clone + Send> RowSelect<T> for BestPicker<T> {
    fn select(&mut self, chunk: &[T]) -> Option<usize> {
        let mut found = None;
        for (i, v) in chunk.iter().enumerate() {
            if self.best.as_ref().map_or(true, |b| (self.better)(v, b)) {
                self.best = Some(v.clone());
                found = Some(i);
            }
        }
        found
    }
}

/// Every `n`th row starting at `pos`, continuing across chunks.
struct SamplePicker {
    n: usize,
    next: usize,
}

impl<T> IndexSelect<T> for SamplePicker {
    fn select(&mut self, chunk: &[T]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut i = self.next;
        while i < chunk.len() {
            out.push(i);
            i += self.n;
        }
        self.next = i - chunk.len();
        out
    }
}

fn lt<T: PartialOrd>(a: &T, b: &T) -> bool {
    a < b
}

fn gt<T: PartialOrd>(a: &T, b: &T) -> bool {
    a > b
}

// Selectors.

struct First;

impl First {
    fn picker<T>() -> Option<Picker<T>> {
        Some(Picker::Index(Box::new(FirstPicker { done: false })))
    }
}

impl Selector for First {
    fn name(&self) -> &'static str {
        FIRST_KIND
    }
    fn new_bool(&self) -> Option<Picker<bool>> {
        Self::picker()
    }
    fn new_int(&self) -> Option<Picker<i64>> {
        Self::picker()
    }
    fn new_uint(&self) -> Option<Picker<u64>> {
        Self::picker()
    }
    fn new_float(&self) -> Option<Picker<f64>> {
        Self::picker()
    }
    fn new_string(&self) -> Option<Picker<String>> {
        Self::picker()
    }
}

struct Last;

impl Last {
    fn picker<T>() -> Option<Picker<T>> {
        Some(Picker::Row(Box::new(LastPicker)))
    }
}

impl Selector for Last {
    fn name(&self) -> &'static str {
        LAST_KIND
    }
    fn new_bool(&self) -> Option<Picker<bool>> {
        Self::picker()
    }
    fn new_int(&self) -> Option<Picker<i64>> {
        Self::picker()
    }
    fn new_uint(&self) -> Option<Picker<u64>> {
        Self::picker()
    }
    fn new_float(&self) -> Option<Picker<f64>> {
        Self::picker()
    }
    fn new_string(&self) -> Option<Picker<String>> {
        Self::picker()
    }
}

/// `min` or `max`, over numeric values only.
struct Extreme {
    name: &'static str,
    largest: bool,
}

impl Extreme {
    fn picker<T: PartialOrd + Clone + Send + 'static>(&self) -> Option<Picker<T>> {
        let better = if self.largest { gt::<T> } else { lt::<T> };
        Some(Picker::Row(Box::new(BestPicker { best: None, better })))
    }
}

impl Selector for Extreme {
    fn name(&self) -> &'static str {
        self.name
    }
    fn new_int(&self) -> Option<Picker<i64>> {
        self.picker()
    }
    fn new_uint(&self) -> Option<Picker<u64>> {
        self.picker()
    }
    fn new_float(&self) -> Option<Picker<f64>> {
        self.picker()
    }
}

struct Sample {
    n: usize,
    pos: Option<usize>,
    rng: Mutex<StdRng>,
}

impl Sample {
    fn new(n: usize, pos: Option<usize>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            n,
            pos,
            rng: Mutex::new(rng),
        }
    }

    fn picker<T>(&self) -> Option<Picker<T>> {
        let next = match self.pos {
            Some(p) => p,
            None => self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(0..self.n),
        };
        Some(Picker::Index(Box::new(SamplePicker { n: self.n, next })))
    }
}

impl Selector for Sample {
    fn name(&self) -> &'static str {
        SAMPLE_KIND
    }
    fn new_bool(&self) -> Option<Picker<bool>> {
        self.picker()
    }
    fn new_int(&self) -> Option<Picker<i64>> {
        self.picker()
    }
    fn new_uint(&self) -> Option<Picker<u64>> {
        self.picker()
    }
    fn new_float(&self) -> Option<Picker<f64>> {
        self.picker()
    }
    fn new_string(&self) -> Option<Picker<String>> {
        self.picker()
    }
}

// Registration.

fn create_first(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    Ok(Box::new(FirstProcedureSpec(decode_spec(FIRST_KIND, v)?)))
}

fn create_last(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    Ok(Box::new(LastProcedureSpec(decode_spec(LAST_KIND, v)?)))
}

fn create_min(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    Ok(Box::new(MinProcedureSpec(decode_spec(MIN_KIND, v)?)))
}

fn create_max(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    Ok(Box::new(MaxProcedureSpec(decode_spec(MAX_KIND, v)?)))
}

fn create_sample(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    let spec: SampleProcedureSpec = decode_spec(SAMPLE_KIND, v)?;
    if spec.n <= 0 {
        return Err(Error::InvalidSpec(format!("sample: n must be positive, got {}", spec.n)));
    }
    if spec.pos < -1 || spec.pos >= spec.n {
        return Err(Error::InvalidSpec(format!(
            "sample: pos must be -1 or in [0, {}), got {}",
            spec.n, spec.pos
        )));
    }
    Ok(Box::new(spec))
}

fn selector_transformation(
    dataset: Dataset,
    selector: Box<dyn Selector>,
    use_row_time: bool,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    Ok(Box::new(SelectorTransformation::new(
        dataset,
        selector,
        use_row_time,
        ctx.config.chunk_size,
    )))
}

fn first_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<FirstProcedureSpec>(spec)?;
    selector_transformation(dataset, Box::new(First), s.0.use_row_time, ctx)
}

fn last_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<LastProcedureSpec>(spec)?;
    selector_transformation(dataset, Box::new(Last), s.0.use_row_time, ctx)
}

fn min_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<MinProcedureSpec>(spec)?;
    let sel = Extreme {
        name: MIN_KIND,
        largest: false,
    };
    selector_transformation(dataset, Box::new(sel), s.0.use_row_time, ctx)
}

fn max_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<MaxProcedureSpec>(spec)?;
    let sel = Extreme {
        name: MAX_KIND,
        largest: true,
    };
    selector_transformation(dataset, Box::new(sel), s.0.use_row_time, ctx)
}

fn sample_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<SampleProcedureSpec>(spec)?;
    let n = usize::try_from(s.n).map_err(|_| Error::InvalidSpec(format!("sample: bad n {}", s.n)))?;
    let pos = usize::try_from(s.pos).ok();
    let sel = Sample::new(n, pos, ctx.config.seed);
    selector_transformation(dataset, Box::new(sel), s.use_row_time, ctx)
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(FIRST_KIND, create_first)?;
    r.register_transformation(FIRST_KIND, first_transformation)?;
    r.register_procedure(LAST_KIND, create_last)?;
    r.register_transformation(LAST_KIND, last_transformation)?;
    r.register_procedure(MIN_KIND, create_min)?;
    r.register_transformation(MIN_KIND, min_transformation)?;
    r.register_procedure(MAX_KIND, create_max)?;
    r.register_transformation(MAX_KIND, max_transformation)?;
    r.register_procedure(SAMPLE_KIND, create_sample)?;
    r.register_transformation(SAMPLE_KIND, sample_transformation)
}
