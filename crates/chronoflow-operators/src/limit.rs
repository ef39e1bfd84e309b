//! `limit`: caps rows per series and the number of series.

use std::collections::{BTreeMap, HashMap};

use chronoflow_block::helpers::{add_block_cols, append_rows, col_map};
use chronoflow_block::{Block, BlockKey, BlockMetadata};
use chronoflow_core::id::DatasetId;
use chronoflow_core::tags::TagsKey;
use chronoflow_core::{Error, Result, Time};
use chronoflow_exec::{Dataset, ExecutionContext, Registry, Transformation};
use chronoflow_planner::{decode_spec, ProcedureSpec, PushDownOutcome, PushDownRule};
use serde::{Deserialize, Serialize};

use crate::downcast;
use crate::filter::FILTER_KIND;
use crate::from::{FromProcedureSpec, FROM_KIND};
use crate::range::RANGE_KIND;

pub const LIMIT_KIND: &str = "limit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitProcedureSpec {
    /// Rows kept per series.
    pub n: i64,
    /// Rows skipped per series before counting `n`.
    #[serde(default)]
    pub offset: i64,
    /// Zero keeps every series.
    #[serde(default)]
    pub series_limit: i64,
    #[serde(default)]
    pub series_offset: i64,
}

impl ProcedureSpec for LimitProcedureSpec {
    fn kind(&self) -> &'static str {
        LIMIT_KIND
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        Some(PushDownRule {
            root: FROM_KIND,
            through: &[RANGE_KIND, FILTER_KIND],
        })
    }

    fn push_down(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        let Some(from) = root.downcast_mut::<FromProcedureSpec>() else {
            return PushDownOutcome::Unsupported;
        };
        // Storage has no per-series point offset.
        if self.offset != 0 {
            return PushDownOutcome::Unsupported;
        }
        if from.limit_set {
            return PushDownOutcome::Conflict;
        }
        from.limit_set = true;
        from.points_limit = self.n;
        from.series_limit = self.series_limit;
        from.series_offset = self.series_offset;
        PushDownOutcome::Applied
    }
}

/// Row and series counters for one limit.
pub struct LimitTransformation {
    dataset: Dataset,
    n: usize,
    offset: usize,
    series_limit: usize,
    series_offset: usize,
    seen: BTreeMap<BlockKey, usize>,
    series: HashMap<TagsKey, usize>,
}

impl LimitTransformation {
    pub fn new(dataset: Dataset, spec: &LimitProcedureSpec) -> Self {
        let count = |v: i64| usize::try_from(v).unwrap_or(0);
        Self {
            dataset,
            n: count(spec.n),
            offset: count(spec.offset),
            series_limit: count(spec.series_limit),
            series_offset: count(spec.series_offset),
            seen: BTreeMap::new(),
            series: HashMap::new(),
        }
    }

    /// Whether the series of `block` falls inside the series window, by
    /// order of first arrival.
    fn series_kept(&mut self, block: &Block) -> bool {
        let next = self.series.len();
        let idx = *self.series.entry(block.tags().key()).or_insert(next);
        if idx < self.series_offset {
            return false;
        }
        self.series_limit == 0 || idx - self.series_offset < self.series_limit
    }
}

impl Transformation for LimitTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        let key = meta.key();
        self.seen.remove(&key);
        self.dataset.retract_block(&key)
    }

    fn process(&mut self, _src: DatasetId, block: &Block) -> Result<()> {
        if !self.series_kept(block) {
            return Ok(());
        }
        let nrows = block.nrows();
        let seen = self.seen.entry(block.key()).or_insert(0);
        let start = self.offset.saturating_sub(*seen).min(nrows);
        let end = (self.offset + self.n).saturating_sub(*seen).min(nrows);
        *seen += nrows;
        if start >= end {
            return Ok(());
        }
        let rows: Vec<usize> = (start..end).collect();
        let (builder, created) = self.dataset.builder_for(&block.meta());
        let map = if created {
            add_block_cols(block, builder)?
        } else {
            col_map(builder, block)
        };
        append_rows(&rows, block, builder, &map)
    }

    fn update_watermark(&mut self, _src: DatasetId, time: Time) -> Result<()> {
        self.dataset.update_watermark(time)
    }

    fn update_processing_time(&mut self, _src: DatasetId, time: Time) -> Result<()> {
        self.dataset.update_processing_time(time)
    }

    fn finish(&mut self, _src: DatasetId, err: Option<Error>) {
        self.dataset.finish(err)
    }
}

fn create_spec(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    let spec: LimitProcedureSpec = decode_spec(LIMIT_KIND, v)?;
    if spec.n < 0 || spec.offset < 0 || spec.series_limit < 0 || spec.series_offset < 0 {
        return Err(Error::InvalidSpec(format!("limit: negative count in {spec:?}")));
    }
    Ok(Box::new(spec))
}

fn create_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    _ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<LimitProcedureSpec>(spec)?;
    Ok(Box::new(LimitTransformation::new(dataset, s)))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(LIMIT_KIND, create_spec)?;
    r.register_transformation(LIMIT_KIND, create_transformation)
}
