//! `window`: assigns each row to fixed, possibly overlapping, time windows.
//!
//! A window is `[stop - period, stop)`; stops are spaced `every` apart and
//! aligned to `start` (epoch by default). With `period > every` a row lands
//! in several windows. Windows are clamped to the query bounds.

use std::collections::HashMap;

use chronoflow_block::helpers::{add_block_cols, append_row_filled, pad_column};
use chronoflow_block::{Block, BlockBuilder, BlockKey, BlockMetadata, ColMap};
use chronoflow_core::id::DatasetId;
use chronoflow_core::{Bounds, Duration, Error, QueryTime, Result, Time};
use chronoflow_exec::{Dataset, ExecutionContext, Registry, Transformation, TriggerSpec};
use chronoflow_planner::{decode_spec, ProcedureSpec};
use serde::{Deserialize, Serialize};

use crate::downcast;

pub const WINDOW_KIND: &str = "window";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowProcedureSpec {
    pub every: Duration,
    pub period: Duration,
    /// Only zero is supported; window edges are never rounded.
    pub round: Duration,
    pub start: Option<QueryTime>,
    pub triggering: Option<TriggerSpec>,
}

impl ProcedureSpec for WindowProcedureSpec {
    fn kind(&self) -> &'static str {
        WINDOW_KIND
    }
}

pub struct WindowTransformation {
    dataset: Dataset,
    every: Duration,
    period: Duration,
    offset: Duration,
    bounds: Bounds,
}

impl WindowTransformation {
    /// `offset` shifts window stops away from multiples of `every`;
    /// `bounds` clamps every window.
    pub fn new(dataset: Dataset, every: Duration, period: Duration, offset: Duration, bounds: Bounds) -> Self {
        Self {
            dataset,
            every,
            period,
            offset,
            bounds,
        }
    }

    /// Every clamped window containing `t`, earliest stop first.
    fn windows(&self, t: Time) -> Vec<Bounds> {
        let mut stop = t.truncate(self.every) + self.offset;
        if t >= stop {
            stop = stop + self.every;
        }
        let mut start = stop - self.period;
        let mut out = Vec::new();
        while t >= start {
            let w = Bounds::new(start, stop).intersect(&self.bounds);
            if w.contains(t) {
                out.push(w);
            }
            let next = stop + self.every;
            if next == stop {
                break;
            }
            start = start + self.every;
            stop = next;
        }
        out
    }
}

/// Adds the block's columns to `builder`, padding any column that is new
/// to a builder that already holds rows.
fn map_block(block: &Block, builder: &mut BlockBuilder) -> Result<ColMap> {
    let n = builder.nrows();
    let before = builder.ncols();
    let map = add_block_cols(block, builder)?;
    for j in before..builder.ncols() {
        pad_column(builder, j, n)?;
    }
    Ok(map)
}

impl Transformation for WindowTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        let tags = meta.tags.key();
        for key in self.dataset.cache().keys() {
            let hit = self
                .dataset
                .cache()
                .builder(&key)
                .map_or(false, |b| b.bounds().overlaps(&meta.bounds) && b.tags().key() == tags);
            if hit {
                self.dataset.retract_block(&key)?;
            }
        }
        Ok(())
    }

    fn process(&mut self, _src: DatasetId, block: &Block) -> Result<()> {
        let times = block.times(block.time_idx()?)?;
        let mut maps: HashMap<BlockKey, ColMap> = HashMap::new();
        for (i, t) in times.iter().enumerate() {
            for w in self.windows(*t) {
                let meta = BlockMetadata::new(w, block.tags().clone());
                let key = meta.key();
                let (builder, _) = self.dataset.builder_for(&meta);
                if !maps.contains_key(&key) {
                    let map = map_block(block, builder)?;
                    maps.insert(key.clone(), map);
                }
                append_row_filled(i, block, builder, &maps[&key])?;
            }
        }
        Ok(())
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
    let mut spec: WindowProcedureSpec = decode_spec(WINDOW_KIND, v)?;
    if spec.every.is_zero() {
        spec.every = spec.period;
    }
    if spec.period.is_zero() {
        spec.period = spec.every;
    }
    if spec.every.nanos() <= 0 || spec.period.nanos() <= 0 {
        return Err(Error::InvalidSpec(format!(
            "window: every ({}) and period ({}) must be positive",
            spec.every, spec.period
        )));
    }
    if !spec.round.is_zero() {
        return Err(Error::InvalidSpec(format!(
            "window: round ({}) is not supported",
            spec.round
        )));
    }
    Ok(Box::new(spec))
}

fn create_transformation(
    spec: &dyn ProcedureSpec,
    mut dataset: Dataset,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<WindowProcedureSpec>(spec)?;
    if let Some(trigger) = &s.triggering {
        dataset.cache().set_trigger(trigger.clone());
    }
    let offset = match s.start {
        Some(q) => {
            let start = q.resolve(ctx.now);
            start.since(start.truncate(s.every))
        }
        None => Duration(0),
    };
    Ok(Box::new(WindowTransformation::new(
        dataset, s.every, s.period, offset, ctx.bounds,
    )))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(WINDOW_KIND, create_spec)?;
    r.register_transformation(WINDOW_KIND, create_transformation)
}
