//! `join`: inner join of two parents on time and a set of tags.
//!
//! Rows of each parent are staged per `(bounds, on-tags)` key in two
//! tables. When the key's trigger fires both tables are sorted by time,
//! their per-row `on` tags and then every remaining column, merged, and
//! every matching row pair is fed to the join expression. References in the expression name a table and a
//! column, e.g. `l._value`.
//!
//! The outgoing watermark and processing time are the minimum over both
//! parents.

mod merge;

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use chronoflow_block::helpers::{add_tags, append_row_filled, col_map, pad_column};
use chronoflow_block::{col_idx, Block, BlockBuilder, BlockKey, BlockMetadata};
use chronoflow_core::expression::Expression;
use chronoflow_core::id::{DatasetId, OperationId, ProcedureId};
use chronoflow_core::time::MIN_TIME;
use chronoflow_core::{Bounds, ColMeta, Error, Result, Tags, Time, TIME_COL};
use chronoflow_exec::expression::{CompileCache, Scope};
use chronoflow_exec::trigger::TriggerContext;
use chronoflow_exec::{fail_point, Dataset, ExecutionContext, Registry, Transformation, Trigger, TriggerSpec};
use chronoflow_mem::Allocator;
use chronoflow_planner::{decode_spec, ProcedureSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::downcast;
use merge::merge_join;

pub const JOIN_KIND: &str = "join";

/// The join operation as written in a query.
#[derive(Debug, Clone, Deserialize)]
struct JoinOperation {
    #[serde(default)]
    on: Vec<String>,
    #[serde(rename = "fn")]
    expression: Expression,
    tables: BTreeMap<String, OperationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinProcedureSpec {
    /// Sorted tag keys rows must agree on.
    pub on: Vec<String>,
    pub expression: Expression,
    /// Table name to the parent procedure feeding it.
    pub tables: BTreeMap<String, ProcedureId>,
}

impl ProcedureSpec for JoinProcedureSpec {
    fn kind(&self) -> &'static str {
        JOIN_KIND
    }

    fn parent_changed(&mut self, old: ProcedureId, new: ProcedureId) {
        for id in self.tables.values_mut() {
            if *id == old {
                *id = new;
            }
        }
    }
}

/// One table of the two being joined.
struct Table {
    name: String,
    parent: DatasetId,
    watermark: Time,
    processing_time: Time,
}

/// Where a reference of the expression reads from.
struct Ref {
    table: usize,
    column: String,
}

struct Staging {
    meta: BlockMetadata,
    tables: [BlockBuilder; 2],
    trigger: Trigger,
}

impl Staging {
    fn new(alloc: &Allocator, meta: BlockMetadata, trigger: &TriggerSpec) -> Self {
        let bounds = meta.bounds;
        let table = || {
            let mut b = BlockBuilder::new(alloc);
            b.set_bounds(bounds);
            b
        };
        Self {
            tables: [table(), table()],
            meta,
            trigger: Trigger::from_spec(trigger),
        }
    }

    fn nrows(&self) -> usize {
        self.tables[0].nrows() + self.tables[1].nrows()
    }

    /// Adds the columns of `block` to table `side`. Per-row `on` tags are
    /// added to both tables so their key columns line up.
    fn add_columns(&mut self, side: usize, block: &Block, on: &[String]) -> Result<()> {
        for meta in block.cols() {
            if meta.is_tag() {
                if meta.common || !on.contains(&meta.label) {
                    continue;
                }
                for t in &mut self.tables {
                    add_padded(t, meta)?;
                }
                continue;
            }
            let t = &mut self.tables[side];
            let j = add_padded(t, meta)?;
            let have = t.cols()[j].data_type;
            if have != meta.data_type {
                return Err(Error::IncompatibleTypes(format!(
                    "join column {} is {have} in earlier blocks, {} now",
                    meta.label, meta.data_type
                )));
            }
        }
        Ok(())
    }
}

/// Adds `meta` unless present, padding it to the rows already staged.
fn add_padded(t: &mut BlockBuilder, meta: &ColMeta) -> Result<usize> {
    if let Some(j) = col_idx(&meta.label, t.cols()) {
        return Ok(j);
    }
    let n = t.nrows();
    let j = t.add_column(meta.clone())?;
    pad_column(t, j, n)?;
    Ok(j)
}

fn panic_message(p: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in join expression".into()
    }
}

pub struct JoinTransformation {
    dataset: Dataset,
    tables: [Table; 2],
    on: Vec<String>,
    expression: CompileCache,
    refs: Vec<Ref>,
    allocator: Allocator,
    trigger: TriggerSpec,
    staging: BTreeMap<BlockKey, Staging>,
}

impl JoinTransformation {
    pub fn new(dataset: Dataset, spec: &JoinProcedureSpec, ctx: &ExecutionContext) -> Result<Self> {
        if ctx.parents.len() != 2 || spec.tables.len() != 2 {
            return Err(Error::InvalidSpec(format!(
                "join needs exactly two tables and two parents, got {} and {}",
                spec.tables.len(),
                ctx.parents.len()
            )));
        }
        let mut tables = Vec::with_capacity(2);
        for (name, id) in &spec.tables {
            let parent = DatasetId::from(*id);
            if !ctx.parents.contains(&parent) {
                return Err(Error::InvalidSpec(format!("join table {name} is not a parent of {}", ctx.name)));
            }
            tables.push(Table {
                name: name.clone(),
                parent,
                watermark: MIN_TIME,
                processing_time: MIN_TIME,
            });
        }
        let tables: [Table; 2] = tables
            .try_into()
            .map_err(|_| Error::Internal("join tables".into()))?;

        let mut refs = Vec::new();
        for path in spec.expression.references() {
            let resolved = match path.as_slice() {
                [table, column] => tables
                    .iter()
                    .position(|t| &t.name == table)
                    .map(|table| Ref {
                        table,
                        column: column.clone(),
                    }),
                _ => None,
            };
            refs.push(resolved.ok_or_else(|| {
                Error::IncompatibleTypes(format!(
                    "join reference {} must name a table ({}, {}) and a column",
                    path.join("."),
                    tables[0].name,
                    tables[1].name
                ))
            })?);
        }

        Ok(Self {
            dataset,
            tables,
            on: spec.on.clone(),
            expression: CompileCache::new(spec.expression.clone()),
            refs,
            allocator: ctx.allocator.clone(),
            trigger: ctx.default_trigger(),
            staging: BTreeMap::new(),
        })
    }

    fn side(&self, src: DatasetId) -> Result<usize> {
        self.tables
            .iter()
            .position(|t| t.parent == src)
            .ok_or_else(|| Error::Internal(format!("join got a message from unknown dataset {src}")))
    }

    fn meta(&self, bounds: Bounds, tags: &Tags) -> BlockMetadata {
        BlockMetadata::new(bounds, tags.intersecting_subset(&self.on))
    }

    fn watermark(&self) -> Time {
        self.tables[0].watermark.min(self.tables[1].watermark)
    }

    fn processing_time(&self) -> Time {
        self.tables[0].processing_time.min(self.tables[1].processing_time)
    }

    fn evaluate_triggers(&mut self) -> Result<()> {
        let watermark = self.watermark();
        let processing_time = self.processing_time();
        let keys: Vec<BlockKey> = self.staging.keys().cloned().collect();
        for key in keys {
            let Some(s) = self.staging.get_mut(&key) else {
                continue;
            };
            let ctx = TriggerContext {
                bounds: s.meta.bounds,
                nrows: s.nrows(),
                watermark,
                processing_time,
            };
            let fired = s.trigger.triggered(&ctx);
            let finished = s.trigger.finished();
            if fired {
                self.emit(&key)?;
            }
            if finished {
                self.staging.remove(&key);
            }
        }
        Ok(())
    }

    fn emit_all(&mut self) -> Result<()> {
        let keys: Vec<BlockKey> = self.staging.keys().cloned().collect();
        keys.iter().try_for_each(|k| self.emit(k))
    }

    /// Joins the staged tables of `key` into the output builder, replacing
    /// whatever an earlier firing put there.
    fn emit(&mut self, key: &BlockKey) -> Result<()> {
        let Some(s) = self.staging.get_mut(key) else {
            return Ok(());
        };
        if s.tables.iter().any(BlockBuilder::is_empty) {
            return Ok(());
        }
        let mut sort_cols = vec![TIME_COL.to_string()];
        sort_cols.extend(
            self.on
                .iter()
                .filter(|l| col_idx(l, s.tables[0].cols()).is_some())
                .cloned(),
        );
        // Non-key columns break ties so equal keys pair up in the same
        // order whatever order the rows arrived in.
        for t in &mut s.tables {
            let mut cols = sort_cols.clone();
            cols.extend(
                t.cols()
                    .iter()
                    .map(|c| c.label.clone())
                    .filter(|l| !sort_cols.contains(l)),
            );
            t.sort(&cols, false)?;
        }
        let meta = s.meta.clone();
        let left = s.tables[0].block()?;
        let right = s.tables[1].block()?;

        let key_cols = |b: &Block| -> Result<Vec<usize>> {
            sort_cols
                .iter()
                .map(|l| {
                    col_idx(l, b.cols()).ok_or_else(|| Error::Internal(format!("join table lost key column {l}")))
                })
                .collect()
        };
        let lkeys = key_cols(&left)?;
        let rkeys = key_cols(&right)?;
        let sides = [&left, &right];

        let mut slots = Vec::with_capacity(self.refs.len());
        let mut types = Vec::with_capacity(self.refs.len());
        for r in &self.refs {
            let b = sides[r.table];
            let j = col_idx(&r.column, b.cols()).ok_or_else(|| {
                Error::IncompatibleTypes(format!(
                    "join table {} has no column {}",
                    self.tables[r.table].name, r.column
                ))
            })?;
            slots.push((r.table, j));
            types.push(b.cols()[j].data_type);
        }
        let f = self.expression.get(&types)?;

        let (builder, created) = self.dataset.builder_for(&meta);
        if created {
            builder.add_column(ColMeta::time())?;
            for (label, ty) in f.output_types() {
                builder.add_column(ColMeta::value_labeled(label, ty))?;
            }
            add_tags(&meta.tags, builder)?;
            for l in &sort_cols[1..] {
                builder.add_column(ColMeta::tag(l.as_str(), false))?;
            }
        }
        builder.clear_data();
        let t_out = builder.cols().iter().position(|c| c.label == TIME_COL);
        let t_out = t_out.ok_or_else(|| Error::Internal("join output has no time column".into()))?;
        let value_out: Vec<usize> = f
            .output_types()
            .iter()
            .filter_map(|(label, _)| col_idx(label, builder.cols()))
            .collect();
        let tag_cols: Vec<(usize, usize)> = sort_cols[1..]
            .iter()
            .filter_map(|l| Some((col_idx(l, builder.cols())?, col_idx(l, left.cols())?)))
            .collect();
        let times = left.times(lkeys[0])?;

        let mut scope = Scope::with_capacity(slots.len());
        for (a, b) in merge_join(&left, &lkeys, &right, &rkeys) {
            scope.clear();
            scope.extend(slots.iter().map(|&(side, j)| {
                let row = if side == 0 { a } else { b };
                sides[side].value(row, j)
            }));
            let values = panic::catch_unwind(AssertUnwindSafe(|| {
                fail_point!("join-eval");
                f.eval_all(&scope)
            }))
            .map_err(|p| Error::ExpressionEvaluation(panic_message(&*p)))??;

            builder.append_time(t_out, times[a])?;
            for (j, v) in value_out.iter().zip(&values) {
                builder.append_value(*j, v)?;
            }
            for &(j, src) in &tag_cols {
                if let Some(col) = left.column(src) {
                    builder.append_from(j, col, a)?;
                }
            }
        }
        debug!(key = %key, rows = builder.nrows(), "join emitted");
        Ok(())
    }
}

impl Transformation for JoinTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        let key = self.meta(meta.bounds, &meta.tags).key();
        self.staging.remove(&key);
        self.dataset.retract_block(&key)
    }

    fn process(&mut self, src: DatasetId, block: &Block) -> Result<()> {
        let side = self.side(src)?;
        let meta = self.meta(block.bounds(), block.tags());
        let s = self
            .staging
            .entry(meta.key())
            .or_insert_with(|| Staging::new(&self.allocator, meta, &self.trigger));
        s.add_columns(side, block, &self.on)?;
        let table = &mut s.tables[side];
        let map = col_map(table, block);
        for i in 0..block.nrows() {
            append_row_filled(i, block, table, &map)?;
        }
        Ok(())
    }

    fn update_watermark(&mut self, src: DatasetId, time: Time) -> Result<()> {
        let side = self.side(src)?;
        let t = &mut self.tables[side];
        t.watermark = t.watermark.max(time);
        self.evaluate_triggers()?;
        let watermark = self.watermark();
        self.dataset.update_watermark(watermark)
    }

    fn update_processing_time(&mut self, src: DatasetId, time: Time) -> Result<()> {
        let side = self.side(src)?;
        let t = &mut self.tables[side];
        t.processing_time = t.processing_time.max(time);
        self.evaluate_triggers()?;
        let processing_time = self.processing_time();
        self.dataset.update_processing_time(processing_time)
    }

    fn finish(&mut self, _src: DatasetId, err: Option<Error>) {
        let err = match err {
            Some(e) => Some(e),
            None => self.emit_all().err(),
        };
        self.staging.clear();
        self.dataset.finish(err)
    }
}

fn create_spec(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    let op: JoinOperation = decode_spec(JOIN_KIND, v)?;
    if op.tables.len() != 2 {
        return Err(Error::InvalidSpec(format!("join needs exactly two tables, got {}", op.tables.len())));
    }
    let mut on = op.on;
    on.sort();
    on.dedup();
    Ok(Box::new(JoinProcedureSpec {
        on,
        expression: op.expression,
        tables: op
            .tables
            .into_iter()
            .map(|(name, id)| (name, ProcedureId::from_operation(&id)))
            .collect(),
    }))
}

fn create_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<JoinProcedureSpec>(spec)?;
    Ok(Box::new(JoinTransformation::new(dataset, s, ctx)?))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(JOIN_KIND, create_spec)?;
    r.register_transformation(JOIN_KIND, create_transformation)
}
