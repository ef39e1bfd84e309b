//! `map`: computes new values row by row.
//!
//! A scalar expression replaces `_value`, whose type becomes the
//! expression's type. An object expression replaces every value column
//! with one column per property. Tags and time pass through.

use chronoflow_block::helpers::col_idx;
use chronoflow_block::{Block, BlockBuilder, BlockMetadata, ColMap};
use chronoflow_core::expression::Expression;
use chronoflow_core::id::DatasetId;
use chronoflow_core::{ColKind, ColMeta, DataType, Error, Result, Time, Value};
use chronoflow_exec::expression::{CompileCache, Scope};
use chronoflow_exec::{metrics, Dataset, ExecutionContext, Registry, Transformation};
use chronoflow_planner::{decode_spec, ProcedureSpec};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::downcast;
use crate::filter::{fill_scope, resolve_refs};

pub const MAP_KIND: &str = "map";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapProcedureSpec {
    #[serde(rename = "fn")]
    pub expression: Expression,
}

impl ProcedureSpec for MapProcedureSpec {
    fn kind(&self) -> &'static str {
        MAP_KIND
    }
}

pub struct MapTransformation {
    dataset: Dataset,
    f: CompileCache,
    scope: Scope,
}

/// Whether a block column survives into the output, given the expression's
/// output labels.
fn passes_through(meta: &ColMeta, object: bool, outputs: &[(String, DataType)]) -> bool {
    if object && meta.kind == ColKind::Value {
        return false;
    }
    !outputs.iter().any(|(label, _)| *label == meta.label)
}

fn init_builder(block: &Block, object: bool, outputs: &[(String, DataType)], builder: &mut BlockBuilder) -> Result<()> {
    for meta in block.cols() {
        if !passes_through(meta, object, outputs) {
            continue;
        }
        let j = builder.add_column(meta.clone())?;
        if meta.is_common_tag() {
            if let Some(v) = block.tags().get(&meta.label) {
                builder.set_common_string(j, v)?;
            }
        }
    }
    for (label, ty) in outputs {
        builder.add_column(ColMeta::value_labeled(label.clone(), *ty))?;
    }
    Ok(())
}

impl MapTransformation {
    pub fn new(dataset: Dataset, expression: Expression) -> Self {
        Self {
            dataset,
            f: CompileCache::new(expression),
            scope: Scope::new(),
        }
    }
}

impl Transformation for MapTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        self.dataset.retract_block(&meta.key())
    }

    fn process(&mut self, _src: DatasetId, block: &Block) -> Result<()> {
        let (cols, types) = resolve_refs(self.f.names(), block)?;
        let f = self
            .f
            .get(&types)
            .map_err(|e| Error::IncompatibleTypes(format!("map {}: {e}", self.f.expression())))?;
        let outputs = f.output_types();

        let (builder, created) = self.dataset.builder_for(&block.meta());
        if created {
            init_builder(block, f.is_object(), &outputs, builder)?;
        }
        let mut out_cols = Vec::with_capacity(outputs.len());
        for (label, ty) in &outputs {
            let j = col_idx(label, builder.cols())
                .ok_or_else(|| Error::IncompatibleTypes(format!("map: output column {label} changed shape")))?;
            let have = builder.cols()[j].data_type;
            if have != *ty {
                return Err(Error::IncompatibleTypes(format!(
                    "map: column {label} is {have}, expression now yields {ty}"
                )));
            }
            out_cols.push(j);
        }
        let map: ColMap = builder
            .cols()
            .iter()
            .enumerate()
            .map(|(j, c)| {
                if out_cols.contains(&j) {
                    None
                } else {
                    col_idx(&c.label, block.cols())
                }
            })
            .collect();

        let mut dropped = 0u64;
        for i in 0..block.nrows() {
            fill_scope(&mut self.scope, &cols, block, i);
            let values = match f.eval_all(&self.scope) {
                Ok(vs) => vs,
                Err(e) => {
                    warn!(row = i, error = %e, "map: dropping row");
                    dropped += 1;
                    continue;
                }
            };
            for (j, src) in map.iter().enumerate() {
                if out_cols.contains(&j) {
                    continue;
                }
                match src.and_then(|s| block.column(s)) {
                    Some(col) => builder.append_from(j, col, i)?,
                    None => {
                        let meta = &builder.cols()[j];
                        if !meta.common {
                            let zero = Value::zero(meta.data_type);
                            builder.append_value(j, &zero)?;
                        }
                    }
                }
            }
            for (j, v) in out_cols.iter().zip(&values) {
                builder.append_value(*j, v)?;
            }
        }
        if dropped > 0 {
            metrics::rows_dropped(dropped);
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
    Ok(Box::new(decode_spec::<MapProcedureSpec>(MAP_KIND, v)?))
}

fn create_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    _ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<MapProcedureSpec>(spec)?;
    Ok(Box::new(MapTransformation::new(dataset, s.expression.clone())))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(MAP_KIND, create_spec)?;
    r.register_transformation(MAP_KIND, create_transformation)
}
