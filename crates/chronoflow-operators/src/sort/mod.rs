//! `sort`: orders the rows of each output block by a list of columns.

use chronoflow_block::helpers::{add_block_cols, append_block, col_map};
use chronoflow_block::{Block, BlockMetadata};
use chronoflow_core::id::DatasetId;
use chronoflow_core::{Error, Result, Time, VALUE_COL};
use chronoflow_exec::{Dataset, ExecutionContext, Registry, Transformation};
use chronoflow_planner::{decode_spec, ProcedureSpec};
use serde::{Deserialize, Serialize};

use crate::downcast;

pub const SORT_KIND: &str = "sort";

fn default_cols() -> Vec<String> {
    vec![VALUE_COL.to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortProcedureSpec {
    #[serde(default = "default_cols")]
    pub cols: Vec<String>,
    #[serde(default)]
    pub desc: bool,
}

impl Default for SortProcedureSpec {
    fn default() -> Self {
        Self {
            cols: default_cols(),
            desc: false,
        }
    }
}

impl ProcedureSpec for SortProcedureSpec {
    fn kind(&self) -> &'static str {
        SORT_KIND
    }
}

pub struct SortTransformation {
    dataset: Dataset,
    cols: Vec<String>,
    desc: bool,
}

impl SortTransformation {
    pub fn new(dataset: Dataset, cols: Vec<String>, desc: bool) -> Self {
        Self { dataset, cols, desc }
    }
}

impl Transformation for SortTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        self.dataset.retract_block(&meta.key())
    }

    /// Rows accumulated under one key are re-sorted as a whole, so blocks
    /// arriving in any order end up in one ordered output.
    fn process(&mut self, _src: DatasetId, block: &Block) -> Result<()> {
        let (builder, created) = self.dataset.builder_for(&block.meta());
        let map = if created {
            add_block_cols(block, builder)?
        } else {
            col_map(builder, block)
        };
        append_block(block, builder, &map)?;
        builder.sort(&self.cols, self.desc)
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
    let spec: SortProcedureSpec = decode_spec(SORT_KIND, v)?;
    if spec.cols.is_empty() {
        return Err(Error::InvalidSpec("sort: cols must not be empty".into()));
    }
    Ok(Box::new(spec))
}

fn create_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    _ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<SortProcedureSpec>(spec)?;
    Ok(Box::new(SortTransformation::new(dataset, s.cols.clone(), s.desc)))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(SORT_KIND, create_spec)?;
    r.register_transformation(SORT_KIND, create_transformation)
}
