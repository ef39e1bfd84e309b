//! Selectors pick whole rows out of a block by looking at its values.
//!
//! An index selector names the rows to keep chunk by chunk; a row selector
//! keeps a running best over the block and contributes only that row.

use std::ops::Range;

use chronoflow_block::helpers::{add_block_cols, col_map};
use chronoflow_block::{Block, BlockMetadata};
use chronoflow_core::id::DatasetId;
use chronoflow_core::{DataType, Error, Result, Time};

use crate::dataset::Dataset;
use crate::transformation::Transformation;

pub trait IndexSelect<T>: Send {
    /// Rows of `chunk` to keep, as indices into the chunk.
    fn select(&mut self, chunk: &[T]) -> Vec<usize>;
}

pub trait RowSelect<T>: Send {
    /// Index into `chunk` of a row better than every row seen so far.
    fn select(&mut self, chunk: &[T]) -> Option<usize>;
}

pub enum Picker<T> {
    Index(Box<dyn IndexSelect<T>>),
    Row(Box<dyn RowSelect<T>>),
}

impl<T> Picker<T> {
    fn pick(self, values: &[T], chunks: impl Iterator<Item = Range<usize>>) -> Vec<usize> {
        match self {
            Picker::Index(mut s) => {
                let mut out = Vec::new();
                for r in chunks {
                    let base = r.start;
                    out.extend(s.select(&values[r]).into_iter().map(|i| base + i));
                }
                out
            }
            Picker::Row(mut s) => {
                let mut best = None;
                for r in chunks {
                    let base = r.start;
                    if let Some(i) = s.select(&values[r]) {
                        best = Some(base + i);
                    }
                }
                best.into_iter().collect()
            }
        }
    }
}

/// A per-type factory, called once per input block.
pub trait Selector: Send + Sync {
    fn name(&self) -> &'static str;

    fn new_bool(&self) -> Option<Picker<bool>> {
        None
    }
    fn new_int(&self) -> Option<Picker<i64>> {
        None
    }
    fn new_uint(&self) -> Option<Picker<u64>> {
        None
    }
    fn new_float(&self) -> Option<Picker<f64>> {
        None
    }
    fn new_string(&self) -> Option<Picker<String>> {
        None
    }
}

/// Rows `selector` picks from `block`'s value column, in ascending order.
pub fn select_rows(selector: &dyn Selector, block: &Block, chunk_size: usize) -> Result<Vec<usize>> {
    let j = block.value_idx()?;
    let data_type = block.value_type()?;
    let unsupported =
        || Error::UnsupportedAggregateType(format!("{} does not support {data_type} values", selector.name()));
    let chunks = block.chunks(chunk_size);
    let mut rows = match data_type {
        DataType::Bool => selector.new_bool().ok_or_else(unsupported)?.pick(block.bools(j)?, chunks),
        DataType::Int => selector.new_int().ok_or_else(unsupported)?.pick(block.ints(j)?, chunks),
        DataType::UInt => selector.new_uint().ok_or_else(unsupported)?.pick(block.uints(j)?, chunks),
        DataType::Float => selector.new_float().ok_or_else(unsupported)?.pick(block.floats(j)?, chunks),
        DataType::String => {
            let values = block.strings(j)?;
            selector.new_string().ok_or_else(unsupported)?.pick(&values, chunks)
        }
        DataType::Time => return Err(unsupported()),
    };
    rows.sort_unstable();
    rows.dedup();
    Ok(rows)
}

pub struct SelectorTransformation {
    dataset: Dataset,
    selector: Box<dyn Selector>,
    use_row_time: bool,
    chunk_size: usize,
}

impl SelectorTransformation {
    pub fn new(dataset: Dataset, selector: Box<dyn Selector>, use_row_time: bool, chunk_size: usize) -> Self {
        Self {
            dataset,
            selector,
            use_row_time,
            chunk_size,
        }
    }
}

impl Transformation for SelectorTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        self.dataset.retract_block(&meta.key())
    }

    fn process(&mut self, _src: DatasetId, block: &Block) -> Result<()> {
        let rows = select_rows(&*self.selector, block, self.chunk_size)?;
        let stop = block.bounds().stop;
        let (builder, created) = self.dataset.builder_for(&block.meta());
        let map = if created {
            add_block_cols(block, builder)?
        } else {
            col_map(builder, block)
        };
        let time_col = block.time_idx().ok();
        for i in rows {
            for (j, src) in map.iter().enumerate() {
                let Some(src) = *src else { continue };
                if !self.use_row_time && Some(src) == time_col {
                    builder.append_time(j, stop)?;
                } else if let Some(col) = block.column(src) {
                    builder.append_from(j, col, i)?;
                }
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
