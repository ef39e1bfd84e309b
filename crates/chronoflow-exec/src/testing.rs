//! Helpers for driving transformations by hand in tests.

use std::sync::{Mutex, PoisonError};

use chronoflow_block::{Block, BlockBuilder};
use chronoflow_core::id::{DatasetId, OperationId, ProcedureId};
use chronoflow_core::{Bounds, ColMeta, DataType, Error, Result, Tags, Time, Value};
use chronoflow_mem::Allocator;

use crate::transformation::{Downstream, Message};

/// The dataset id a procedure named `name` would get.
pub fn dataset_id(name: &str) -> DatasetId {
    DatasetId::from(ProcedureId::from_operation(&OperationId::new(name)))
}

/// Records every message pushed to it.
#[derive(Default)]
pub struct Collector {
    messages: Mutex<Vec<Message>>,
}

impl Collector {
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Process { block, .. } => Some(block),
                _ => None,
            })
            .collect()
    }

    /// `Some(err)` once a finish message arrived.
    pub fn finished(&self) -> Option<Option<Error>> {
        self.messages().into_iter().find_map(|m| match m {
            Message::Finish { err, .. } => Some(err),
            _ => None,
        })
    }
}

impl Downstream for Collector {
    fn push(&self, msg: Message) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
    }
}

/// A block with `_time`, `_value` and one common column per tag.
pub fn block(bounds: Bounds, tags: &[(&str, &str)], rows: &[(i64, Value)]) -> Result<Block> {
    let tags: Tags = tags.iter().copied().collect();
    let data_type = rows
        .first()
        .map(|(_, v)| v.data_type())
        .unwrap_or(DataType::Float);
    let mut b = BlockBuilder::new(&Allocator::unlimited());
    b.set_bounds(bounds);
    let t = b.add_column(ColMeta::time())?;
    let v = b.add_column(ColMeta::value(data_type))?;
    chronoflow_block::helpers::add_tags(&tags, &mut b)?;
    for (time, value) in rows {
        b.append_time(t, Time(*time))?;
        b.append_value(v, value)?;
    }
    b.block()
}

/// Shorthand for a float block.
pub fn float_block(bounds: Bounds, tags: &[(&str, &str)], rows: &[(i64, f64)]) -> Result<Block> {
    let rows: Vec<(i64, Value)> = rows.iter().map(|(t, v)| (*t, Value::Float(*v))).collect();
    block(bounds, tags, &rows)
}

/// `(time, value)` pairs of a block with `_time` and `_value` columns.
pub fn rows(block: &Block) -> Result<Vec<(i64, Value)>> {
    let t = block.time_idx()?;
    let v = block.value_idx()?;
    let times = block.times(t)?;
    Ok((0..block.nrows())
        .map(|i| (times[i].0, block.value(i, v)))
        .collect())
}
