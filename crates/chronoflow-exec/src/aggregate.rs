//! Aggregates fold every value of a block into one output row.

use std::ops::Range;

use chronoflow_block::helpers::add_tags;
use chronoflow_block::{time_idx, value_idx, Block, BlockMetadata};
use chronoflow_core::id::DatasetId;
use chronoflow_core::{Bounds, ColMeta, DataType, Error, Result, Time, Value};

use crate::dataset::Dataset;
use crate::transformation::Transformation;

/// Accumulates successive chunks of one column type.
pub trait Fold<T>: Send {
    fn fold(&mut self, vs: &[T]);
    fn value(&self) -> Value;
}

/// A per-type factory. Types the aggregate cannot fold return `None`.
pub trait Aggregate: Send + Sync {
    fn name(&self) -> &'static str;

    fn new_bool(&self) -> Option<Box<dyn Fold<bool>>> {
        None
    }
    fn new_int(&self) -> Option<Box<dyn Fold<i64>>> {
        None
    }
    fn new_uint(&self) -> Option<Box<dyn Fold<u64>>> {
        None
    }
    fn new_float(&self) -> Option<Box<dyn Fold<f64>>> {
        None
    }
    fn new_string(&self) -> Option<Box<dyn Fold<String>>> {
        None
    }
}

pub enum Folder {
    Bool(Box<dyn Fold<bool>>),
    Int(Box<dyn Fold<i64>>),
    UInt(Box<dyn Fold<u64>>),
    Float(Box<dyn Fold<f64>>),
    String(Box<dyn Fold<String>>),
}

impl Folder {
    pub fn of(agg: &dyn Aggregate, data_type: DataType) -> Option<Folder> {
        match data_type {
            DataType::Bool => agg.new_bool().map(Folder::Bool),
            DataType::Int => agg.new_int().map(Folder::Int),
            DataType::UInt => agg.new_uint().map(Folder::UInt),
            DataType::Float => agg.new_float().map(Folder::Float),
            DataType::String => agg.new_string().map(Folder::String),
            DataType::Time => None,
        }
    }

    pub fn fold_rows(&mut self, block: &Block, j: usize, rows: Range<usize>) -> Result<()> {
        match self {
            Folder::Bool(f) => f.fold(&block.bools(j)?[rows]),
            Folder::Int(f) => f.fold(&block.ints(j)?[rows]),
            Folder::UInt(f) => f.fold(&block.uints(j)?[rows]),
            Folder::Float(f) => f.fold(&block.floats(j)?[rows]),
            Folder::String(f) => f.fold(&block.strings(j)?[rows]),
        }
        Ok(())
    }

    pub fn value(&self) -> Value {
        match self {
            Folder::Bool(f) => f.value(),
            Folder::Int(f) => f.value(),
            Folder::UInt(f) => f.value(),
            Folder::Float(f) => f.value(),
            Folder::String(f) => f.value(),
        }
    }
}

/// Folds a whole block with `agg`, `chunk_size` values at a time.
pub fn fold_block(agg: &dyn Aggregate, block: &Block, chunk_size: usize) -> Result<Value> {
    let j = block.value_idx()?;
    let data_type = block.value_type()?;
    let mut folder = Folder::of(agg, data_type).ok_or_else(|| {
        Error::UnsupportedAggregateType(format!("{} does not support {data_type} values", agg.name()))
    })?;
    for rows in block.chunks(chunk_size) {
        folder.fold_rows(block, j, rows)?;
    }
    Ok(folder.value())
}

pub struct AggregateTransformation {
    dataset: Dataset,
    agg: Box<dyn Aggregate>,
    bounds: Bounds,
    chunk_size: usize,
}

impl AggregateTransformation {
    /// `bounds` are the plan bounds every output block is keyed by.
    pub fn new(dataset: Dataset, agg: Box<dyn Aggregate>, bounds: Bounds, chunk_size: usize) -> Self {
        Self {
            dataset,
            agg,
            bounds,
            chunk_size,
        }
    }
}

impl Transformation for AggregateTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        let key = BlockMetadata::new(self.bounds, meta.tags.clone()).key();
        self.dataset.retract_block(&key)
    }

    fn process(&mut self, _src: DatasetId, block: &Block) -> Result<()> {
        let value = fold_block(&*self.agg, block, self.chunk_size)?;
        let meta = BlockMetadata::new(self.bounds, block.tags().clone());
        let (builder, created) = self.dataset.builder_for(&meta);
        if created {
            builder.add_column(ColMeta::time())?;
            builder.add_column(ColMeta::value(value.data_type()))?;
            add_tags(block.tags(), builder)?;
        }
        let t = time_idx(builder.cols()).ok_or_else(|| Error::Internal("aggregate output has no time column".into()))?;
        let v = value_idx(builder.cols()).ok_or_else(|| Error::Internal("aggregate output has no value column".into()))?;
        builder.append_time(t, block.bounds().stop)?;
        builder.append_value(v, &value)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BuilderCache;
    use crate::dataset::AccumulationMode;
    use crate::testing::{block, dataset_id, float_block, rows, Collector};
    use crate::trigger::TriggerSpec;
    use chronoflow_mem::Allocator;
    use std::sync::Arc;

    struct Total;

    struct FloatTotal(f64);

    impl Fold<f64> for FloatTotal {
        fn fold(&mut self, vs: &[f64]) {
            self.0 += vs.iter().sum::<f64>();
        }
        fn value(&self) -> Value {
            Value::Float(self.0)
        }
    }

    impl Aggregate for Total {
        fn name(&self) -> &'static str {
            "total"
        }
        fn new_float(&self) -> Option<Box<dyn Fold<f64>>> {
            Some(Box::new(FloatTotal(0.0)))
        }
    }

    fn transformation() -> (AggregateTransformation, Arc<Collector>) {
        let out = Arc::new(Collector::default());
        let mut d = Dataset::new(
            dataset_id("agg"),
            AccumulationMode::Accumulating,
            BuilderCache::new(Allocator::unlimited(), TriggerSpec::default()),
        );
        d.add_downstream(out.clone());
        let t = AggregateTransformation::new(d, Box::new(Total), Bounds::new(Time(0), Time(100)), 2);
        (t, out)
    }

    #[test]
    fn one_row_per_block_keyed_by_plan_bounds() {
        let (mut t, out) = transformation();
        let src = dataset_id("src");
        let a = float_block(Bounds::new(Time(0), Time(50)), &[("host", "a")], &[(1, 1.0), (2, 2.0), (3, 3.0)])
            .expect("block");
        let b = float_block(Bounds::new(Time(50), Time(100)), &[("host", "a")], &[(60, 4.0)]).expect("block");
        t.process(src, &a).expect("process");
        t.process(src, &b).expect("process");
        t.finish(src, None);
        let blocks = out.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].bounds(), Bounds::new(Time(0), Time(100)));
        assert_eq!(blocks[0].tags().get("host"), Some("a"));
        assert_eq!(
            rows(&blocks[0]).expect("rows"),
            [(50, Value::Float(6.0)), (100, Value::Float(4.0))]
        );
    }

    #[test]
    fn unsupported_type_is_an_error() {
        let (mut t, _) = transformation();
        let s = block(
            Bounds::new(Time(0), Time(10)),
            &[],
            &[(1, Value::String("x".into()))],
        )
        .expect("block");
        let err = t.process(dataset_id("src"), &s).unwrap_err();
        assert_eq!(err.kind(), "unsupported_aggregate_type");
    }
}
