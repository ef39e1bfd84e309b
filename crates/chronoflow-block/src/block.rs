//! Immutable refcounted blocks and their metadata/key.

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use chronoflow_core::{Bounds, ColMeta, DataType, Error, Result, Tags, Time, Value};
use chronoflow_mem::Reservation;
use serde::{Deserialize, Serialize};

use crate::column::ColumnData;
use crate::helpers::{time_idx, value_idx};

/// `k=v,k2=v2:start-stop`, tags in sorted key order, bounds in nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockKey(String);

impl BlockKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounds and common tags of a block, without its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub bounds: Bounds,
    pub tags: Tags,
}

impl BlockMetadata {
    pub fn new(bounds: Bounds, tags: Tags) -> Self {
        Self { bounds, tags }
    }

    pub fn key(&self) -> BlockKey {
        BlockKey(format!(
            "{}:{}-{}",
            self.tags.key(),
            self.bounds.start.nanos(),
            self.bounds.stop.nanos()
        ))
    }
}

struct BlockData {
    bounds: Bounds,
    tags: Tags,
    cols: Vec<ColMeta>,
    data: Vec<ColumnData>,
    nrows: usize,
    // Returned to the allocator when the last handle drops.
    _reservation: Reservation,
}

/// Cloning retains, dropping releases.
#[derive(Clone)]
pub struct Block {
    inner: Arc<BlockData>,
}

macro_rules! typed_access {
    ($(($slice:ident, $at:ident, $variant:ident, $t:ty)),* $(,)?) => {
        $(
            pub fn $slice(&self, j: usize) -> Result<&[$t]> {
                match self.inner.data.get(j) {
                    Some(ColumnData::$variant(v)) => Ok(v.as_slice()),
                    _ => Err(self.type_error(j, stringify!($variant))),
                }
            }

            pub fn $at(&self, i: usize, j: usize) -> Result<$t> {
                self.$slice(j)?
                    .get(i)
                    .copied()
                    .ok_or_else(|| Error::Internal(format!("row {i} out of range")))
            }
        )*
    };
}

impl Block {
    pub(crate) fn from_parts(
        bounds: Bounds,
        tags: Tags,
        cols: Vec<ColMeta>,
        data: Vec<ColumnData>,
        nrows: usize,
        reservation: Reservation,
    ) -> Self {
        Self {
            inner: Arc::new(BlockData {
                bounds,
                tags,
                cols,
                data,
                nrows,
                _reservation: reservation,
            }),
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.inner.bounds
    }

    /// Common tags only.
    pub fn tags(&self) -> &Tags {
        &self.inner.tags
    }

    pub fn meta(&self) -> BlockMetadata {
        BlockMetadata::new(self.inner.bounds, self.inner.tags.clone())
    }

    pub fn key(&self) -> BlockKey {
        self.meta().key()
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.inner.cols
    }

    pub fn ncols(&self) -> usize {
        self.inner.cols.len()
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nrows == 0
    }

    /// Live handles to this block.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn column(&self, j: usize) -> Option<&ColumnData> {
        self.inner.data.get(j)
    }

    pub fn value_idx(&self) -> Result<usize> {
        value_idx(self.cols()).ok_or_else(|| Error::Internal("block has no default value column".into()))
    }

    pub fn time_idx(&self) -> Result<usize> {
        time_idx(self.cols()).ok_or_else(|| Error::Internal("block has no time column".into()))
    }

    pub fn value_type(&self) -> Result<DataType> {
        Ok(self.inner.cols[self.value_idx()?].data_type)
    }

    typed_access!(
        (bools, at_bool, Bool, bool),
        (ints, at_int, Int, i64),
        (uints, at_uint, UInt, u64),
        (floats, at_float, Float, f64),
        (times, at_time, Time, Time),
    );

    pub fn strings(&self, j: usize) -> Result<Cow<'_, [String]>> {
        self.inner
            .data
            .get(j)
            .and_then(ColumnData::strings)
            .ok_or_else(|| self.type_error(j, "String"))
    }

    pub fn at_string(&self, i: usize, j: usize) -> Result<&str> {
        self.inner
            .data
            .get(j)
            .and_then(|c| c.at_str(i))
            .ok_or_else(|| self.type_error(j, "String"))
    }

    pub fn value(&self, i: usize, j: usize) -> Value {
        self.inner.data[j].value(i)
    }

    /// Every tag column's value at row `i`, common or not.
    pub fn tags_for_row(&self, i: usize) -> Tags {
        self.inner
            .cols
            .iter()
            .zip(&self.inner.data)
            .filter(|(m, _)| m.is_tag())
            .filter_map(|(m, d)| d.at_str(i).map(|v| (m.label.clone(), v.to_string())))
            .collect()
    }

    /// Row ranges of at most `size` rows covering the block.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = Range<usize>> {
        let n = self.inner.nrows;
        let size = size.max(1);
        (0..n).step_by(size).map(move |s| s..(s + size).min(n))
    }

    fn type_error(&self, j: usize, want: &str) -> Error {
        match self.inner.cols.get(j) {
            Some(m) => Error::Internal(format!(
                "column {} is {}, not {}",
                m.label,
                m.data_type,
                want.to_lowercase()
            )),
            None => Error::Internal(format!("column index {j} out of range")),
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("bounds", &self.inner.bounds)
            .field("tags", &self.inner.tags)
            .field("cols", &self.inner.cols)
            .field("nrows", &self.inner.nrows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockBuilder;
    use chronoflow_mem::Allocator;

    #[test]
    fn key_format() {
        let tags: Tags = [("region", "west"), ("host", "a")].into_iter().collect();
        let m = BlockMetadata::new(Bounds::new(Time(5), Time(10)), tags);
        assert_eq!(m.key().as_str(), "host=a,region=west:5-10");
    }

    #[test]
    fn last_release_returns_storage() {
        let alloc = Allocator::unlimited();
        let mut b = BlockBuilder::new(&alloc);
        b.add_column(ColMeta::value(DataType::Int)).expect("col");
        b.append_ints(0, &[1, 2]).expect("rows");
        let blk = b.block().expect("block");
        drop(b);
        let held = alloc.reserved();
        assert_eq!(held, 16);
        let other = blk.clone();
        assert_eq!(blk.ref_count(), 2);
        drop(blk);
        assert_eq!(alloc.reserved(), held);
        drop(other);
        assert_eq!(alloc.reserved(), 0);
    }

    #[test]
    fn chunks_cover_rows() {
        let mut b = BlockBuilder::new(&Allocator::unlimited());
        b.add_column(ColMeta::value(DataType::Int)).expect("col");
        b.append_ints(0, &[0, 1, 2, 3, 4]).expect("rows");
        let blk = b.block().expect("block");
        let chunks: Vec<_> = blk.chunks(2).collect();
        assert_eq!(chunks, vec![0..2, 2..4, 4..5]);
        assert!(matches!(blk.floats(0), Err(Error::Internal(_))));
    }
}
