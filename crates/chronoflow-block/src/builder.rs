//! Mutable accumulator producing one [`Block`].

use std::cmp::Ordering;

use chronoflow_core::{Bounds, ColMeta, DataType, Error, Result, Tags, Time, Value};
use chronoflow_mem::{Allocator, Reservation};

use crate::block::{Block, BlockMetadata};
use crate::column::{ColumnData, STRING_OVERHEAD};
use crate::helpers::col_idx;

/// Rows are appended column by column; equal column lengths are only
/// checked when the block is finalized.
#[derive(Debug)]
pub struct BlockBuilder {
    bounds: Bounds,
    tags: Tags,
    cols: Vec<ColMeta>,
    data: Vec<ColumnData>,
    reservation: Reservation,
}

macro_rules! fixed_width_appenders {
    ($(($one:ident, $many:ident, $variant:ident, $t:ty, $dt:expr)),* $(,)?) => {
        $(
            pub fn $one(&mut self, j: usize, v: $t) -> Result<()> {
                self.check_type(j, $dt)?;
                self.grow(std::mem::size_of::<$t>())?;
                if let Some(ColumnData::$variant(d)) = self.data.get_mut(j) {
                    d.push(v);
                }
                Ok(())
            }

            pub fn $many(&mut self, j: usize, vs: &[$t]) -> Result<()> {
                self.check_type(j, $dt)?;
                self.grow(std::mem::size_of::<$t>() * vs.len())?;
                if let Some(ColumnData::$variant(d)) = self.data.get_mut(j) {
                    d.extend_from_slice(vs);
                }
                Ok(())
            }
        )*
    };
}

impl BlockBuilder {
    pub fn new(alloc: &Allocator) -> Self {
        Self {
            bounds: Bounds::default(),
            tags: Tags::new(),
            cols: Vec::new(),
            data: Vec::new(),
            reservation: alloc.empty("builder"),
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = bounds;
    }

    /// Values of the common tag columns set so far.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn meta(&self) -> BlockMetadata {
        BlockMetadata::new(self.bounds, self.tags.clone())
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn ncols(&self) -> usize {
        self.cols.len()
    }

    pub fn column(&self, j: usize) -> Option<&ColumnData> {
        self.data.get(j)
    }

    /// Longest non-common column.
    pub fn nrows(&self) -> usize {
        self.data
            .iter()
            .filter(|d| !d.is_common())
            .map(ColumnData::len)
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.nrows() == 0
    }

    /// Bytes held against the allocator.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.bytes()
    }

    /// Adds a column and returns its index. A label that already exists
    /// returns the existing index.
    pub fn add_column(&mut self, meta: ColMeta) -> Result<usize> {
        if let Some(j) = col_idx(&meta.label, &self.cols) {
            return Ok(j);
        }
        self.data.push(ColumnData::for_meta(&meta));
        self.cols.push(meta);
        self.resync()?;
        Ok(self.cols.len() - 1)
    }

    /// Sets the one value of a common column. Setting a different value
    /// than before fails.
    pub fn set_common_string(&mut self, j: usize, value: &str) -> Result<()> {
        self.check_type(j, DataType::String)?;
        let meta = &self.cols[j];
        if !meta.common {
            return Err(Error::Internal(format!(
                "cannot set common value for column {}, column is not marked as common",
                meta.label
            )));
        }
        if let Some(existing) = self.tags.get(&meta.label) {
            if existing != value {
                return Err(Error::IncompatibleCommonValue {
                    label: meta.label.clone(),
                    existing: existing.to_string(),
                    new: value.to_string(),
                });
            }
            return Ok(());
        }
        let label = meta.label.clone();
        if let Some(ColumnData::CommonString { value: v, .. }) = self.data.get_mut(j) {
            *v = value.to_string();
        }
        if self.cols[j].is_tag() {
            self.tags.insert(label, value);
        }
        self.resync()
    }

    fixed_width_appenders!(
        (append_bool, append_bools, Bool, bool, DataType::Bool),
        (append_int, append_ints, Int, i64, DataType::Int),
        (append_uint, append_uints, UInt, u64, DataType::UInt),
        (append_float, append_floats, Float, f64, DataType::Float),
        (append_time, append_times, Time, Time, DataType::Time),
    );

    /// Appends to a string column. On a common column the value must match
    /// the common value (or becomes it, if none was set yet).
    pub fn append_string(&mut self, j: usize, v: &str) -> Result<()> {
        self.check_type(j, DataType::String)?;
        if self.cols[j].common {
            return self.set_common_string(j, v);
        }
        self.grow(v.len() + STRING_OVERHEAD)?;
        if let Some(ColumnData::String(d)) = self.data.get_mut(j) {
            d.push(v.to_string());
        }
        Ok(())
    }

    pub fn append_strings(&mut self, j: usize, vs: &[String]) -> Result<()> {
        for v in vs {
            self.append_string(j, v)?;
        }
        Ok(())
    }

    pub fn append_value(&mut self, j: usize, v: &Value) -> Result<()> {
        match v {
            Value::Bool(b) => self.append_bool(j, *b),
            Value::Int(i) => self.append_int(j, *i),
            Value::UInt(u) => self.append_uint(j, *u),
            Value::Float(f) => self.append_float(j, *f),
            Value::String(s) => self.append_string(j, s),
            Value::Time(t) => self.append_time(j, *t),
        }
    }

    /// Appends row `i` of `src` to column `j`.
    pub fn append_from(&mut self, j: usize, src: &ColumnData, i: usize) -> Result<()> {
        self.check_type(j, src.data_type())?;
        if self.cols[j].common {
            let v = src.at_str(i).unwrap_or_default().to_string();
            return self.set_common_string(j, &v);
        }
        let bytes = match src {
            ColumnData::Bool(_) => 1,
            ColumnData::String(s) => s[i].len() + STRING_OVERHEAD,
            ColumnData::CommonString { value, .. } => value.len() + STRING_OVERHEAD,
            _ => 8,
        };
        self.grow(bytes)?;
        self.data[j].push_from(src, i)
    }

    /// Stable joint sort of all columns by `cols` (labels) in order.
    /// Unknown labels are ignored.
    pub fn sort(&mut self, cols: &[String], desc: bool) -> Result<()> {
        let n = self.check_lengths()?;
        let keys: Vec<usize> = cols.iter().filter_map(|l| col_idx(l, &self.cols)).collect();
        let mut perm: Vec<usize> = (0..n).collect();
        let data = &self.data;
        perm.sort_by(|&a, &b| {
            let mut o = Ordering::Equal;
            for &j in &keys {
                o = data[j].compare(a, b);
                if o != Ordering::Equal {
                    break;
                }
            }
            if desc {
                o.reverse()
            } else {
                o
            }
        });
        for d in &mut self.data {
            d.permute(&perm);
        }
        Ok(())
    }

    /// Deep copy of the current state as an immutable block.
    pub fn block(&self) -> Result<Block> {
        let nrows = self.check_lengths()?;
        let mut data = self.data.clone();
        for d in &mut data {
            if let ColumnData::CommonString { len, .. } = d {
                *len = nrows;
            }
        }
        let bytes = data.iter().map(ColumnData::byte_size).sum();
        let mut reservation = self.reservation.sibling("block");
        reservation.resize(bytes)?;
        Ok(Block::from_parts(
            self.bounds,
            self.tags.clone(),
            self.cols.clone(),
            data,
            nrows,
            reservation,
        ))
    }

    /// Drops all rows but keeps columns and common values.
    pub fn clear_data(&mut self) {
        for d in &mut self.data {
            d.clear();
        }
        let _ = self.resync();
    }

    fn check_lengths(&self) -> Result<usize> {
        let nrows = self.nrows();
        for (meta, d) in self.cols.iter().zip(&self.data) {
            if !d.is_common() && d.len() != nrows {
                return Err(Error::Internal(format!(
                    "column {} has {} rows, expected {}",
                    meta.label,
                    d.len(),
                    nrows
                )));
            }
        }
        Ok(nrows)
    }

    fn check_type(&self, j: usize, dt: DataType) -> Result<()> {
        let meta = self
            .cols
            .get(j)
            .ok_or_else(|| Error::Internal(format!("column index {j} out of range")))?;
        if meta.data_type != dt {
            return Err(Error::Internal(format!(
                "column {} is not of type {}",
                meta.label, dt
            )));
        }
        Ok(())
    }

    fn grow(&mut self, bytes: usize) -> Result<()> {
        let cur = self.reserved_bytes();
        Ok(self.reservation.resize(cur + bytes)?)
    }

    fn resync(&mut self) -> Result<()> {
        let bytes = self.data.iter().map(ColumnData::byte_size).sum();
        Ok(self.reservation.resize(bytes)?)
    }
}
