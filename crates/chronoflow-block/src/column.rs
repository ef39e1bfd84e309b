//! Typed column buffers.

use std::borrow::Cow;
use std::cmp::Ordering;

use chronoflow_core::{ColMeta, DataType, Error, Result, Time, Value};

/// Backing storage of one column.
///
/// Common tag columns hold a single value and a virtual length.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    String(Vec<String>),
    Time(Vec<Time>),
    CommonString { value: String, len: usize },
}

pub(crate) const STRING_OVERHEAD: usize = std::mem::size_of::<String>();

impl ColumnData {
    pub fn for_meta(meta: &ColMeta) -> Self {
        match meta.data_type {
            DataType::Bool => ColumnData::Bool(Vec::new()),
            DataType::Int => ColumnData::Int(Vec::new()),
            DataType::UInt => ColumnData::UInt(Vec::new()),
            DataType::Float => ColumnData::Float(Vec::new()),
            DataType::String if meta.common => ColumnData::CommonString {
                value: String::new(),
                len: 0,
            },
            DataType::String => ColumnData::String(Vec::new()),
            DataType::Time => ColumnData::Time(Vec::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Int(_) => DataType::Int,
            ColumnData::UInt(_) => DataType::UInt,
            ColumnData::Float(_) => DataType::Float,
            ColumnData::String(_) | ColumnData::CommonString { .. } => DataType::String,
            ColumnData::Time(_) => DataType::Time,
        }
    }

    pub fn is_common(&self) -> bool {
        matches!(self, ColumnData::CommonString { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::UInt(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::String(v) => v.len(),
            ColumnData::Time(v) => v.len(),
            ColumnData::CommonString { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all rows. A common column keeps its value.
    pub fn clear(&mut self) {
        match self {
            ColumnData::Bool(v) => v.clear(),
            ColumnData::Int(v) => v.clear(),
            ColumnData::UInt(v) => v.clear(),
            ColumnData::Float(v) => v.clear(),
            ColumnData::String(v) => v.clear(),
            ColumnData::Time(v) => v.clear(),
            ColumnData::CommonString { len, .. } => *len = 0,
        }
    }

    /// Bytes accounted against the allocator for this column.
    pub fn byte_size(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int(v) => v.len() * 8,
            ColumnData::UInt(v) => v.len() * 8,
            ColumnData::Float(v) => v.len() * 8,
            ColumnData::Time(v) => v.len() * 8,
            ColumnData::String(v) => v.iter().map(|s| s.len() + STRING_OVERHEAD).sum(),
            ColumnData::CommonString { value, .. } => value.len() + STRING_OVERHEAD,
        }
    }

    pub fn compare(&self, i: usize, j: usize) -> Ordering {
        match self {
            ColumnData::Bool(v) => v[i].cmp(&v[j]),
            ColumnData::Int(v) => v[i].cmp(&v[j]),
            ColumnData::UInt(v) => v[i].cmp(&v[j]),
            ColumnData::Float(v) => v[i].total_cmp(&v[j]),
            ColumnData::String(v) => v[i].cmp(&v[j]),
            ColumnData::Time(v) => v[i].cmp(&v[j]),
            ColumnData::CommonString { .. } => Ordering::Equal,
        }
    }

    pub fn less(&self, i: usize, j: usize) -> bool {
        self.compare(i, j) == Ordering::Less
    }

    pub fn equal(&self, i: usize, j: usize) -> bool {
        self.compare(i, j) == Ordering::Equal
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        match self {
            ColumnData::Bool(v) => v.swap(i, j),
            ColumnData::Int(v) => v.swap(i, j),
            ColumnData::UInt(v) => v.swap(i, j),
            ColumnData::Float(v) => v.swap(i, j),
            ColumnData::String(v) => v.swap(i, j),
            ColumnData::Time(v) => v.swap(i, j),
            ColumnData::CommonString { .. } => {}
        }
    }

    /// Reorder rows so that new row `k` is old row `perm[k]`.
    pub(crate) fn permute(&mut self, perm: &[usize]) {
        fn apply<T: Clone>(v: &mut Vec<T>, perm: &[usize]) {
            let reordered: Vec<T> = perm.iter().map(|&i| v[i].clone()).collect();
            *v = reordered;
        }
        match self {
            ColumnData::Bool(v) => apply(v, perm),
            ColumnData::Int(v) => apply(v, perm),
            ColumnData::UInt(v) => apply(v, perm),
            ColumnData::Float(v) => apply(v, perm),
            ColumnData::String(v) => apply(v, perm),
            ColumnData::Time(v) => apply(v, perm),
            ColumnData::CommonString { .. } => {}
        }
    }

    pub fn value(&self, i: usize) -> Value {
        match self {
            ColumnData::Bool(v) => Value::Bool(v[i]),
            ColumnData::Int(v) => Value::Int(v[i]),
            ColumnData::UInt(v) => Value::UInt(v[i]),
            ColumnData::Float(v) => Value::Float(v[i]),
            ColumnData::String(v) => Value::String(v[i].clone()),
            ColumnData::Time(v) => Value::Time(v[i]),
            ColumnData::CommonString { value, .. } => Value::String(value.clone()),
        }
    }

    pub fn at_str(&self, i: usize) -> Option<&str> {
        match self {
            ColumnData::String(v) => v.get(i).map(String::as_str),
            ColumnData::CommonString { value, len } if i < *len => Some(value.as_str()),
            _ => None,
        }
    }

    /// String rows; a common column synthesizes its virtual slice.
    pub fn strings(&self) -> Option<Cow<'_, [String]>> {
        match self {
            ColumnData::String(v) => Some(Cow::Borrowed(v)),
            ColumnData::CommonString { value, len } => Some(Cow::Owned(vec![value.clone(); *len])),
            _ => None,
        }
    }

    /// Append one row of `src`. Types must match.
    pub(crate) fn push_from(&mut self, src: &ColumnData, i: usize) -> Result<()> {
        match (self, src) {
            (ColumnData::Bool(d), ColumnData::Bool(s)) => d.push(s[i]),
            (ColumnData::Int(d), ColumnData::Int(s)) => d.push(s[i]),
            (ColumnData::UInt(d), ColumnData::UInt(s)) => d.push(s[i]),
            (ColumnData::Float(d), ColumnData::Float(s)) => d.push(s[i]),
            (ColumnData::Time(d), ColumnData::Time(s)) => d.push(s[i]),
            (ColumnData::String(d), ColumnData::String(s)) => d.push(s[i].clone()),
            (ColumnData::String(d), ColumnData::CommonString { value, .. }) => d.push(value.clone()),
            (d, s) => {
                return Err(Error::Internal(format!(
                    "cannot append {} row to {} column",
                    s.data_type(),
                    d.data_type()
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_column_synthesizes_rows() {
        let c = ColumnData::CommonString {
            value: "a".into(),
            len: 3,
        };
        assert_eq!(c.len(), 3);
        assert_eq!(c.at_str(2), Some("a"));
        assert_eq!(c.at_str(3), None);
        assert_eq!(c.strings().map(|s| s.len()), Some(3));
    }

    #[test]
    fn compare_swap_permute() {
        let mut c = ColumnData::Float(vec![3.0, 1.0, 2.0]);
        assert!(c.less(1, 0));
        assert!(c.equal(2, 2));
        c.swap(0, 1);
        assert_eq!(c, ColumnData::Float(vec![1.0, 3.0, 2.0]));
        c.permute(&[0, 2, 1]);
        assert_eq!(c, ColumnData::Float(vec![1.0, 2.0, 3.0]));
    }
}
