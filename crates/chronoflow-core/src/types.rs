//! Column value types, column metadata and the dynamically typed `Value`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::Time;

/// Label of the time column.
pub const TIME_COL: &str = "_time";
/// Label of the default value column.
pub const VALUE_COL: &str = "_value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int,
    UInt,
    Float,
    String,
    Time,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::UInt => "uint",
            DataType::Float => "float",
            DataType::String => "string",
            DataType::Time => "time",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int | DataType::UInt | DataType::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColKind {
    Time,
    Tag,
    Value,
}

/// Column metadata. `common` is only meaningful for tag columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColMeta {
    pub label: String,
    pub data_type: DataType,
    pub kind: ColKind,
    #[serde(default)]
    pub common: bool,
}

impl ColMeta {
    pub fn time() -> Self {
        Self {
            label: TIME_COL.to_string(),
            data_type: DataType::Time,
            kind: ColKind::Time,
            common: false,
        }
    }

    pub fn value(data_type: DataType) -> Self {
        Self::value_labeled(VALUE_COL, data_type)
    }

    pub fn value_labeled(label: impl Into<String>, data_type: DataType) -> Self {
        Self {
            label: label.into(),
            data_type,
            kind: ColKind::Value,
            common: false,
        }
    }

    pub fn tag(label: impl Into<String>, common: bool) -> Self {
        Self {
            label: label.into(),
            data_type: DataType::String,
            kind: ColKind::Tag,
            common,
        }
    }

    pub fn is_tag(&self) -> bool {
        self.kind == ColKind::Tag
    }

    pub fn is_common_tag(&self) -> bool {
        self.kind == ColKind::Tag && self.common
    }
}

/// One cell of any column type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Time(Time),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int,
            Value::UInt(_) => DataType::UInt,
            Value::Float(_) => DataType::Float,
            Value::String(_) => DataType::String,
            Value::Time(_) => DataType::Time,
        }
    }

    /// The value padding a column of `data_type` on rows that lack it.
    pub fn zero(data_type: DataType) -> Value {
        match data_type {
            DataType::Bool => Value::Bool(false),
            DataType::Int => Value::Int(0),
            DataType::UInt => Value::UInt(0),
            DataType::Float => Value::Float(0.0),
            DataType::String => Value::String(String::new()),
            DataType::Time => Value::Time(Time(0)),
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Total order within one type; `None` across types. Floats use `total_cmp`.
    pub fn compare(&self, o: &Value) -> Option<Ordering> {
        Some(match (self, o) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            _ => return None,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Time(v) => write!(f, "{v}"),
        }
    }
}
