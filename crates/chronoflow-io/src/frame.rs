//! Framed read responses.

use chronoflow_core::{DataType, Tags, Time};
use serde::{Deserialize, Serialize};

/// One frame of a read response. A `Series` frame opens a series; the
/// `Points` frames that follow belong to it until the next `Series`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Series { tags: Tags, data_type: DataType },
    Points(Points),
}

/// Parallel `timestamps`/`values` arrays of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Points {
    Bool { timestamps: Vec<Time>, values: Vec<bool> },
    Int { timestamps: Vec<Time>, values: Vec<i64> },
    #[serde(rename = "uint")]
    UInt { timestamps: Vec<Time>, values: Vec<u64> },
    Float { timestamps: Vec<Time>, values: Vec<f64> },
    String { timestamps: Vec<Time>, values: Vec<String> },
}

impl Points {
    pub fn data_type(&self) -> DataType {
        match self {
            Points::Bool { .. } => DataType::Bool,
            Points::Int { .. } => DataType::Int,
            Points::UInt { .. } => DataType::UInt,
            Points::Float { .. } => DataType::Float,
            Points::String { .. } => DataType::String,
        }
    }

    pub fn timestamps(&self) -> &[Time] {
        match self {
            Points::Bool { timestamps, .. }
            | Points::Int { timestamps, .. }
            | Points::UInt { timestamps, .. }
            | Points::Float { timestamps, .. }
            | Points::String { timestamps, .. } => timestamps,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
