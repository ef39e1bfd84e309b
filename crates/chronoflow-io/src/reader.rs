//! The read interface a storage source drives.

use chronoflow_core::Time;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::Frame;
use crate::predicate::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Sum,
    Count,
}

/// Everything the source pushed into the read besides the time range.
///
/// Zero limits mean "no limit".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadSpec {
    pub database: String,
    pub hosts: Vec<String>,
    pub predicate: Option<Predicate>,
    pub points_limit: i64,
    pub series_limit: i64,
    pub series_offset: i64,
    pub descending: bool,
    pub order_by_time: bool,
    pub merge_all: bool,
    pub group_keys: Vec<String>,
    pub group_except: Vec<String>,
    pub aggregate_type: Option<AggregateType>,
}

/// Lazily produced frames of one read. A transport error ends the stream.
pub type FrameStream = Box<dyn Iterator<Item = Result<Frame>> + Send>;

pub trait StorageReader: Send + Sync {
    /// Read `[start, stop)` under `spec`.
    fn read(&self, spec: &ReadSpec, start: Time, stop: Time) -> Result<FrameStream>;
}
