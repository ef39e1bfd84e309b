//! In-memory storage backend.
//!
//! Holds typed series per database and answers reads the way the remote
//! storage service does: one series frame followed by points frames, with
//! bounds, predicate, ordering, limits, grouping and aggregates applied.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chronoflow_core::{DataType, Tags, Time, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::frame::{Frame, Points};
use crate::predicate::Matcher;
use crate::reader::{AggregateType, FrameStream, ReadSpec, StorageReader};

/// One stored series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub tags: Tags,
    pub points: Points,
}

#[derive(Default)]
struct State {
    databases: HashMap<String, Vec<Series>>,
    fail_after_frames: Option<usize>,
}

/// Thread-safe in-memory storage. Clones share data.
#[derive(Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
    frame_size: usize,
    reads: Arc<AtomicUsize>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            frame_size: 1000,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Points per points frame.
    pub fn with_frame_size(mut self, n: usize) -> Self {
        self.frame_size = n.max(1);
        self
    }

    pub fn insert(&self, database: &str, tags: Tags, points: Points) {
        let mut st = self.state.write().unwrap_or_else(PoisonError::into_inner);
        st.databases
            .entry(database.to_string())
            .or_default()
            .push(Series { tags, points });
    }

    /// Load `{"db": [{"tags": {...}, "points": {...}}]}`.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        let dbs: HashMap<String, Vec<Series>> = serde_json::from_str(s)?;
        let storage = Self::new();
        {
            let mut st = storage.state.write().unwrap_or_else(PoisonError::into_inner);
            st.databases = dbs;
        }
        Ok(storage)
    }

    /// Every read fails with a transport error after emitting `n` frames.
    pub fn fail_after_frames(&self, n: Option<usize>) {
        let mut st = self.state.write().unwrap_or_else(PoisonError::into_inner);
        st.fail_after_frames = n;
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl StorageReader for MemoryStorage {
    fn read(&self, spec: &ReadSpec, start: Time, stop: Time) -> Result<FrameStream> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let st = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let series = st
            .databases
            .get(&spec.database)
            .ok_or_else(|| StorageError::UnknownDatabase(spec.database.clone()))?;
        let matcher = spec.predicate.as_ref().map(|p| p.matcher()).transpose()?;

        let mut selected: Vec<(Tags, Points)> = Vec::new();
        for s in series {
            if let Some(m) = &matcher {
                if !m.matches(&s.tags, None) {
                    continue;
                }
            }
            let points = select_points(&s.points, &s.tags, start, stop, matcher.as_ref());
            if !points.is_empty() {
                selected.push((s.tags.clone(), points));
            }
        }
        selected.sort_by(|a, b| a.0.key().cmp(&b.0.key()));

        let offset = spec.series_offset.max(0) as usize;
        let mut selected: Vec<_> = selected.into_iter().skip(offset).collect();
        if spec.series_limit > 0 {
            selected.truncate(spec.series_limit as usize);
        }

        let mut grouped = group(selected, spec)?;
        for (_, points) in &mut grouped {
            if spec.descending {
                *points = reverse(points);
            }
            if spec.points_limit > 0 {
                *points = slice(points, 0, spec.points_limit as usize);
            }
            if let Some(agg) = spec.aggregate_type {
                *points = aggregate(points, agg, stop)?;
            }
        }

        let mut frames = Vec::new();
        for (tags, points) in grouped {
            frames.push(Ok(Frame::Series {
                tags,
                data_type: points.data_type(),
            }));
            let n = points.len();
            let mut at = 0;
            while at < n {
                let end = (at + self.frame_size).min(n);
                frames.push(Ok(Frame::Points(slice(&points, at, end))));
                at = end;
            }
        }
        if let Some(limit) = st.fail_after_frames {
            frames.truncate(limit);
            frames.push(Err(StorageError::Transport(format!(
                "connection reset after {limit} frames"
            ))));
        }
        Ok(Box::new(frames.into_iter()))
    }
}

fn keep_indices(points: &Points, tags: &Tags, start: Time, stop: Time, m: Option<&Matcher>) -> Vec<usize> {
    let ts = points.timestamps();
    (0..ts.len())
        .filter(|&i| ts[i] >= start && ts[i] < stop)
        .filter(|&i| m.map_or(true, |m| m.matches(tags, Some(&value_at(points, i)))))
        .collect()
}

fn select_points(points: &Points, tags: &Tags, start: Time, stop: Time, m: Option<&Matcher>) -> Points {
    let idx = keep_indices(points, tags, start, stop, m);
    pick(points, &idx)
}

fn value_at(points: &Points, i: usize) -> Value {
    match points {
        Points::Bool { values, .. } => Value::Bool(values[i]),
        Points::Int { values, .. } => Value::Int(values[i]),
        Points::UInt { values, .. } => Value::UInt(values[i]),
        Points::Float { values, .. } => Value::Float(values[i]),
        Points::String { values, .. } => Value::String(values[i].clone()),
    }
}

macro_rules! map_points {
    ($points:expr, |$ts:ident, $vs:ident| $body:expr) => {
        match $points {
            Points::Bool { timestamps: $ts, values: $vs } => {
                let (timestamps, values) = $body;
                Points::Bool { timestamps, values }
            }
            Points::Int { timestamps: $ts, values: $vs } => {
                let (timestamps, values) = $body;
                Points::Int { timestamps, values }
            }
            Points::UInt { timestamps: $ts, values: $vs } => {
                let (timestamps, values) = $body;
                Points::UInt { timestamps, values }
            }
            Points::Float { timestamps: $ts, values: $vs } => {
                let (timestamps, values) = $body;
                Points::Float { timestamps, values }
            }
            Points::String { timestamps: $ts, values: $vs } => {
                let (timestamps, values) = $body;
                Points::String { timestamps, values }
            }
        }
    };
}

fn pick(points: &Points, idx: &[usize]) -> Points {
    map_points!(points, |ts, vs| (
        idx.iter().map(|&i| ts[i]).collect(),
        idx.iter().map(|&i| vs[i].clone()).collect()
    ))
}

fn slice(points: &Points, from: usize, to: usize) -> Points {
    let to = to.min(points.len());
    let idx: Vec<usize> = (from..to).collect();
    pick(points, &idx)
}

fn reverse(points: &Points) -> Points {
    let idx: Vec<usize> = (0..points.len()).rev().collect();
    pick(points, &idx)
}

/// Merges series by group key. Without grouping every series stands alone.
fn group(selected: Vec<(Tags, Points)>, spec: &ReadSpec) -> Result<Vec<(Tags, Points)>> {
    let grouping = spec.merge_all || !spec.group_keys.is_empty() || !spec.group_except.is_empty();
    if !grouping {
        return Ok(selected);
    }
    let mut groups: BTreeMap<String, (Tags, Vec<Points>)> = BTreeMap::new();
    for (tags, points) in selected {
        let key_tags = if spec.merge_all {
            Tags::new()
        } else if !spec.group_keys.is_empty() {
            tags.intersecting_subset(&spec.group_keys)
        } else {
            tags.except(&spec.group_except)
        };
        groups
            .entry(key_tags.key().as_str().to_string())
            .or_insert_with(|| (key_tags, Vec::new()))
            .1
            .push(points);
    }
    groups
        .into_values()
        .map(|(tags, parts)| Ok((tags, merge(parts)?)))
        .collect()
}

fn merge(parts: Vec<Points>) -> Result<Points> {
    let mut rows: Vec<(Time, Value)> = Vec::new();
    let mut data_type = None;
    for p in &parts {
        match data_type {
            None => data_type = Some(p.data_type()),
            Some(t) if t != p.data_type() => {
                return Err(StorageError::Unsupported(format!(
                    "cannot merge {} and {} series",
                    t,
                    p.data_type()
                )))
            }
            _ => {}
        }
        for i in 0..p.len() {
            rows.push((p.timestamps()[i], value_at(p, i)));
        }
    }
    rows.sort_by_key(|(t, _)| *t);
    let data_type = data_type.unwrap_or(DataType::Float);
    from_rows(data_type, rows)
}

fn from_rows(data_type: DataType, rows: Vec<(Time, Value)>) -> Result<Points> {
    let timestamps: Vec<Time> = rows.iter().map(|(t, _)| *t).collect();
    macro_rules! collect {
        ($variant:ident) => {
            Points::$variant {
                timestamps,
                values: rows
                    .into_iter()
                    .filter_map(|(_, v)| match v {
                        Value::$variant(x) => Some(x),
                        _ => None,
                    })
                    .collect(),
            }
        };
    }
    Ok(match data_type {
        DataType::Bool => collect!(Bool),
        DataType::Int => collect!(Int),
        DataType::UInt => collect!(UInt),
        DataType::Float => collect!(Float),
        DataType::String => collect!(String),
        DataType::Time => {
            return Err(StorageError::Unsupported("time valued series".into()));
        }
    })
}

/// One point at `stop` holding the aggregate of the series.
fn aggregate(points: &Points, agg: AggregateType, stop: Time) -> Result<Points> {
    let timestamps = vec![stop];
    Ok(match (agg, points) {
        (AggregateType::Count, p) => Points::Int {
            timestamps,
            values: vec![p.len() as i64],
        },
        (AggregateType::Sum, Points::Int { values, .. }) => Points::Int {
            timestamps,
            values: vec![values.iter().fold(0i64, |a, v| a.wrapping_add(*v))],
        },
        (AggregateType::Sum, Points::UInt { values, .. }) => Points::UInt {
            timestamps,
            values: vec![values.iter().fold(0u64, |a, v| a.wrapping_add(*v))],
        },
        (AggregateType::Sum, Points::Float { values, .. }) => Points::Float {
            timestamps,
            values: vec![values.iter().sum()],
        },
        (AggregateType::Sum, p) => {
            return Err(StorageError::Unsupported(format!(
                "sum of {} series",
                p.data_type()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;
    use chronoflow_core::expression::{BinaryOp, Expression as E};

    fn storage() -> MemoryStorage {
        let s = MemoryStorage::new().with_frame_size(2);
        for (host, base) in [("a", 0.0), ("b", 10.0)] {
            s.insert(
                "db",
                [("host", host), ("_measurement", "cpu")].into_iter().collect(),
                Points::Float {
                    timestamps: (0..5).map(Time).collect(),
                    values: (0..5).map(|i| base + i as f64).collect(),
                },
            );
        }
        s
    }

    fn collect(s: &MemoryStorage, spec: &ReadSpec, start: i64, stop: i64) -> Vec<Frame> {
        s.read(spec, Time(start), Time(stop))
            .expect("read")
            .collect::<Result<Vec<_>>>()
            .expect("frames")
    }

    fn spec() -> ReadSpec {
        ReadSpec {
            database: "db".into(),
            ..ReadSpec::default()
        }
    }

    #[test]
    fn frames_are_series_then_points() {
        let frames = collect(&storage(), &spec(), 1, 4);
        assert_eq!(frames.len(), 6);
        assert!(matches!(frames[0], Frame::Series { .. }));
        assert!(matches!(&frames[1], Frame::Points(p) if p.len() == 2));
        assert!(matches!(&frames[2], Frame::Points(p) if p.len() == 1));
        assert!(matches!(frames[3], Frame::Series { .. }));
    }

    #[test]
    fn predicate_and_limits() {
        let mut sp = spec();
        sp.predicate = Some(
            Predicate::from_expression(&E::binary(BinaryOp::Eq, E::reference("host"), E::string("b")))
                .expect("pred"),
        );
        sp.points_limit = 1;
        sp.descending = true;
        let frames = collect(&storage(), &sp, 0, 5);
        assert_eq!(
            frames[1],
            Frame::Points(Points::Float {
                timestamps: vec![Time(4)],
                values: vec![14.0]
            })
        );
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn merge_all_and_sum() {
        let mut sp = spec();
        sp.merge_all = true;
        sp.aggregate_type = Some(AggregateType::Sum);
        let frames = collect(&storage(), &sp, 0, 5);
        assert_eq!(
            frames,
            vec![
                Frame::Series {
                    tags: Tags::new(),
                    data_type: DataType::Float
                },
                Frame::Points(Points::Float {
                    timestamps: vec![Time(5)],
                    values: vec![70.0]
                })
            ]
        );
    }

    #[test]
    fn injected_failure_ends_stream() {
        let s = storage();
        s.fail_after_frames(Some(1));
        let out: Vec<_> = s.read(&spec(), Time(0), Time(5)).expect("read").collect();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(StorageError::Transport(_))));
    }

    #[test]
    fn unknown_database() {
        let mut sp = spec();
        sp.database = "nope".into();
        assert!(matches!(
            storage().read(&sp, Time(0), Time(1)),
            Err(StorageError::UnknownDatabase(_))
        ));
    }
}
