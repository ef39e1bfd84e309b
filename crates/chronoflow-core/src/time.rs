//! Nanosecond time and duration, plus the relative/absolute query time used
//! by operation specs.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Signed nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(pub i64);

/// Signed nanosecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub i64);

pub const MIN_TIME: Time = Time(i64::MIN);
pub const MAX_TIME: Time = Time(i64::MAX);

pub const NANOSECOND: Duration = Duration(1);
pub const MICROSECOND: Duration = Duration(1_000);
pub const MILLISECOND: Duration = Duration(1_000_000);
pub const SECOND: Duration = Duration(1_000_000_000);
pub const MINUTE: Duration = Duration(60 * SECOND.0);
pub const HOUR: Duration = Duration(60 * MINUTE.0);
pub const DAY: Duration = Duration(24 * HOUR.0);
pub const WEEK: Duration = Duration(7 * DAY.0);

impl Time {
    pub const fn from_nanos(ns: i64) -> Self {
        Time(ns)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Wall clock time.
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Time(now.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Round down to a multiple of `d`. Non-positive durations leave the time unchanged.
    pub fn truncate(self, d: Duration) -> Self {
        if d.0 <= 0 {
            return self;
        }
        Time(self.0 - self.0.rem_euclid(d.0))
    }

    /// Round half up to the nearest multiple of `d`.
    pub fn round(self, d: Duration) -> Self {
        if d.0 <= 0 {
            return self;
        }
        let r = self.0.rem_euclid(d.0);
        if r + r < d.0 {
            Time(self.0 - r)
        } else {
            Time((self.0 - r).saturating_add(d.0))
        }
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Time(self.0.saturating_add(d.0))
    }

    pub fn saturating_sub(self, d: Duration) -> Self {
        Time(self.0.saturating_sub(d.0))
    }

    /// Distance between two times, saturating at the i64 limits.
    pub fn since(self, earlier: Time) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Time;
    fn add(self, d: Duration) -> Time {
        self.saturating_add(d)
    }
}

impl Sub<Duration> for Time {
    type Output = Time;
    fn sub(self, d: Duration) -> Time {
        self.saturating_sub(d)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MIN_TIME => f.write_str("-inf"),
            MAX_TIME => f.write_str("+inf"),
            Time(ns) => {
                let dt = chrono::DateTime::from_timestamp_nanos(ns);
                write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl Duration {
    pub const fn from_nanos(ns: i64) -> Self {
        Duration(ns)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn mul(self, n: i64) -> Duration {
        Duration(self.0.saturating_mul(n))
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, o: Duration) -> Duration {
        Duration(self.0.saturating_add(o.0))
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, o: Duration) -> Duration {
        Duration(self.0.saturating_sub(o.0))
    }
}

const UNITS: &[(&str, Duration)] = &[
    ("ns", NANOSECOND),
    ("us", MICROSECOND),
    ("µs", MICROSECOND),
    ("ms", MILLISECOND),
    ("s", SECOND),
    ("m", MINUTE),
    ("h", HOUR),
    ("d", DAY),
    ("w", WEEK),
];

impl FromStr for Duration {
    type Err = Error;

    /// Parses `1h30m`, `-170h`, `10s`, `250ms`, or a bare `0`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (neg, mut rest) = match s.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        if rest == "0" {
            return Ok(Duration(0));
        }
        if rest.is_empty() {
            return Err(Error::ParseError(format!("invalid duration {s:?}")));
        }

        let mut total: i64 = 0;
        while !rest.is_empty() {
            let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            if digits == 0 {
                return Err(Error::ParseError(format!("invalid duration {s:?}")));
            }
            let n: i64 = rest[..digits]
                .parse()
                .map_err(|_| Error::ParseError(format!("invalid duration {s:?}")))?;
            rest = &rest[digits..];
            let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            let scale = UNITS
                .iter()
                .find(|(u, _)| *u == unit)
                .map(|(_, d)| *d)
                .ok_or_else(|| Error::ParseError(format!("unknown unit {unit:?} in duration {s:?}")))?;
            total = n
                .checked_mul(scale.0)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(|| Error::ParseError(format!("duration {s:?} overflows")))?;
            rest = &rest[unit_len..];
        }
        Ok(Duration(if neg { -total } else { total }))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0s");
        }
        let mut rem = self.0.unsigned_abs();
        if self.0 < 0 {
            f.write_str("-")?;
        }
        for (unit, d) in [("h", HOUR), ("m", MINUTE), ("s", SECOND), ("ms", MILLISECOND), ("us", MICROSECOND), ("ns", NANOSECOND)] {
            let d = d.0 as u64;
            if rem >= d {
                write!(f, "{}{}", rem / d, unit)?;
                rem %= d;
            }
        }
        Ok(())
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Nanos(i64),
            Text(String),
        }
        match Repr::deserialize(d)? {
            Repr::Nanos(n) => Ok(Duration(n)),
            Repr::Text(t) => t.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// A time that is either absolute or relative to the query's *now*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTime {
    Relative(Duration),
    Absolute(Time),
}

impl QueryTime {
    pub const NOW: QueryTime = QueryTime::Relative(Duration(0));
    pub const MIN: QueryTime = QueryTime::Absolute(MIN_TIME);
    pub const MAX: QueryTime = QueryTime::Absolute(MAX_TIME);

    pub fn resolve(self, now: Time) -> Time {
        match self {
            QueryTime::Relative(d) => now + d,
            QueryTime::Absolute(t) => t,
        }
    }

    pub fn is_relative(self) -> bool {
        matches!(self, QueryTime::Relative(_))
    }
}

impl Default for QueryTime {
    fn default() -> Self {
        QueryTime::NOW
    }
}

impl FromStr for QueryTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "now" {
            return Ok(QueryTime::NOW);
        }
        if let Ok(d) = s.parse::<Duration>() {
            return Ok(QueryTime::Relative(d));
        }
        let dt = chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|e| Error::ParseError(format!("invalid time {s:?}: {e}")))?;
        let ns = dt
            .timestamp_nanos_opt()
            .ok_or_else(|| Error::ParseError(format!("time {s:?} out of range")))?;
        Ok(QueryTime::Absolute(Time(ns)))
    }
}

impl fmt::Display for QueryTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTime::Relative(d) if d.is_zero() => f.write_str("now"),
            QueryTime::Relative(d) => write!(f, "{d}"),
            QueryTime::Absolute(t) => write!(f, "{t}"),
        }
    }
}

impl Serialize for QueryTime {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            QueryTime::Absolute(t) if *t == MIN_TIME || *t == MAX_TIME => s.serialize_i64(t.0),
            _ => s.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for QueryTime {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Nanos(i64),
            Text(String),
        }
        match Repr::deserialize(d)? {
            Repr::Nanos(n) => Ok(QueryTime::Absolute(Time(n))),
            Repr::Text(t) => t.parse().map_err(serde::de::Error::custom),
        }
    }
}
