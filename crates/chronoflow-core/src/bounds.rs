//! Half-open time intervals.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::{QueryTime, Time, MAX_TIME, MIN_TIME};

/// `[start, stop)` over resolved time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub start: Time,
    pub stop: Time,
}

impl Bounds {
    pub const fn new(start: Time, stop: Time) -> Self {
        Self { start, stop }
    }

    /// Unbounded on both ends.
    pub const fn all() -> Self {
        Self {
            start: MIN_TIME,
            stop: MAX_TIME,
        }
    }

    pub fn contains(&self, t: Time) -> bool {
        t >= self.start && t < self.stop
    }

    /// True when the two intervals share at least one instant.
    pub fn overlaps(&self, o: &Bounds) -> bool {
        self.start < o.stop && o.start < self.stop
    }

    pub fn equal(&self, o: &Bounds) -> bool {
        self == o
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    /// Smallest interval covering both.
    pub fn union(&self, o: &Bounds) -> Bounds {
        Bounds {
            start: self.start.min(o.start),
            stop: self.stop.max(o.stop),
        }
    }

    /// Clamp `self` into `o`. The result may be empty.
    pub fn intersect(&self, o: &Bounds) -> Bounds {
        Bounds {
            start: self.start.max(o.start),
            stop: self.stop.min(o.stop),
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// Bounds expressed in query time; resolved against *now* at plan time.
///
/// The zero value (both ends `now`) means "not set".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoundsSpec {
    pub start: QueryTime,
    pub stop: QueryTime,
}

impl BoundsSpec {
    pub const fn new(start: QueryTime, stop: QueryTime) -> Self {
        Self { start, stop }
    }

    /// `(min, now)`, as declared by `first`/`last`.
    pub const fn until_now() -> Self {
        Self {
            start: QueryTime::MIN,
            stop: QueryTime::NOW,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == BoundsSpec::default()
    }

    pub fn resolve(&self, now: Time) -> Bounds {
        Bounds {
            start: self.start.resolve(now),
            stop: self.stop.resolve(now),
        }
    }

    /// Widen `self` to cover `o`, comparing resolved times. An empty spec
    /// adopts the other side unchanged.
    pub fn union(&self, o: &BoundsSpec, now: Time) -> BoundsSpec {
        if self.is_empty() {
            return *o;
        }
        if o.is_empty() {
            return *self;
        }
        let start = if self.start.resolve(now) <= o.start.resolve(now) {
            self.start
        } else {
            o.start
        };
        let stop = if self.stop.resolve(now) >= o.stop.resolve(now) {
            self.stop
        } else {
            o.stop
        };
        BoundsSpec { start, stop }
    }
}
