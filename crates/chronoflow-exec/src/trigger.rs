//! Triggers decide when a builder's contents are flushed downstream and
//! when its key is finished.

use chronoflow_core::{Bounds, Duration, Time};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    AfterWatermark {
        #[serde(default)]
        allowed_lateness: Duration,
    },
    Repeated {
        trigger: Box<TriggerSpec>,
    },
    AfterProcessingTime {
        duration: Duration,
    },
    AfterAtLeastCount {
        count: usize,
    },
    OrFinally {
        main: Box<TriggerSpec>,
        finally: Box<TriggerSpec>,
    },
}

impl Default for TriggerSpec {
    fn default() -> Self {
        TriggerSpec::AfterWatermark {
            allowed_lateness: Duration::default(),
        }
    }
}

/// What a trigger sees about one builder.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext {
    pub bounds: Bounds,
    pub nrows: usize,
    pub watermark: Time,
    pub processing_time: Time,
}

#[derive(Debug, Clone)]
pub enum Trigger {
    AfterWatermark {
        lateness: Duration,
        finished: bool,
    },
    Repeated(Box<Trigger>),
    AfterProcessingTime {
        duration: Duration,
        fire_at: Option<Time>,
        current: Time,
    },
    AfterAtLeastCount {
        count: usize,
        rows: usize,
    },
    OrFinally {
        main: Box<Trigger>,
        finally: Box<Trigger>,
        finished: bool,
    },
}

impl Trigger {
    pub fn from_spec(spec: &TriggerSpec) -> Trigger {
        match spec {
            TriggerSpec::AfterWatermark { allowed_lateness } => Trigger::AfterWatermark {
                lateness: *allowed_lateness,
                finished: false,
            },
            TriggerSpec::Repeated { trigger } => {
                Trigger::Repeated(Box::new(Trigger::from_spec(trigger)))
            }
            TriggerSpec::AfterProcessingTime { duration } => Trigger::AfterProcessingTime {
                duration: *duration,
                fire_at: None,
                current: Time::default(),
            },
            TriggerSpec::AfterAtLeastCount { count } => Trigger::AfterAtLeastCount {
                count: *count,
                rows: 0,
            },
            TriggerSpec::OrFinally { main, finally } => Trigger::OrFinally {
                main: Box::new(Trigger::from_spec(main)),
                finally: Box::new(Trigger::from_spec(finally)),
                finished: false,
            },
        }
    }

    pub fn triggered(&mut self, c: &TriggerContext) -> bool {
        match self {
            Trigger::AfterWatermark { lateness, finished } => {
                if c.watermark >= c.bounds.stop.saturating_add(*lateness) {
                    *finished = true;
                }
                c.watermark >= c.bounds.stop
            }
            Trigger::Repeated(t) => t.triggered(c),
            Trigger::AfterProcessingTime {
                duration,
                fire_at,
                current,
            } => {
                let at = *fire_at.get_or_insert(c.processing_time.saturating_add(*duration));
                *current = c.processing_time;
                *current >= at
            }
            Trigger::AfterAtLeastCount { count, rows } => {
                *rows = c.nrows;
                *rows >= *count
            }
            Trigger::OrFinally {
                main,
                finally,
                finished,
            } => {
                if finally.triggered(c) {
                    *finished = true;
                    return true;
                }
                main.triggered(c)
            }
        }
    }

    /// Whether the key may be expired. A repeated trigger resets its inner
    /// trigger instead and never finishes.
    pub fn finished(&mut self) -> bool {
        match self {
            Trigger::AfterWatermark { finished, .. } => *finished,
            Trigger::Repeated(t) => {
                if t.finished() {
                    t.reset();
                }
                false
            }
            Trigger::AfterProcessingTime {
                fire_at, current, ..
            } => fire_at.is_some_and(|at| *current >= at),
            Trigger::AfterAtLeastCount { count, rows } => *rows >= *count,
            Trigger::OrFinally { finished, .. } => *finished,
        }
    }

    pub fn reset(&mut self) {
        match self {
            Trigger::AfterWatermark { finished, .. } | Trigger::OrFinally { finished, .. } => {
                *finished = false
            }
            Trigger::Repeated(t) => t.reset(),
            Trigger::AfterProcessingTime { fire_at, .. } => *fire_at = None,
            Trigger::AfterAtLeastCount { rows, .. } => *rows = 0,
        }
    }
}
