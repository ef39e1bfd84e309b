//! Storage-backed sources.
//!
//! A source runs on its own thread because reads may block on the storage
//! transport. It turns each series of a read into one block and pushes the
//! blocks straight into its outputs' transports.

use std::thread;
use std::time::Duration as StdDuration;

use chronoflow_block::BlockBuilder;
use chronoflow_core::{Bounds, ColMeta, DataType, Duration, Error, Result, Tags, Time};
use chronoflow_io::{Frame, Points, ReadSpec};
use tracing::{debug, trace};

use crate::context::SourceContext;
use crate::metrics;
use crate::transformation::Message;

pub trait Source: Send {
    /// Drives the source to completion. Always ends with a `Finish`.
    fn run(self: Box<Self>);
}

/// Window of a storage read; every window is read separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    pub every: Duration,
    pub period: Duration,
}

pub struct StorageSource {
    ctx: SourceContext,
    spec: ReadSpec,
    bounds: Bounds,
    window: Option<ReadWindow>,
}

impl StorageSource {
    pub fn new(ctx: SourceContext, spec: ReadSpec, bounds: Bounds, window: Option<ReadWindow>) -> Self {
        Self {
            ctx,
            spec,
            bounds,
            window,
        }
    }

    /// Bounds of each read, in order.
    pub fn windows(&self) -> Vec<Bounds> {
        let Some(w) = self.window.filter(|w| w.every.0 > 0 && w.period.0 > 0) else {
            return vec![self.bounds];
        };
        let mut out = Vec::new();
        let mut start = self.bounds.start;
        let mut stop = start.saturating_add(w.period);
        while stop <= self.bounds.stop {
            out.push(Bounds::new(start, stop));
            let next = stop.saturating_add(w.every);
            if next == stop {
                break;
            }
            start = start.saturating_add(w.every);
            stop = next;
        }
        out
    }

    fn check_canceled(&self) -> Result<()> {
        if self.ctx.cancel.is_canceled() {
            return Err(Error::Canceled);
        }
        Ok(())
    }

    fn read_all(&self) -> Result<()> {
        for bounds in self.windows() {
            self.check_canceled()?;
            trace!(source = %self.ctx.name, %bounds, "read");
            let frames = self.ctx.reader.read(&self.spec, bounds.start, bounds.stop)?;
            let mut current: Option<BlockBuilder> = None;
            for frame in frames {
                self.check_canceled()?;
                match frame? {
                    Frame::Series { tags, data_type } => {
                        if let Some(b) = current.take() {
                            self.emit(b)?;
                        }
                        current = Some(self.series_builder(bounds, &tags, data_type)?);
                    }
                    Frame::Points(points) => {
                        let b = current.as_mut().ok_or_else(|| {
                            Error::StorageRead("points frame before any series frame".into())
                        })?;
                        append_points(b, &points)?;
                    }
                }
            }
            if let Some(b) = current.take() {
                self.emit(b)?;
            }
        }
        Ok(())
    }

    fn series_builder(&self, bounds: Bounds, tags: &Tags, data_type: DataType) -> Result<BlockBuilder> {
        let mut b = BlockBuilder::new(&self.ctx.allocator);
        b.set_bounds(bounds);
        b.add_column(ColMeta::time())?;
        b.add_column(ColMeta::value(data_type))?;
        chronoflow_block::helpers::add_tags(tags, &mut b)?;
        Ok(b)
    }

    fn emit(&self, builder: BlockBuilder) -> Result<()> {
        let block = builder.block()?;
        drop(builder);
        while self.ctx.outputs.iter().any(|o| o.is_full()) {
            self.check_canceled()?;
            metrics::deferred();
            thread::sleep(StdDuration::from_millis(1));
        }
        for o in &self.ctx.outputs {
            o.push(Message::Process {
                src: self.ctx.id,
                block: block.clone(),
            });
        }
        let now = Time::now();
        for o in &self.ctx.outputs {
            o.push(Message::UpdateProcessingTime {
                src: self.ctx.id,
                time: now,
            });
        }
        Ok(())
    }
}

impl Source for StorageSource {
    fn run(self: Box<Self>) {
        let err = self.read_all().err();
        match &err {
            None => {
                for o in &self.ctx.outputs {
                    o.push(Message::UpdateWatermark {
                        src: self.ctx.id,
                        time: self.bounds.stop,
                    });
                }
                debug!(source = %self.ctx.name, "source finished");
            }
            Some(e) => debug!(source = %self.ctx.name, error = %e, "source failed"),
        }
        for o in &self.ctx.outputs {
            o.push(Message::Finish {
                src: self.ctx.id,
                err: err.clone(),
            });
        }
    }
}

fn append_points(b: &mut BlockBuilder, points: &Points) -> Result<()> {
    b.append_times(0, points.timestamps())?;
    match points {
        Points::Bool { values, .. } => b.append_bools(1, values),
        Points::Int { values, .. } => b.append_ints(1, values),
        Points::UInt { values, .. } => b.append_uints(1, values),
        Points::Float { values, .. } => b.append_floats(1, values),
        Points::String { values, .. } => b.append_strings(1, values),
    }
}
