//! The output side of a transformation: a builder cache driven by triggers.

use std::sync::Arc;

use chronoflow_block::{BlockBuilder, BlockKey, BlockMetadata};
use chronoflow_core::id::DatasetId;
use chronoflow_core::time::MIN_TIME;
use chronoflow_core::{Error, Result, Time};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cache::BuilderCache;
use crate::metrics;
use crate::transformation::{Downstream, Message};
use crate::trigger::TriggerContext;

/// What happens to a builder's rows after a trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationMode {
    /// Rows are dropped once emitted.
    Discarding,
    /// Rows are kept; each firing re-emits everything so far.
    #[default]
    Accumulating,
    /// Like `Accumulating`, but a retraction of the previous emission is
    /// sent before each re-emission.
    AccumulatingRetracting,
}

pub struct Dataset {
    id: DatasetId,
    mode: AccumulationMode,
    cache: BuilderCache,
    watermark: Time,
    processing_time: Time,
    downstream: Vec<Arc<dyn Downstream>>,
}

impl Dataset {
    pub fn new(id: DatasetId, mode: AccumulationMode, cache: BuilderCache) -> Self {
        Self {
            id,
            mode,
            cache,
            watermark: MIN_TIME,
            processing_time: MIN_TIME,
            downstream: Vec::new(),
        }
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn mode(&self) -> AccumulationMode {
        self.mode
    }

    pub fn add_downstream(&mut self, d: Arc<dyn Downstream>) {
        self.downstream.push(d);
    }

    pub fn watermark(&self) -> Time {
        self.watermark
    }

    pub fn processing_time(&self) -> Time {
        self.processing_time
    }

    pub fn cache(&mut self) -> &mut BuilderCache {
        &mut self.cache
    }

    /// Shorthand for `cache().builder_for(meta)`.
    pub fn builder_for(&mut self, meta: &BlockMetadata) -> (&mut BlockBuilder, bool) {
        self.cache.builder_for(meta)
    }

    /// Drops the builder for `key`. If a block for it was already emitted,
    /// downstream is told to retract it.
    pub fn retract_block(&mut self, key: &BlockKey) -> Result<()> {
        if let Some(entry) = self.cache.remove(key) {
            if entry.emitted {
                self.send(Message::Retract {
                    src: self.id,
                    meta: entry.builder.meta(),
                });
            }
        }
        Ok(())
    }

    /// Watermarks only move forward.
    pub fn update_watermark(&mut self, time: Time) -> Result<()> {
        if time <= self.watermark {
            return Ok(());
        }
        self.watermark = time;
        self.evaluate_triggers()?;
        self.send(Message::UpdateWatermark { src: self.id, time });
        Ok(())
    }

    pub fn update_processing_time(&mut self, time: Time) -> Result<()> {
        if time <= self.processing_time {
            return Ok(());
        }
        self.processing_time = time;
        self.evaluate_triggers()?;
        self.send(Message::UpdateProcessingTime { src: self.id, time });
        Ok(())
    }

    /// Flushes every remaining builder, then tells downstream this dataset is
    /// done. With an error nothing is flushed.
    pub fn finish(&mut self, err: Option<Error>) {
        let err = match err {
            Some(e) => Some(e),
            None => self.flush_all().err(),
        };
        if let Some(e) = &err {
            let discarded = self.discard_all();
            debug!(dataset = %self.id, error = %e, discarded, "dataset finished with error");
        }
        self.send(Message::Finish { src: self.id, err });
    }

    /// Drops every live builder, returning its memory. Yields how many.
    fn discard_all(&mut self) -> usize {
        let keys = self.cache.keys();
        for key in &keys {
            self.cache.remove(key);
        }
        keys.len()
    }

    fn flush_all(&mut self) -> Result<()> {
        for key in self.cache.keys() {
            self.trigger_block(&key)?;
            self.cache.remove(&key);
        }
        Ok(())
    }

    fn evaluate_triggers(&mut self) -> Result<()> {
        for key in self.cache.keys() {
            let (fired, finished) = match self.cache.entry_mut(&key) {
                Some(entry) => {
                    let ctx = TriggerContext {
                        bounds: entry.builder.bounds(),
                        nrows: entry.builder.nrows(),
                        watermark: self.watermark,
                        processing_time: self.processing_time,
                    };
                    let fired = entry.trigger.triggered(&ctx);
                    (fired, entry.trigger.finished())
                }
                None => continue,
            };
            if fired {
                self.trigger_block(&key)?;
            }
            if finished {
                trace!(dataset = %self.id, key = %key.as_str(), "expiring block");
                self.cache.remove(&key);
            }
        }
        Ok(())
    }

    fn trigger_block(&mut self, key: &BlockKey) -> Result<()> {
        let Some(entry) = self.cache.entry_mut(key) else {
            return Ok(());
        };
        if entry.builder.is_empty() {
            return Ok(());
        }
        let block = entry.builder.block()?;
        let retract = if self.mode == AccumulationMode::AccumulatingRetracting && entry.emitted {
            Some(entry.builder.meta())
        } else {
            None
        };
        entry.emitted = true;
        if self.mode == AccumulationMode::Discarding {
            entry.builder.clear_data();
        }
        if let Some(meta) = retract {
            self.send(Message::Retract { src: self.id, meta });
        }
        self.send(Message::Process { src: self.id, block });
        metrics::block_emitted();
        Ok(())
    }

    fn send(&self, msg: Message) {
        if let Some((last, rest)) = self.downstream.split_last() {
            for d in rest {
                d.push(msg.clone());
            }
            last.push(msg);
        }
    }
}
