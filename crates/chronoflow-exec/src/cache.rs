//! Builder cache: one active builder per output block key.

use std::collections::BTreeMap;

use chronoflow_block::{BlockBuilder, BlockKey, BlockMetadata};
use chronoflow_mem::Allocator;

use crate::trigger::{Trigger, TriggerSpec};

pub(crate) struct CacheEntry {
    pub(crate) builder: BlockBuilder,
    pub(crate) trigger: Trigger,
    /// A block for this key has been sent downstream.
    pub(crate) emitted: bool,
}

pub struct BuilderCache {
    allocator: Allocator,
    trigger: TriggerSpec,
    entries: BTreeMap<BlockKey, CacheEntry>,
}

impl BuilderCache {
    pub fn new(allocator: Allocator, trigger: TriggerSpec) -> Self {
        Self {
            allocator,
            trigger,
            entries: BTreeMap::new(),
        }
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Trigger for builders created from now on.
    pub fn set_trigger(&mut self, trigger: TriggerSpec) {
        self.trigger = trigger;
    }

    /// The builder for `meta`'s key, and whether it was just created.
    pub fn builder_for(&mut self, meta: &BlockMetadata) -> (&mut BlockBuilder, bool) {
        let key = meta.key();
        let mut created = false;
        let entry = self.entries.entry(key).or_insert_with(|| {
            created = true;
            let mut builder = BlockBuilder::new(&self.allocator);
            builder.set_bounds(meta.bounds);
            CacheEntry {
                builder,
                trigger: Trigger::from_spec(&self.trigger),
                emitted: false,
            }
        });
        (&mut entry.builder, created)
    }

    pub fn builder(&mut self, key: &BlockKey) -> Option<&mut BlockBuilder> {
        self.entries.get_mut(key).map(|e| &mut e.builder)
    }

    pub fn for_each_builder<F>(&mut self, mut f: F) -> chronoflow_core::Result<()>
    where
        F: FnMut(&BlockKey, &mut BlockBuilder) -> chronoflow_core::Result<()>,
    {
        for (k, e) in self.entries.iter_mut() {
            f(k, &mut e.builder)?;
        }
        Ok(())
    }

    pub fn keys(&self) -> Vec<BlockKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry_mut(&mut self, key: &BlockKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    /// Discards the builder for `key`, returning its entry.
    pub(crate) fn remove(&mut self, key: &BlockKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }
}
