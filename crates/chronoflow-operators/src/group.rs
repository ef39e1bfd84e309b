//! `group`: regroups rows by a subset of their tags.
//!
//! `by` names the tags that form the new group key; `except` instead names
//! the tags dropped from it (every other tag stays in the key). `keep`
//! tags leave the key but survive as per-row columns.

use std::collections::BTreeMap;

use chronoflow_block::helpers::{add_tags, append_row_filled, col_map};
use chronoflow_block::{Block, BlockBuilder, BlockMetadata};
use chronoflow_core::id::DatasetId;
use chronoflow_core::{ColMeta, Error, Result, Tags, TagsKey, Time};
use chronoflow_exec::{Dataset, ExecutionContext, Registry, Transformation};
use chronoflow_planner::{decode_spec, ProcedureSpec, PushDownOutcome, PushDownRule};
use serde::{Deserialize, Serialize};

use crate::downcast;
use crate::filter::FILTER_KIND;
use crate::from::{FromProcedureSpec, FROM_KIND};
use crate::limit::LIMIT_KIND;
use crate::range::RANGE_KIND;

pub const GROUP_KIND: &str = "group";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupProcedureSpec {
    pub by: Vec<String>,
    pub keep: Vec<String>,
    pub except: Vec<String>,
}

impl ProcedureSpec for GroupProcedureSpec {
    fn kind(&self) -> &'static str {
        GROUP_KIND
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        Some(PushDownRule {
            root: FROM_KIND,
            through: &[LIMIT_KIND, RANGE_KIND, FILTER_KIND],
        })
    }

    fn match_root(&self, root: &dyn ProcedureSpec) -> bool {
        root.downcast_ref::<FromProcedureSpec>()
            .map_or(false, |from| !from.aggregate_set)
    }

    fn push_down(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        let Some(from) = root.downcast_mut::<FromProcedureSpec>() else {
            return PushDownOutcome::Unsupported;
        };
        if from.grouping_set {
            return PushDownOutcome::Conflict;
        }
        from.grouping_set = true;
        from.merge_all = self.by.is_empty() && self.except.is_empty();
        from.group_keys = self.by.clone();
        from.group_except = self.except.clone();
        from.group_keep = self.keep.clone();
        PushDownOutcome::Applied
    }
}

pub struct GroupTransformation {
    dataset: Dataset,
    by: Vec<String>,
    keep: Vec<String>,
    /// Tags that never enter the key in ignoring mode: `except` plus `keep`.
    dropped: Vec<String>,
    ignoring: bool,
}

impl GroupTransformation {
    pub fn new(dataset: Dataset, spec: &GroupProcedureSpec) -> Self {
        let mut dropped: Vec<String> = spec.except.iter().chain(&spec.keep).cloned().collect();
        dropped.sort();
        dropped.dedup();
        Self {
            dataset,
            by: spec.by.clone(),
            keep: spec.keep.clone(),
            dropped,
            ignoring: spec.by.is_empty() && !spec.except.is_empty(),
        }
    }

    fn group_key(&self, tags: &Tags) -> Tags {
        if self.ignoring {
            tags.except(&self.dropped)
        } else {
            tags.subset(&self.by)
        }
    }

    fn in_key(&self, label: &str) -> bool {
        if self.ignoring {
            !self.dropped.iter().any(|d| d == label)
        } else {
            self.by.iter().any(|b| b == label)
        }
    }

    /// True when every key tag of `block` is common, so all rows share one
    /// group.
    fn fans_in(&self, block: &Block) -> bool {
        block
            .cols()
            .iter()
            .filter(|c| c.is_tag() && self.in_key(&c.label))
            .all(|c| c.common)
    }

    fn partition(&self, block: &Block) -> Vec<(Tags, Vec<usize>)> {
        if self.fans_in(block) {
            return vec![(self.group_key(block.tags()), (0..block.nrows()).collect())];
        }
        let mut groups: BTreeMap<TagsKey, (Tags, Vec<usize>)> = BTreeMap::new();
        for i in 0..block.nrows() {
            let key = self.group_key(&block.tags_for_row(i));
            groups.entry(key.key()).or_insert_with(|| (key, Vec::new())).1.push(i);
        }
        groups.into_values().collect()
    }
}

/// Columns of a fresh group: the non-tag columns of its first block, the
/// key as common tags, then one per-row column per kept tag.
fn init_builder(keep: &[String], block: &Block, key: &Tags, builder: &mut BlockBuilder) -> Result<()> {
    for meta in block.cols().iter().filter(|c| !c.is_tag()) {
        builder.add_column(meta.clone())?;
    }
    add_tags(key, builder)?;
    for label in keep {
        builder.add_column(ColMeta::tag(label.as_str(), false))?;
    }
    Ok(())
}

impl Transformation for GroupTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        for key in self.dataset.cache().keys() {
            let same = self
                .dataset
                .cache()
                .builder(&key)
                .map_or(false, |b| b.bounds().equal(&meta.bounds));
            if same {
                self.dataset.retract_block(&key)?;
            }
        }
        Ok(())
    }

    fn process(&mut self, _src: DatasetId, block: &Block) -> Result<()> {
        for (key, rows) in self.partition(block) {
            let meta = BlockMetadata::new(block.bounds(), key);
            let (builder, created) = self.dataset.builder_for(&meta);
            if created {
                init_builder(&self.keep, block, &meta.tags, builder)?;
            }
            let map = col_map(builder, block);
            for i in rows {
                append_row_filled(i, block, builder, &map)?;
            }
        }
        Ok(())
    }

    fn update_watermark(&mut self, _src: DatasetId, time: Time) -> Result<()> {
        self.dataset.update_watermark(time)
    }

    fn update_processing_time(&mut self, _src: DatasetId, time: Time) -> Result<()> {
        self.dataset.update_processing_time(time)
    }

    fn finish(&mut self, _src: DatasetId, err: Option<Error>) {
        self.dataset.finish(err)
    }
}

fn create_spec(v: &serde_json::Value) -> Result<Box<dyn ProcedureSpec>> {
    let mut spec: GroupProcedureSpec = decode_spec(GROUP_KIND, v)?;
    if !spec.by.is_empty() && !spec.except.is_empty() {
        return Err(Error::InvalidSpec("group: by and except are mutually exclusive".into()));
    }
    spec.by.sort();
    spec.keep.sort();
    spec.except.sort();
    Ok(Box::new(spec))
}

fn create_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    _ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<GroupProcedureSpec>(spec)?;
    Ok(Box::new(GroupTransformation::new(dataset, s)))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(GROUP_KIND, create_spec)?;
    r.register_transformation(GROUP_KIND, create_transformation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronoflow_core::{Bounds, DataType, Value};
    use chronoflow_exec::testing::{dataset_id, float_block, rows, Collector};
    use chronoflow_exec::{AccumulationMode, BuilderCache, TriggerSpec};
    use chronoflow_mem::Allocator;
    use serde_json::json;
    use std::sync::Arc;

    fn transformation(spec: GroupProcedureSpec) -> (GroupTransformation, Arc<Collector>) {
        let out = Arc::new(Collector::default());
        let mut d = Dataset::new(
            dataset_id("group"),
            AccumulationMode::Accumulating,
            BuilderCache::new(Allocator::unlimited(), TriggerSpec::default()),
        );
        d.add_downstream(out.clone());
        (GroupTransformation::new(d, &spec), out)
    }

    fn bounds() -> Bounds {
        Bounds::new(Time(0), Time(100))
    }

    #[test]
    fn fan_in_merges_series_by_key() {
        let (mut t, out) = transformation(GroupProcedureSpec {
            by: vec!["region".into()],
            keep: vec!["host".into()],
            ..Default::default()
        });
        let a = float_block(bounds(), &[("host", "a"), ("region", "east")], &[(1, 1.0)]).expect("block");
        let b = float_block(bounds(), &[("host", "b"), ("region", "east")], &[(2, 2.0)]).expect("block");
        let c = float_block(bounds(), &[("host", "c"), ("region", "west")], &[(3, 3.0)]).expect("block");
        for blk in [&a, &b, &c] {
            t.process(dataset_id("src"), blk).expect("process");
        }
        t.finish(dataset_id("src"), None);

        let blocks = out.blocks();
        assert_eq!(blocks.len(), 2);
        let east = &blocks[0];
        assert_eq!(east.tags().get("region"), Some("east"));
        assert_eq!(east.tags().get("host"), None);
        assert_eq!(rows(east).expect("rows"), [(1, Value::Float(1.0)), (2, Value::Float(2.0))]);
        let host = chronoflow_block::col_idx("host", east.cols()).expect("keep column");
        assert!(!east.cols()[host].common);
        assert_eq!(*east.strings(host).expect("strings"), ["a", "b"]);
        assert_eq!(blocks[1].tags().get("region"), Some("west"));
    }

    #[test]
    fn fan_out_splits_per_row_tags() {
        // Regroup by host after everything was merged into one block.
        let (mut merge, merged) = transformation(GroupProcedureSpec {
            keep: vec!["host".into()],
            ..Default::default()
        });
        let a = float_block(bounds(), &[("host", "a")], &[(1, 1.0), (3, 3.0)]).expect("block");
        let b = float_block(bounds(), &[("host", "b")], &[(2, 2.0)]).expect("block");
        merge.process(dataset_id("src"), &a).expect("process");
        merge.process(dataset_id("src"), &b).expect("process");
        merge.finish(dataset_id("src"), None);
        let one = merged.blocks();
        assert_eq!(one.len(), 1);
        assert!(one[0].tags().is_empty());

        let (mut split, out) = transformation(GroupProcedureSpec {
            by: vec!["host".into()],
            ..Default::default()
        });
        split.process(dataset_id("merge"), &one[0]).expect("process");
        split.finish(dataset_id("merge"), None);
        let blocks = out.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].tags().get("host"), Some("a"));
        assert_eq!(rows(&blocks[0]).expect("rows"), [(1, Value::Float(1.0)), (3, Value::Float(3.0))]);
        assert_eq!(blocks[1].tags().get("host"), Some("b"));
        let host = chronoflow_block::col_idx("host", blocks[1].cols()).expect("host");
        assert!(blocks[1].cols()[host].common);
    }

    #[test]
    fn except_drops_named_tags_from_the_key() {
        let (mut t, out) = transformation(GroupProcedureSpec {
            except: vec!["host".into()],
            ..Default::default()
        });
        let a = float_block(bounds(), &[("host", "a"), ("region", "east")], &[(1, 1.0)]).expect("block");
        let b = float_block(bounds(), &[("host", "b"), ("region", "east")], &[(2, 2.0)]).expect("block");
        t.process(dataset_id("src"), &a).expect("process");
        t.process(dataset_id("src"), &b).expect("process");
        t.finish(dataset_id("src"), None);
        let blocks = out.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tags().get("region"), Some("east"));
        assert_eq!(blocks[0].nrows(), 2);
        assert_eq!(blocks[0].value_type().expect("value"), DataType::Float);
    }

    #[test]
    fn retract_removes_builders_with_equal_bounds() {
        let (mut t, out) = transformation(GroupProcedureSpec {
            by: vec!["host".into()],
            ..Default::default()
        });
        let a = float_block(bounds(), &[("host", "a")], &[(1, 1.0)]).expect("block");
        let later = float_block(Bounds::new(Time(100), Time(200)), &[("host", "a")], &[(150, 2.0)]).expect("block");
        t.process(dataset_id("src"), &a).expect("process");
        t.process(dataset_id("src"), &later).expect("process");
        t.retract_block(dataset_id("src"), &a.meta()).expect("retract");
        t.finish(dataset_id("src"), None);
        let blocks = out.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].bounds(), Bounds::new(Time(100), Time(200)));
    }

    #[test]
    fn push_down_sets_merge_all_without_keys() {
        let mut from = FromProcedureSpec::default();
        let all = GroupProcedureSpec::default();
        assert!(all.match_root(&from));
        assert_eq!(all.push_down(&mut from), PushDownOutcome::Applied);
        assert!(from.grouping_set && from.merge_all);
        assert_eq!(all.push_down(&mut from), PushDownOutcome::Conflict);

        let aggregated = FromProcedureSpec {
            aggregate_set: true,
            ..FromProcedureSpec::default()
        };
        assert!(!all.match_root(&aggregated));
    }

    #[test]
    fn by_and_except_are_exclusive() {
        let err = create_spec(&json!({"by": ["a"], "except": ["b"]})).unwrap_err();
        assert_eq!(err.kind(), "invalid_spec");
    }
}
