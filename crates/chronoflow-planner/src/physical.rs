//! Physical planning: global bounds plus push-down into sources.
//!
//! Procedures that declare a [`PushDownRule`] are folded into the nearest
//! root (a storage source) reachable through the rule's `through` kinds and
//! then removed from the graph. Each root remembers which procedures were
//! pushed into it. When a root is shared with another branch, or already
//! carries a push-down from a procedure that is not an ancestor of the
//! current one, the root and its path down to the branch point are cloned
//! so every branch reads from a source configured only for that branch.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chronoflow_core::hash::{Fingerprint, Fingerprinter};
use chronoflow_core::id::ProcedureId;
use chronoflow_core::time::MIN_TIME;
use chronoflow_core::{Bounds, BoundsSpec, Error, Result, Time};
use tracing::debug;

use crate::logical::LogicalPlan;
use crate::procedure::{remove_id, Procedure, ProcedureSpec, PushDownOutcome, PushDownRule};

#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub now: Time,
    /// Union of every declared time range; empty when nothing declared one.
    pub bounds: BoundsSpec,
    pub procedures: BTreeMap<ProcedureId, Procedure>,
    /// Topological order.
    pub order: Vec<ProcedureId>,
    /// Procedures with no children, in topological order.
    pub results: Vec<ProcedureId>,
    /// Operation name per procedure; clones carry a `.dup-N` suffix.
    pub names: BTreeMap<ProcedureId, String>,
}

impl PhysicalPlan {
    pub fn procedure(&self, id: &ProcedureId) -> Option<&Procedure> {
        self.procedures.get(id)
    }

    pub fn name(&self, id: &ProcedureId) -> String {
        self.names.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.order.iter().filter_map(|id| self.procedures.get(id))
    }

    pub fn sources(&self) -> impl Iterator<Item = &Procedure> {
        self.iter().filter(|p| p.parents.is_empty())
    }

    /// Procedures of `kind`, in topological order.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Procedure> + 'a {
        self.iter().filter(move |p| p.kind() == kind)
    }

    /// Plan bounds resolved against *now*; `(MIN, now)` when unset.
    pub fn resolved_bounds(&self) -> Bounds {
        if self.bounds.is_empty() {
            return Bounds::new(MIN_TIME, self.now);
        }
        self.bounds.resolve(self.now)
    }

    /// Graphviz rendering of the edges, labelled by kind or by id.
    pub fn to_dot(&self, use_ids: bool) -> String {
        let mut out = String::from("digraph PhysicalPlan {\n");
        for p in self.iter() {
            for c in &p.children {
                let Some(child) = self.procedures.get(c) else {
                    continue;
                };
                let _ = if use_ids {
                    writeln!(out, "\"{}\"->\"{}\"", p.id, child.id)
                } else {
                    writeln!(out, "{}->{}", p.kind(), child.kind())
                };
            }
        }
        out.push_str("}\n");
        out
    }

    /// Stable digest of the plan's shape and specs.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut f = Fingerprinter::new();
        f.bounds(&self.bounds);
        for p in self.iter() {
            f.procedure(p.id, p.kind(), &p.spec.to_json(), &p.parents);
        }
        f.results(&self.results).finish()
    }
}

/// One push-down applied to a root.
#[derive(Debug, Clone)]
struct PushRecord {
    by: ProcedureId,
    spec: Box<dyn ProcedureSpec>,
    combined: bool,
}

struct Planner<'a> {
    logical: &'a LogicalPlan,
    plan: PhysicalPlan,
    pushes: BTreeMap<ProcedureId, Vec<PushRecord>>,
    /// Cloned procedure → logical procedure it descends from.
    origin: BTreeMap<ProcedureId, ProcedureId>,
    dups: usize,
}

/// Turn a logical plan into a physical one.
pub fn plan_physical(logical: &LogicalPlan) -> Result<PhysicalPlan> {
    let mut p = Planner {
        logical,
        plan: PhysicalPlan {
            now: logical.now,
            bounds: BoundsSpec::default(),
            procedures: logical.procedures.clone(),
            order: logical.order.clone(),
            results: Vec::new(),
            names: logical
                .operations
                .iter()
                .map(|(id, op)| (*id, op.to_string()))
                .collect(),
        },
        pushes: BTreeMap::new(),
        origin: BTreeMap::new(),
        dups: 0,
    };
    p.plan.results = p.results();

    for pr in logical.iter() {
        if let Some(b) = pr.spec.time_bounds() {
            p.plan.bounds = p.plan.bounds.union(&b, logical.now);
        }
    }

    for id in &logical.order {
        let Some(pr) = p.plan.procedures.get(id) else {
            continue;
        };
        let Some(rule) = pr.spec.push_down_rule() else {
            continue;
        };
        let spec = pr.spec.clone();
        if p.push_down_and_search(*id, &*spec, rule)? {
            p.remove_procedure(*id);
        } else if !spec.has_transformation() {
            let op = logical
                .operations
                .get(id)
                .map(|o| o.to_string())
                .unwrap_or_else(|| id.to_string());
            return Err(Error::PushDownConflict(format!(
                "{} procedure {op:?} cannot be pushed into a {} and has no transformation",
                spec.kind(),
                rule.root
            )));
        }
    }

    p.plan.results = p.results();
    debug!(
        procedures = p.plan.order.len(),
        results = p.plan.results.len(),
        duplicated = p.dups,
        bounds = %p.plan.resolved_bounds(),
        "physical plan built"
    );
    Ok(p.plan)
}

impl Planner<'_> {
    fn results(&self) -> Vec<ProcedureId> {
        self.plan
            .iter()
            .filter(|p| p.children.is_empty())
            .map(|p| p.id)
            .collect()
    }

    fn node(&self, id: &ProcedureId) -> Result<&Procedure> {
        self.plan
            .procedures
            .get(id)
            .ok_or_else(|| Error::Internal(format!("procedure {id} missing from plan")))
    }

    /// Returns whether every parent branch accepted the push-down.
    fn push_down_and_search(
        &mut self,
        id: ProcedureId,
        spec: &dyn ProcedureSpec,
        rule: PushDownRule,
    ) -> Result<bool> {
        let mut paths = Vec::new();
        self.search(id, spec, rule, Vec::new(), &mut paths)?;
        if paths.is_empty() {
            return Ok(false);
        }
        let mut all = true;
        for path in paths {
            let applied = match path {
                Some(path) => self.apply(id, spec, &path)?,
                None => false,
            };
            all &= applied;
        }
        Ok(all)
    }

    /// Collects, per parent branch, the path `[root, .., parent]` or `None`
    /// when the branch holds a kind the rule cannot cross.
    fn search(
        &self,
        from: ProcedureId,
        spec: &dyn ProcedureSpec,
        rule: PushDownRule,
        below: Vec<ProcedureId>,
        out: &mut Vec<Option<Vec<ProcedureId>>>,
    ) -> Result<()> {
        for parent in &self.node(&from)?.parents {
            let q = self.node(parent)?;
            if q.kind() == rule.root {
                let mut path = Vec::with_capacity(below.len() + 1);
                path.push(*parent);
                path.extend(below.iter().copied());
                out.push(Some(path));
            } else if rule.passes(q.kind()) {
                let mut next = Vec::with_capacity(below.len() + 1);
                next.push(*parent);
                next.extend(below.iter().copied());
                self.search(*parent, spec, rule, next, out)?;
            } else {
                debug!(kind = spec.kind(), blocked_by = q.kind(), "push down blocked");
                out.push(None);
            }
        }
        Ok(())
    }

    fn apply(&mut self, id: ProcedureId, spec: &dyn ProcedureSpec, path: &[ProcedureId]) -> Result<bool> {
        let root = path[0];
        let ancestors = self.logical.ancestors(&id);
        let mut exclusive = true;
        for n in path {
            exclusive &= self.node(n)?.children.len() == 1;
        }
        let records = self.pushes.get(&root).cloned().unwrap_or_default();
        let in_series = records.iter().all(|r| ancestors.contains(&r.by));
        let dup = !exclusive || !in_series;

        let (mut candidate, mut kept) = if dup {
            self.replay(root, &records, &ancestors)?
        } else {
            (self.node(&root)?.spec.clone(), records)
        };

        if !spec.match_root(&*candidate) {
            debug!(kind = spec.kind(), "root rejected push down");
            return Ok(false);
        }
        let mut combined = false;
        let mut outcome = spec.push_down(&mut *candidate);
        if outcome == PushDownOutcome::Conflict {
            outcome = spec.combine(&mut *candidate);
            combined = true;
        }
        if outcome != PushDownOutcome::Applied {
            debug!(kind = spec.kind(), ?outcome, "push down not applied");
            return Ok(false);
        }
        kept.push(PushRecord {
            by: id,
            spec: spec.copy(),
            combined,
        });

        if dup {
            self.duplicate(id, path, candidate, kept)?;
        } else {
            if let Some(r) = self.plan.procedures.get_mut(&root) {
                r.spec = candidate;
            }
            self.pushes.insert(root, kept);
        }
        debug!(kind = spec.kind(), root = %root, duplicated = dup, combined, "pushed down");
        Ok(true)
    }

    /// The root's logical spec with only the push-downs of `ancestors`
    /// applied again.
    fn replay(
        &self,
        root: ProcedureId,
        records: &[PushRecord],
        ancestors: &BTreeSet<ProcedureId>,
    ) -> Result<(Box<dyn ProcedureSpec>, Vec<PushRecord>)> {
        let origin = self.origin.get(&root).copied().unwrap_or(root);
        let mut spec = self
            .logical
            .procedure(&origin)
            .ok_or_else(|| Error::Internal(format!("no logical procedure for {origin}")))?
            .spec
            .clone();
        let mut kept = Vec::new();
        for r in records.iter().filter(|r| ancestors.contains(&r.by)) {
            let outcome = if r.combined {
                r.spec.combine(&mut *spec)
            } else {
                r.spec.push_down(&mut *spec)
            };
            if outcome != PushDownOutcome::Applied {
                return Err(Error::Internal(format!(
                    "replaying {} push down onto a copy of {root} failed: {outcome:?}",
                    r.spec.kind()
                )));
            }
            kept.push(r.clone());
        }
        Ok((spec, kept))
    }

    /// Clone `path` from the root down to its lowest branching node and hang
    /// the branch leading to `id` off the clone.
    fn duplicate(
        &mut self,
        id: ProcedureId,
        path: &[ProcedureId],
        root_spec: Box<dyn ProcedureSpec>,
        records: Vec<PushRecord>,
    ) -> Result<()> {
        let mut split = 0;
        for (i, n) in path.iter().enumerate() {
            if self.node(n)?.children.len() > 1 {
                split = i;
            }
        }
        let below = path.get(split + 1).copied().unwrap_or(id);

        self.dups += 1;
        let tag = format!("dup-{}", self.dups);
        let clones: Vec<ProcedureId> = path[..=split].iter().map(|n| n.derive(&tag)).collect();

        let mut root_spec = Some(root_spec);
        for (i, orig) in path[..=split].iter().enumerate() {
            let src = self.node(orig)?;
            let spec = match (i, root_spec.take()) {
                (0, Some(s)) => s,
                _ => src.spec.clone(),
            };
            let parents = if i == 0 {
                src.parents.clone()
            } else {
                vec![clones[i - 1]]
            };
            let children = if i == split {
                vec![below]
            } else {
                vec![clones[i + 1]]
            };
            let clone = Procedure {
                id: clones[i],
                spec,
                parents,
                children,
            };
            if i == 0 {
                for gp in &clone.parents {
                    if let Some(g) = self.plan.procedures.get_mut(gp) {
                        g.children.push(clones[0]);
                    }
                }
            }
            let origin = self.origin.get(orig).copied().unwrap_or(*orig);
            self.origin.insert(clones[i], origin);
            let name = format!("{}.{tag}", self.plan.name(orig));
            self.plan.names.insert(clones[i], name);
            self.plan.procedures.insert(clones[i], clone);
            let pos = self
                .plan
                .order
                .iter()
                .position(|x| x == orig)
                .map_or(self.plan.order.len(), |p| p + 1);
            self.plan.order.insert(pos, clones[i]);
        }

        let old = path[split];
        let new = clones[split];
        if let Some(n) = self.plan.procedures.get_mut(&old) {
            remove_id(&mut n.children, below);
        }
        if let Some(b) = self.plan.procedures.get_mut(&below) {
            for p in b.parents.iter_mut().filter(|p| **p == old) {
                *p = new;
            }
            b.spec.parent_changed(old, new);
        }
        self.pushes.insert(clones[0], records);
        debug!(root = %path[0], clone = %clones[0], cloned = clones.len(), "duplicated source branch");
        Ok(())
    }

    /// Drop a pushed-down procedure, connecting its parents to its children
    /// in its place.
    fn remove_procedure(&mut self, id: ProcedureId) {
        let Some(pr) = self.plan.procedures.remove(&id) else {
            return;
        };
        remove_id(&mut self.plan.order, id);
        self.plan.names.remove(&id);
        for parent in &pr.parents {
            if let Some(p) = self.plan.procedures.get_mut(parent) {
                remove_id(&mut p.children, id);
                p.children.extend(pr.children.iter().copied());
            }
        }
        for child in &pr.children {
            if let Some(c) = self.plan.procedures.get_mut(child) {
                let mut parents = Vec::with_capacity(c.parents.len() + pr.parents.len());
                for p in &c.parents {
                    if *p == id {
                        parents.extend(pr.parents.iter().copied());
                    } else {
                        parents.push(*p);
                    }
                }
                c.parents = parents;
                if let [single] = pr.parents.as_slice() {
                    c.spec.parent_changed(id, *single);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical::plan_logical;
    use crate::procedure::testing::{self, Source};
    use chronoflow_core::operation::OperationDag;
    use chronoflow_core::time::HOUR;
    use chronoflow_core::QueryTime;
    use serde_json::json;

    fn physical(dag: OperationDag) -> Result<PhysicalPlan> {
        let logical = plan_logical(&dag, &testing::registry(), Some(Time(1_000 * HOUR.0)))?;
        plan_physical(&logical)
    }

    fn sources(plan: &PhysicalPlan) -> Vec<Source> {
        plan.of_kind("source")
            .filter_map(|p| p.spec.downcast_ref::<Source>().cloned())
            .collect()
    }

    #[test]
    fn linear_chain_collapses_into_source() {
        let plan = physical(
            OperationDag::new()
                .op("s", "source", json!({}))
                .op("b", "bound", json!({"start": "-2h"}))
                .op("c", "cut", json!({"predicate": "p"}))
                .op("l", "cap", json!({"n": 4}))
                .edge("s", "b")
                .edge("b", "c")
                .edge("c", "l"),
        )
        .expect("plan");
        assert_eq!(plan.order.len(), 1);
        assert_eq!(plan.results, plan.order);
        let s = &sources(&plan)[0];
        assert_eq!(s.predicates, ["p"]);
        assert_eq!(s.limit, Some(4));
        assert_eq!(
            s.bounds,
            Some(BoundsSpec::new(QueryTime::Relative(HOUR.mul(-2)), QueryTime::NOW))
        );
        assert_eq!(plan.resolved_bounds().start, Time(998 * HOUR.0));
    }

    #[test]
    fn sibling_branches_get_their_own_source() {
        let plan = physical(
            OperationDag::new()
                .op("s", "source", json!({}))
                .op("b", "bound", json!({"start": "-1h"}))
                .op("c1", "cut", json!({"predicate": "x"}))
                .op("c2", "cut", json!({"predicate": "y"}))
                .edge("s", "b")
                .edge("b", "c1")
                .edge("b", "c2"),
        )
        .expect("plan");
        let mut srcs = sources(&plan);
        srcs.sort_by(|a, b| a.predicates.cmp(&b.predicates));
        assert_eq!(srcs.len(), 2);
        assert_eq!(srcs[0].predicates, ["x"]);
        assert_eq!(srcs[1].predicates, ["y"]);
        assert!(srcs.iter().all(|s| s.bounds.is_some()), "bound replayed on the clone");
        assert_eq!(plan.results.len(), 2);
        let mut names: Vec<_> = plan.of_kind("source").map(|p| plan.name(&p.id)).collect();
        names.sort();
        assert_eq!(names, ["s", "s.dup-1"]);
    }

    #[test]
    fn shared_source_is_not_narrowed_for_other_readers() {
        let plan = physical(
            OperationDag::new()
                .op("s", "source", json!({}))
                .op("c", "cut", json!({"predicate": "x"}))
                .op("st", "step", json!(null))
                .edge("s", "c")
                .edge("s", "st"),
        )
        .expect("plan");
        let srcs = sources(&plan);
        assert_eq!(srcs.len(), 2);
        let step = plan.of_kind("step").next().expect("step stays");
        let feeding = plan.procedure(&step.parents[0]).expect("parent");
        let feeding = feeding.spec.downcast_ref::<Source>().expect("source");
        assert!(feeding.predicates.is_empty());
    }

    #[test]
    fn in_series_filters_are_combined() {
        let plan = physical(
            OperationDag::new()
                .op("s", "source", json!({}))
                .op("c1", "cut", json!({"predicate": "x"}))
                .op("c2", "cut", json!({"predicate": "y"}))
                .edge("s", "c1")
                .edge("c1", "c2"),
        )
        .expect("plan");
        assert_eq!(plan.order.len(), 1);
        assert_eq!(sources(&plan)[0].predicates, ["x", "y"]);
    }

    #[test]
    fn in_series_conflict_without_combine_stays() {
        let plan = physical(
            OperationDag::new()
                .op("s", "source", json!({}))
                .op("l1", "cap", json!({"n": 5}))
                .op("l2", "cap", json!({"n": 2}))
                .edge("s", "l1")
                .edge("l1", "l2"),
        )
        .expect("plan");
        assert_eq!(plan.of_kind("cap").count(), 1);
        assert_eq!(sources(&plan)[0].limit, Some(5));
    }

    #[test]
    fn blocked_branch_is_left_alone() {
        let plan = physical(
            OperationDag::new()
                .op("s", "source", json!({}))
                .op("st", "step", json!(null))
                .op("c", "cut", json!({"predicate": "x"}))
                .edge("s", "st")
                .edge("st", "c"),
        )
        .expect("plan");
        assert_eq!(plan.order.len(), 3);
        assert!(sources(&plan)[0].predicates.is_empty());
    }

    #[test]
    fn unpushable_plan_only_kind_fails() {
        let err = physical(
            OperationDag::new()
                .op("s", "source", json!({}))
                .op("st", "step", json!(null))
                .op("b", "bound", json!({"start": "-1h"}))
                .edge("s", "st")
                .edge("st", "b"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "push_down_conflict");
    }

    #[test]
    fn dot_and_fingerprint_are_stable() {
        let dag = OperationDag::new()
            .op("s", "source", json!({}))
            .op("st", "step", json!(null))
            .edge("s", "st");
        let a = physical(dag.clone()).expect("plan");
        let b = physical(dag).expect("plan");
        assert_eq!(a.to_dot(false), "digraph PhysicalPlan {\nsource->step\n}\n");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
