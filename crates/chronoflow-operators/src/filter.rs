//! `filter`: keeps the rows a boolean expression accepts.
//!
//! Pushed into `from` when the expression has a storage predicate form.
//! Otherwise every block is evaluated row by row against a specialization
//! of the expression compiled for the block's column types.

use std::sync::Arc;

use chronoflow_block::helpers::{add_block_cols, append_row, col_idx, col_map};
use chronoflow_block::{Block, BlockMetadata};
use chronoflow_core::expression::{is_value_reference, Expression, LogicalOp};
use chronoflow_core::id::DatasetId;
use chronoflow_core::{DataType, Error, Result, Time, Value};
use chronoflow_exec::expression::{CompileCache, Compiled, Scope};
use chronoflow_exec::{metrics, Dataset, ExecutionContext, Registry, Transformation};
use chronoflow_io::Predicate;
use chronoflow_planner::{decode_spec, ProcedureSpec, PushDownOutcome, PushDownRule};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::downcast;
use crate::from::{FromProcedureSpec, FROM_KIND};
use crate::group::GROUP_KIND;
use crate::limit::LIMIT_KIND;
use crate::range::RANGE_KIND;

pub const FILTER_KIND: &str = "filter";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterProcedureSpec {
    #[serde(rename = "fn")]
    pub expression: Expression,
}

impl FilterProcedureSpec {
    fn storable(&self) -> bool {
        Predicate::from_expression(&self.expression).is_ok()
    }
}

impl ProcedureSpec for FilterProcedureSpec {
    fn kind(&self) -> &'static str {
        FILTER_KIND
    }

    fn push_down_rule(&self) -> Option<PushDownRule> {
        Some(PushDownRule {
            root: FROM_KIND,
            through: &[GROUP_KIND, LIMIT_KIND, RANGE_KIND],
        })
    }

    fn push_down(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        let Some(from) = root.downcast_mut::<FromProcedureSpec>() else {
            return PushDownOutcome::Unsupported;
        };
        if !self.storable() {
            return PushDownOutcome::Unsupported;
        }
        if from.filter_set {
            return PushDownOutcome::Conflict;
        }
        from.filter_set = true;
        from.filter = Some(self.expression.clone());
        PushDownOutcome::Applied
    }

    fn combine(&self, root: &mut dyn ProcedureSpec) -> PushDownOutcome {
        let Some(from) = root.downcast_mut::<FromProcedureSpec>() else {
            return PushDownOutcome::Unsupported;
        };
        if !self.storable() {
            return PushDownOutcome::Unsupported;
        }
        from.filter = Some(match from.filter.take() {
            Some(prev) => Expression::logical(LogicalOp::And, prev, self.expression.clone()),
            None => self.expression.clone(),
        });
        from.filter_set = true;
        PushDownOutcome::Applied
    }
}

/// Where each expression reference reads from in one block. `None` is a
/// tag the block does not carry; it evaluates as the empty string.
pub(crate) fn resolve_refs(names: &[String], block: &Block) -> Result<(Vec<Option<usize>>, Vec<DataType>)> {
    let mut cols = Vec::with_capacity(names.len());
    let mut types = Vec::with_capacity(names.len());
    for name in names {
        let j = if is_value_reference(name) {
            Some(block.value_idx()?)
        } else {
            col_idx(name, block.cols())
        };
        types.push(j.map_or(DataType::String, |j| block.cols()[j].data_type));
        cols.push(j);
    }
    Ok((cols, types))
}

pub(crate) fn fill_scope(scope: &mut Scope, cols: &[Option<usize>], block: &Block, i: usize) {
    scope.clear();
    scope.extend(cols.iter().map(|j| match j {
        Some(j) => block.value(i, *j),
        None => Value::String(String::new()),
    }));
}

pub struct FilterTransformation {
    dataset: Dataset,
    predicate: CompileCache,
    scope: Scope,
}

impl FilterTransformation {
    pub fn new(dataset: Dataset, expression: Expression) -> Self {
        Self {
            dataset,
            predicate: CompileCache::new(expression),
            scope: Scope::new(),
        }
    }

    fn specialize(&mut self, types: &[DataType]) -> Result<Arc<Compiled>> {
        let f = self.predicate.get(types).map_err(|e| {
            Error::IncompatiblePredicateType(format!("{}: {e}", self.predicate.expression()))
        })?;
        if f.is_object() || f.data_type() != DataType::Bool {
            return Err(Error::IncompatiblePredicateType(format!(
                "{} evaluates to {}, not bool",
                self.predicate.expression(),
                f.data_type()
            )));
        }
        Ok(f)
    }
}

impl Transformation for FilterTransformation {
    fn retract_block(&mut self, _src: DatasetId, meta: &BlockMetadata) -> Result<()> {
        self.dataset.retract_block(&meta.key())
    }

    fn process(&mut self, _src: DatasetId, block: &Block) -> Result<()> {
        let (cols, types) = resolve_refs(self.predicate.names(), block)?;
        let f = self.specialize(&types)?;

        let (builder, created) = self.dataset.builder_for(&block.meta());
        let map = if created {
            add_block_cols(block, builder)?
        } else {
            col_map(builder, block)
        };
        let mut dropped = 0u64;
        for i in 0..block.nrows() {
            fill_scope(&mut self.scope, &cols, block, i);
            match f.eval_bool(&self.scope) {
                Ok(true) => append_row(i, block, builder, &map)?,
                Ok(false) => {}
                Err(e) => {
                    warn!(row = i, error = %e, "filter: dropping row");
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            metrics::rows_dropped(dropped);
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
    Ok(Box::new(decode_spec::<FilterProcedureSpec>(FILTER_KIND, v)?))
}

fn create_transformation(
    spec: &dyn ProcedureSpec,
    dataset: Dataset,
    _ctx: &ExecutionContext,
) -> Result<Box<dyn Transformation>> {
    let s = downcast::<FilterProcedureSpec>(spec)?;
    Ok(Box::new(FilterTransformation::new(dataset, s.expression.clone())))
}

pub(crate) fn register(r: &mut Registry) -> Result<()> {
    r.register_procedure(FILTER_KIND, create_spec)?;
    r.register_transformation(FILTER_KIND, create_transformation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronoflow_core::expression::BinaryOp;
    use chronoflow_core::Bounds;
    use chronoflow_exec::testing::{block, dataset_id, float_block, rows, Collector};
    use chronoflow_exec::{AccumulationMode, BuilderCache, TriggerSpec};
    use chronoflow_mem::Allocator;

    fn transformation(expr: Expression) -> (FilterTransformation, Arc<Collector>) {
        let out = Arc::new(Collector::default());
        let mut d = Dataset::new(
            dataset_id("filter"),
            AccumulationMode::Accumulating,
            BuilderCache::new(Allocator::unlimited(), TriggerSpec::default()),
        );
        d.add_downstream(out.clone());
        (FilterTransformation::new(d, expr), out)
    }

    fn gt(name: &str, n: i64) -> Expression {
        Expression::binary(BinaryOp::Gt, Expression::reference(name), Expression::int(n))
    }

    #[test]
    fn value_threshold() {
        let (mut t, out) = transformation(gt("$", 5));
        let input = float_block(
            Bounds::new(Time(0), Time(10)),
            &[("host", "a")],
            &[(1, 1.0), (2, 6.0), (3, 3.0), (4, 8.0)],
        )
        .expect("block");
        t.process(dataset_id("src"), &input).expect("process");
        t.finish(dataset_id("src"), None);
        let blocks = out.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tags().get("host"), Some("a"));
        assert_eq!(
            rows(&blocks[0]).expect("rows"),
            [(2, Value::Float(6.0)), (4, Value::Float(8.0))]
        );
    }

    #[test]
    fn tag_references_and_missing_tags() {
        let expr = Expression::binary(BinaryOp::Eq, Expression::reference("host"), Expression::string("a"));
        let (mut t, out) = transformation(expr);
        let a = float_block(Bounds::new(Time(0), Time(10)), &[("host", "a")], &[(1, 1.0)]).expect("block");
        let b = float_block(Bounds::new(Time(0), Time(10)), &[("host", "b")], &[(1, 2.0)]).expect("block");
        let none = float_block(Bounds::new(Time(0), Time(10)), &[], &[(1, 3.0)]).expect("block");
        for blk in [&a, &b, &none] {
            t.process(dataset_id("src"), blk).expect("process");
        }
        t.finish(dataset_id("src"), None);
        let blocks = out.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(rows(&blocks[0]).expect("rows"), [(1, Value::Float(1.0))]);
    }

    #[test]
    fn non_boolean_predicate_is_rejected() {
        let expr = Expression::binary(BinaryOp::Add, Expression::reference("$"), Expression::int(1));
        let (mut t, _) = transformation(expr);
        let input = block(Bounds::new(Time(0), Time(10)), &[], &[(1, Value::Int(1))]).expect("block");
        let err = t.process(dataset_id("src"), &input).unwrap_err();
        assert_eq!(err.kind(), "incompatible_predicate_type");

        let (mut t, _) = transformation(gt("$", 5));
        let input = block(Bounds::new(Time(0), Time(10)), &[], &[(1, Value::String("x".into()))]).expect("block");
        let err = t.process(dataset_id("src"), &input).unwrap_err();
        assert_eq!(err.kind(), "incompatible_predicate_type");
    }

    #[test]
    fn failing_rows_are_dropped() {
        let div = Expression::binary(
            BinaryOp::Gt,
            Expression::binary(BinaryOp::Div, Expression::int(10), Expression::reference("$")),
            Expression::int(1),
        );
        let (mut t, out) = transformation(div);
        let input = block(
            Bounds::new(Time(0), Time(10)),
            &[],
            &[(1, Value::Int(0)), (2, Value::Int(2)), (3, Value::Int(20))],
        )
        .expect("block");
        t.process(dataset_id("src"), &input).expect("process");
        t.finish(dataset_id("src"), None);
        assert_eq!(rows(&out.blocks()[0]).expect("rows"), [(2, Value::Int(2))]);
    }

    #[test]
    fn push_down_and_combine() {
        let a = FilterProcedureSpec {
            expression: gt("$", 5),
        };
        let b = FilterProcedureSpec {
            expression: Expression::binary(BinaryOp::Eq, Expression::reference("host"), Expression::string("a")),
        };
        let mut from = FromProcedureSpec::default();
        assert_eq!(a.push_down(&mut from), PushDownOutcome::Applied);
        assert_eq!(b.push_down(&mut from), PushDownOutcome::Conflict);
        assert_eq!(b.combine(&mut from), PushDownOutcome::Applied);
        assert_eq!(
            from.filter,
            Some(Expression::logical(LogicalOp::And, a.expression.clone(), b.expression.clone()))
        );

        let arithmetic = FilterProcedureSpec {
            expression: Expression::binary(
                BinaryOp::Gt,
                Expression::binary(BinaryOp::Add, Expression::reference("$"), Expression::int(1)),
                Expression::int(5),
            ),
        };
        let mut fresh = FromProcedureSpec::default();
        assert_eq!(arithmetic.push_down(&mut fresh), PushDownOutcome::Unsupported);
        assert!(!fresh.filter_set);
    }
}
