//! Executor: turns a physical plan into running nodes and result streams.
//!
//! Procedures are instantiated in reverse topological order so every
//! child's transport exists before its parents are wired to it. Result
//! procedures additionally feed a [`ResultSink`]. Sources get their own
//! threads; transformations share the executor's worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chronoflow_block::Block;
use chronoflow_core::id::{DatasetId, ProcedureId};
use chronoflow_core::operation::OperationDag;
use chronoflow_core::{EngineConfig, Error, Result, Time};
use chronoflow_io::StorageReader;
use chronoflow_mem::Allocator;
use chronoflow_planner::{plan_logical, plan_physical, PhysicalPlan};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::cache::BuilderCache;
use crate::context::{CancelToken, ExecutionContext, SourceContext};
use crate::dataset::{AccumulationMode, Dataset};
use crate::metrics;
use crate::registry::Registry;
use crate::result::{result_channel, ResultStream};
use crate::scheduler::WorkerPool;
use crate::source::Source;
use crate::transformation::Downstream;
use crate::transport::{Node, NodeOptions, Transport};

pub struct Executor {
    config: EngineConfig,
    allocator: Allocator,
    pool: WorkerPool,
    reader: Arc<dyn StorageReader>,
    registry: Arc<Registry>,
}

impl Executor {
    pub fn new(config: EngineConfig, registry: Arc<Registry>, reader: Arc<dyn StorageReader>) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.worker_threads)
            .map_err(|e| Error::Internal(format!("cannot start worker pool: {e}")))?;
        Ok(Self {
            allocator: Allocator::new(config.memory_limit_bytes),
            config,
            pool,
            reader,
            registry,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Logical then physical planning of `dag`.
    pub fn plan(&self, dag: &OperationDag, now: Option<Time>) -> Result<PhysicalPlan> {
        let logical = plan_logical(dag, self.registry.procedures(), now)?;
        plan_physical(&logical)
    }

    pub fn query(&self, dag: &OperationDag) -> Result<Query> {
        let plan = self.plan(dag, None)?;
        self.execute(&plan)
    }

    pub fn execute(&self, plan: &PhysicalPlan) -> Result<Query> {
        let fingerprint = plan.fingerprint();
        let bounds = plan.resolved_bounds();
        info!(plan = %fingerprint.short(), %bounds, procedures = plan.order.len(), "query started");
        metrics::query_started();

        let cancel = CancelToken::new();
        let mut transports: BTreeMap<ProcedureId, Arc<Transport>> = BTreeMap::new();
        let mut sources: Vec<(String, Box<dyn Source>)> = Vec::new();
        let mut results = Vec::new();

        for id in plan.order.iter().rev() {
            let p = plan
                .procedure(id)
                .ok_or_else(|| Error::Internal(format!("procedure {id} missing from plan")))?;
            let name = plan.name(id);

            let mut outputs: Vec<Arc<dyn Downstream>> = Vec::with_capacity(p.children.len() + 1);
            for c in &p.children {
                let t = transports
                    .get(c)
                    .ok_or_else(|| Error::Internal(format!("child {c} of {name} built out of order")))?;
                outputs.push(t.clone());
            }
            if plan.results.contains(id) {
                let (sink, stream) = result_channel(&name, self.config.queue_capacity);
                outputs.push(Arc::new(sink));
                results.push((name.clone(), stream));
            }

            if p.is_source() {
                let ctx = SourceContext {
                    id: DatasetId::from(*id),
                    name: name.clone(),
                    bounds,
                    now: plan.now,
                    outputs,
                    reader: self.reader.clone(),
                    allocator: self.allocator.clone(),
                    cancel: cancel.clone(),
                    config: self.config.clone(),
                };
                let build = self.registry.source(p.kind())?;
                sources.push((name, build(&*p.spec, ctx)?));
                continue;
            }

            let ctx = ExecutionContext {
                id: *id,
                name: name.clone(),
                parents: p.parents.iter().copied().map(DatasetId::from).collect(),
                bounds,
                now: plan.now,
                config: self.config.clone(),
                allocator: self.allocator.clone(),
            };
            let mut dataset = Dataset::new(
                DatasetId::from(*id),
                AccumulationMode::Accumulating,
                BuilderCache::new(self.allocator.clone(), ctx.default_trigger()),
            );
            for o in &outputs {
                dataset.add_downstream(o.clone());
            }
            let build = self.registry.transformation(p.kind())?;
            let transformation = build(&*p.spec, dataset, &ctx)?;
            let node = Node::new(
                NodeOptions {
                    name: name.clone(),
                    parents: ctx.parents.clone(),
                    outputs,
                    capacity: self.config.queue_capacity,
                    throughput: self.config.throughput,
                    cancel: cancel.clone(),
                },
                transformation,
                self.pool.submitter(),
            );
            debug!(procedure = %name, kind = p.kind(), "transformation ready");
            transports.insert(*id, Arc::new(Transport::new(node)));
        }

        let mut handles = Vec::with_capacity(sources.len());
        for (name, source) in sources {
            let h = thread::Builder::new()
                .name(format!("chronoflow-source-{name}"))
                .spawn(move || source.run())
                .map_err(|e| Error::Internal(format!("cannot start source {name}: {e}")))?;
            handles.push(h);
        }

        let deadline = match self.config.query_deadline_ms {
            Some(ms) => Some(spawn_deadline(cancel.clone(), StdDuration::from_millis(ms))?),
            None => None,
        };

        Ok(Query {
            cancel,
            results,
            sources: handles,
            _deadline: deadline,
        })
    }
}

/// Cancels `cancel` once `after` elapses, unless the returned sender is
/// dropped first.
fn spawn_deadline(cancel: CancelToken, after: StdDuration) -> Result<Sender<()>> {
    let (tx, rx) = bounded::<()>(0);
    thread::Builder::new()
        .name("chronoflow-deadline".into())
        .spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(after) {
                warn!(deadline_ms = after.as_millis() as u64, "query deadline expired; canceling");
                cancel.cancel();
            }
        })
        .map_err(|e| Error::Internal(format!("cannot start deadline timer: {e}")))?;
    Ok(tx)
}

/// A running query.
///
/// Dropping it cancels whatever is still running and waits for the sources
/// to stop, so streams taken with [`Query::results`] end with `Canceled`
/// unless they were drained first.
pub struct Query {
    cancel: CancelToken,
    results: Vec<(String, ResultStream)>,
    sources: Vec<JoinHandle<()>>,
    _deadline: Option<Sender<()>>,
}

impl Query {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Takes the result streams, named after their procedures. A second call
    /// returns nothing.
    pub fn results(&mut self) -> Vec<(String, ResultStream)> {
        std::mem::take(&mut self.results)
    }

    /// Reads every result to its end, in plan order.
    pub fn collect(mut self) -> Result<Vec<(String, Vec<Block>)>> {
        let mut out = Vec::new();
        for (name, stream) in self.results() {
            out.push((name, stream.collect_blocks()?));
        }
        Ok(out)
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        let running = self.sources.iter().filter(|h| !h.is_finished()).count();
        if running > 0 {
            debug!(running, "query dropped with sources still reading; canceling");
            self.cancel.cancel();
        }
        for h in self.sources.drain(..) {
            if h.join().is_err() {
                warn!("source thread panicked");
            }
        }
        metrics::query_finished();
        let m = metrics::snapshot();
        metrics::emit_span(
            "query_finished",
            &[
                ("blocks_emitted", m.blocks_emitted.to_string()),
                ("rows_dropped", m.rows_dropped.to_string()),
                ("deferrals", m.deferrals.to_string()),
            ],
        );
    }
}
