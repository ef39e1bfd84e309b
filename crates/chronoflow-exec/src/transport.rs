//! Queued delivery of messages into a transformation.
//!
//! Every transformation sits behind a [`Node`]: an inbound queue plus a
//! scheduled flag. Pushing a message enqueues it and, if the node is idle,
//! schedules the node on the worker pool. A scheduled node dispatches at
//! most `throughput` messages before yielding its worker, and defers while
//! any of its outputs is over capacity.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use chronoflow_core::id::DatasetId;
use chronoflow_core::{Error, Result};
use tracing::{trace, warn};

use crate::context::CancelToken;
use crate::fail_point;
use crate::metrics;
use crate::scheduler::{Submitter, Task};
use crate::transformation::{Downstream, Message, Transformation};

pub struct Node {
    name: String,
    queue: Mutex<VecDeque<Message>>,
    capacity: usize,
    throughput: usize,
    scheduled: AtomicBool,
    done: AtomicBool,
    transformation: Mutex<Box<dyn Transformation>>,
    parents: Vec<DatasetId>,
    /// Parents that have not finished yet.
    pending: Mutex<BTreeSet<DatasetId>>,
    outputs: Vec<Arc<dyn Downstream>>,
    cancel: CancelToken,
    submitter: Submitter,
}

pub struct NodeOptions {
    pub name: String,
    pub parents: Vec<DatasetId>,
    pub outputs: Vec<Arc<dyn Downstream>>,
    pub capacity: usize,
    pub throughput: usize,
    pub cancel: CancelToken,
}

impl Node {
    pub fn new(
        opts: NodeOptions,
        transformation: Box<dyn Transformation>,
        submitter: Submitter,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: opts.name,
            queue: Mutex::new(VecDeque::new()),
            capacity: opts.capacity.max(1),
            throughput: opts.throughput.max(1),
            scheduled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            transformation: Mutex::new(transformation),
            pending: Mutex::new(opts.parents.iter().copied().collect()),
            parents: opts.parents,
            outputs: opts.outputs,
            cancel: opts.cancel,
            submitter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, msg: Message) {
        if self.is_done() {
            return;
        }
        self.queue().push_back(msg);
        self.schedule();
    }

    fn schedule(self: &Arc<Self>) {
        if !self.scheduled.swap(true, Ordering::SeqCst) {
            self.submitter.submit(self.clone());
        }
    }

    fn blocked(&self) -> bool {
        self.outputs.iter().any(|d| d.is_full())
    }

    fn dispatch(&self, msg: Message) {
        if self.is_done() {
            return;
        }
        fail_point!("panic_dispatch");
        metrics::message_dispatched();
        let mut t = self
            .transformation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_canceled() {
            self.fail(&mut **t, msg.src(), Error::Canceled);
            return;
        }
        trace!(node = %self.name, message = msg.name(), "dispatch");
        let src = msg.src();
        let res: Result<()> = match msg {
            Message::Retract { src, meta } => t.retract_block(src, &meta),
            Message::Process { src, block } => t.process(src, &block),
            Message::UpdateWatermark { src, time } => t.update_watermark(src, time),
            Message::UpdateProcessingTime { src, time } => t.update_processing_time(src, time),
            Message::Finish { src, err: Some(e) } => {
                self.fail(&mut **t, src, e);
                return;
            }
            Message::Finish { src, err: None } => {
                let last = {
                    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                    pending.remove(&src);
                    pending.is_empty()
                };
                if last {
                    self.done.store(true, Ordering::SeqCst);
                    t.finish(src, None);
                }
                Ok(())
            }
        };
        if let Err(e) = res {
            warn!(node = %self.name, error = %e, "transformation failed");
            self.fail(&mut **t, src, e);
        }
    }

    fn fail(&self, t: &mut dyn Transformation, src: DatasetId, err: Error) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        t.finish(src, Some(err));
        self.queue().clear();
    }
}

impl Task for Node {
    fn run(self: Arc<Self>) {
        for _ in 0..self.throughput {
            if self.queue().is_empty() {
                break;
            }
            if self.blocked() {
                metrics::deferred();
                thread::yield_now();
                self.submitter.submit(self.clone());
                return;
            }
            let Some(msg) = self.queue().pop_front() else {
                break;
            };
            self.dispatch(msg);
        }
        if !self.queue().is_empty() {
            self.submitter.submit(self.clone());
            return;
        }
        self.scheduled.store(false, Ordering::SeqCst);
        if !self.queue().is_empty() {
            self.schedule();
        }
    }

    fn recover(&self, panic: String) {
        let mut t = self
            .transformation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let src = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .copied()
            .or_else(|| self.parents.first().copied());
        if let Some(src) = src {
            self.fail(
                &mut **t,
                src,
                Error::Internal(format!("transformation {} panicked: {panic}", self.name)),
            );
        } else {
            self.done.store(true, Ordering::SeqCst);
            self.queue().clear();
        }
        self.scheduled.store(false, Ordering::SeqCst);
    }
}

/// The [`Downstream`] face of a node.
#[derive(Clone)]
pub struct Transport {
    node: Arc<Node>,
}

impl Transport {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

impl Downstream for Transport {
    fn push(&self, msg: Message) {
        self.node.enqueue(msg);
    }

    fn is_full(&self) -> bool {
        self.node.queue().len() >= self.node.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::WorkerPool;
    use crate::testing::{dataset_id, float_block, Collector};
    use chronoflow_block::{Block, BlockMetadata};
    use chronoflow_core::{Bounds, Time};
    use std::time::{Duration, Instant};

    /// Forwards every block and finish to a collector.
    struct Passthrough {
        out: Arc<Collector>,
    }

    impl Transformation for Passthrough {
        fn retract_block(&mut self, _: DatasetId, _: &BlockMetadata) -> Result<()> {
            Ok(())
        }
        fn process(&mut self, src: DatasetId, block: &Block) -> Result<()> {
            if block.nrows() > 2 {
                return Err(Error::Internal("too many rows".into()));
            }
            self.out.push(Message::Process {
                src,
                block: block.clone(),
            });
            Ok(())
        }
        fn update_watermark(&mut self, _: DatasetId, _: Time) -> Result<()> {
            Ok(())
        }
        fn update_processing_time(&mut self, _: DatasetId, _: Time) -> Result<()> {
            Ok(())
        }
        fn finish(&mut self, src: DatasetId, err: Option<Error>) {
            self.out.push(Message::Finish { src, err });
        }
    }

    fn node(pool: &WorkerPool, parents: &[&str]) -> (Transport, Arc<Collector>) {
        let out = Arc::new(Collector::default());
        let n = Node::new(
            NodeOptions {
                name: "t".into(),
                parents: parents.iter().map(|p| dataset_id(p)).collect(),
                outputs: Vec::new(),
                capacity: 4,
                throughput: 2,
                cancel: CancelToken::new(),
            },
            Box::new(Passthrough { out: out.clone() }),
            pool.submitter(),
        );
        (Transport::new(n), out)
    }

    fn wait_finished(c: &Collector) -> Option<Error> {
        let start = Instant::now();
        loop {
            if let Some(err) = c.finished() {
                return err;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn finishes_after_every_parent() {
        let pool = WorkerPool::new(2).expect("pool");
        let (t, out) = node(&pool, &["a", "b"]);
        let b = float_block(Bounds::new(Time(0), Time(10)), &[], &[(1, 1.0)]).expect("block");
        for _ in 0..5 {
            t.push(Message::Process {
                src: dataset_id("a"),
                block: b.clone(),
            });
        }
        t.push(Message::Finish {
            src: dataset_id("a"),
            err: None,
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(out.finished(), None);
        t.push(Message::Finish {
            src: dataset_id("b"),
            err: None,
        });
        assert_eq!(wait_finished(&out), None);
        assert_eq!(out.blocks().len(), 5);
    }

    #[test]
    fn handler_error_finishes_once_and_drops_input() {
        let pool = WorkerPool::new(1).expect("pool");
        let (t, out) = node(&pool, &["a"]);
        let big = float_block(
            Bounds::new(Time(0), Time(10)),
            &[],
            &[(1, 1.0), (2, 2.0), (3, 3.0)],
        )
        .expect("block");
        t.push(Message::Process {
            src: dataset_id("a"),
            block: big,
        });
        t.push(Message::Finish {
            src: dataset_id("a"),
            err: None,
        });
        let err = wait_finished(&out).expect("error");
        assert_eq!(err.kind(), "internal");
        thread::sleep(Duration::from_millis(20));
        let finishes = out
            .messages()
            .iter()
            .filter(|m| matches!(m, Message::Finish { .. }))
            .count();
        assert_eq!(finishes, 1);
    }
}
