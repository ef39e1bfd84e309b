//! Fixed-size worker pool shared by every running query.
//!
//! Work is handed out as [`Task`]s over an unbounded crossbeam channel. A
//! task that panics is caught on the worker thread and given a chance to
//! fail its query cleanly through [`Task::recover`]; the worker keeps going.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::{debug, error};

pub trait Task: Send + Sync {
    fn run(self: Arc<Self>);

    /// Called on the worker thread after `run` panicked.
    fn recover(&self, panic: String);
}

enum Job {
    Run(Arc<dyn Task>),
    Stop,
}

/// Cheap handle for scheduling onto a pool. Submitting after the pool shut
/// down drops the task.
#[derive(Clone)]
pub struct Submitter {
    tx: Sender<Job>,
}

impl Submitter {
    pub fn submit(&self, task: Arc<dyn Task>) {
        if self.tx.send(Job::Run(task)).is_err() {
            debug!("worker pool is shut down; task dropped");
        }
    }
}

pub struct WorkerPool {
    submitter: Submitter,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let rx = rx.clone();
            let h = thread::Builder::new()
                .name(format!("chronoflow-worker-{i}"))
                .spawn(move || worker(rx))?;
            handles.push(h);
        }
        Ok(Self {
            submitter: Submitter { tx },
            handles,
        })
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub fn submit(&self, task: Arc<dyn Task>) {
        self.submitter.submit(task);
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in &self.handles {
            let _ = self.submitter.tx.send(Job::Stop);
        }
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

fn worker(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        let task = match job {
            Job::Run(t) => t,
            Job::Stop => break,
        };
        let runner = task.clone();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(move || runner.run())) {
            let msg = panic_message(&payload);
            error!(panic = %msg, "task panicked");
            task.recover(msg);
        }
    }
}

pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
