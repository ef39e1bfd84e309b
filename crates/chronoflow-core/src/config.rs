//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard cap for column storage across all running queries.
    pub memory_limit_bytes: usize,

    /// Threads in the shared worker pool.
    pub worker_threads: usize,

    /// Messages a transformation may dispatch before yielding its worker.
    pub throughput: usize,

    /// Pending messages per edge before the producer is deferred.
    pub queue_capacity: usize,

    /// Values handed to an aggregate or selector per call.
    pub chunk_size: usize,

    /// Allowed lateness of the default after-watermark trigger.
    pub default_lateness_ns: i64,

    /// Per-query deadline; expiry cancels the query.
    pub query_deadline_ms: Option<u64>,

    /// Optional seed for `sample` random positions.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 512 * 1024 * 1024,
            worker_threads: 4,
            throughput: 64,
            queue_capacity: 1024,
            chunk_size: 1024,
            default_lateness_ns: 0,
            query_deadline_ms: None,
            seed: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `CHRONOFLOW_MEMORY_LIMIT_BYTES`
    /// - `CHRONOFLOW_WORKER_THREADS`
    /// - `CHRONOFLOW_THROUGHPUT`
    /// - `CHRONOFLOW_QUEUE_CAPACITY`
    /// - `CHRONOFLOW_CHUNK_SIZE`
    /// - `CHRONOFLOW_DEFAULT_LATENESS_NS`
    /// - `CHRONOFLOW_QUERY_DEADLINE_MS`
    /// - `CHRONOFLOW_SEED`
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse("CHRONOFLOW_MEMORY_LIMIT_BYTES") {
            cfg.memory_limit_bytes = v;
        }
        if let Some(v) = env_parse("CHRONOFLOW_WORKER_THREADS") {
            cfg.worker_threads = v;
        }
        if let Some(v) = env_parse("CHRONOFLOW_THROUGHPUT") {
            cfg.throughput = v;
        }
        if let Some(v) = env_parse("CHRONOFLOW_QUEUE_CAPACITY") {
            cfg.queue_capacity = v;
        }
        if let Some(v) = env_parse("CHRONOFLOW_CHUNK_SIZE") {
            cfg.chunk_size = v;
        }
        if let Some(v) = env_parse("CHRONOFLOW_DEFAULT_LATENESS_NS") {
            cfg.default_lateness_ns = v;
        }
        if let Some(v) = env_parse("CHRONOFLOW_QUERY_DEADLINE_MS") {
            cfg.query_deadline_ms = Some(v);
        }
        if let Some(v) = env_parse("CHRONOFLOW_SEED") {
            cfg.seed = Some(v);
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("worker_threads", self.worker_threads),
            ("throughput", self.throughput),
            ("queue_capacity", self.queue_capacity),
            ("chunk_size", self.chunk_size),
        ];
        for (name, v) in checks {
            if v == 0 {
                return Err(Error::InvalidSpec(format!("{name} must be positive")));
            }
        }
        if self.default_lateness_ns < 0 {
            return Err(Error::InvalidSpec("default_lateness_ns must not be negative".into()));
        }
        Ok(())
    }
}
