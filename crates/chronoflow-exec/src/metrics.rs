//! Process-wide counters and tracing hooks.
//!
//! Counters are plain atomics; wire them to an exporter in the embedding
//! binary.

use std::sync::atomic::{AtomicU64, Ordering};

static MESSAGES_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static BLOCKS_EMITTED: AtomicU64 = AtomicU64::new(0);
static ROWS_DROPPED: AtomicU64 = AtomicU64::new(0);
static DEFERRALS: AtomicU64 = AtomicU64::new(0);
static QUERIES_STARTED: AtomicU64 = AtomicU64::new(0);
static QUERIES_FINISHED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub messages_dispatched: u64,
    pub blocks_emitted: u64,
    pub rows_dropped: u64,
    pub deferrals: u64,
    pub queries_started: u64,
    pub queries_finished: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        messages_dispatched: MESSAGES_DISPATCHED.load(Ordering::Relaxed),
        blocks_emitted: BLOCKS_EMITTED.load(Ordering::Relaxed),
        rows_dropped: ROWS_DROPPED.load(Ordering::Relaxed),
        deferrals: DEFERRALS.load(Ordering::Relaxed),
        queries_started: QUERIES_STARTED.load(Ordering::Relaxed),
        queries_finished: QUERIES_FINISHED.load(Ordering::Relaxed),
    }
}

pub fn message_dispatched() {
    MESSAGES_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}

pub fn block_emitted() {
    BLOCKS_EMITTED.fetch_add(1, Ordering::Relaxed);
}

pub fn rows_dropped(n: u64) {
    ROWS_DROPPED.fetch_add(n, Ordering::Relaxed);
}

/// A task yielded because a downstream queue was full.
pub fn deferred() {
    DEFERRALS.fetch_add(1, Ordering::Relaxed);
}

pub fn query_started() {
    QUERIES_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub fn query_finished() {
    QUERIES_FINISHED.fetch_add(1, Ordering::Relaxed);
}

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::span!(tracing::Level::TRACE, "chronoflow", event);
    let _enter = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "metric");
    }
}
