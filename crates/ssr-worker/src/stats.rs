//! Counters describing what the worker has seen.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub requests: AtomicU64,
    pub rendered: AtomicU64,
    pub render_failures: AtomicU64,
    pub canceled: AtomicU64,
    pub stopped: AtomicU64,
    pub write_failures: AtomicU64,
    pub discarded_lines: AtomicU64,
    pub unmatched_responses: AtomicU64,
}

impl WorkerCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        WorkerStats {
            requests: load(&self.requests),
            rendered: load(&self.rendered),
            render_failures: load(&self.render_failures),
            canceled: load(&self.canceled),
            stopped: load(&self.stopped),
            write_failures: load(&self.write_failures),
            discarded_lines: load(&self.discarded_lines),
            unmatched_responses: load(&self.unmatched_responses),
        }
    }
}

/// Point-in-time copy of the worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Render calls that reached the write stage.
    pub requests: u64,
    /// Calls answered with HTML.
    pub rendered: u64,
    /// Calls answered with a renderer-reported error.
    pub render_failures: u64,
    /// Calls abandoned by their caller's cancellation or deadline.
    pub canceled: u64,
    /// Calls ended because the worker closed.
    pub stopped: u64,
    /// Calls whose request line could not be written.
    pub write_failures: u64,
    /// Stdout lines skipped as malformed or oversized.
    pub discarded_lines: u64,
    /// Responses whose id had no waiting caller (usually late answers to canceled calls).
    pub unmatched_responses: u64,
}
