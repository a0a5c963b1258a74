//! Process-wide editor metrics.
//!
//! Plain atomic counters, incremented with relaxed ordering from any task.
//! `snapshot` gives a consistent-enough view for the status line and tests;
//! exact cross-counter consistency is not needed.

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

#[derive(Debug, Default)]
pub struct Metrics {
    pub events_published: AtomicU64,
    pub events_dropped: AtomicU64,
    pub handler_panics: AtomicU64,
    pub actions_dispatched: AtomicU64,
    pub keys_processed: AtomicU64,
    pub frames_rendered: AtomicU64,
    pub lsp_restarts: AtomicU64,
    pub files_indexed: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_dropped: u64,
    pub handler_panics: u64,
    pub actions_dispatched: u64,
    pub keys_processed: u64,
    pub frames_rendered: u64,
    pub lsp_restarts: u64,
    pub files_indexed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            actions_dispatched: self.actions_dispatched.load(Ordering::Relaxed),
            keys_processed: self.keys_processed.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            lsp_restarts: self.lsp_restarts.load(Ordering::Relaxed),
            files_indexed: self.files_indexed.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.events_published.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.handler_panics.store(0, Ordering::Relaxed);
        self.actions_dispatched.store(0, Ordering::Relaxed);
        self.keys_processed.store(0, Ordering::Relaxed);
        self.frames_rendered.store(0, Ordering::Relaxed);
        self.lsp_restarts.store(0, Ordering::Relaxed);
        self.files_indexed.store(0, Ordering::Relaxed);
    }
}

static GLOBAL: Lazy<Metrics> = Lazy::new(Metrics::new);

/// The process-wide metrics instance, initialized on first access.
pub fn global() -> &'static Metrics {
    &GLOBAL
}

pub fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}
