//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    stages_executed: AtomicU64,
    stage_retries: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,
    decisions_appended: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            stages_executed: AtomicU64::new(0),
            stage_retries: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            decisions_appended: AtomicU64::new(0),
        }
    }

    /// One stage attempt dispatched.
    pub fn inc_stages_executed(&self) {
        self.stages_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stages_executed", "counter incremented");
    }

    /// One retry scheduled by the retry policy.
    pub fn inc_stage_retries(&self) {
        self.stage_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_retries", "counter incremented");
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_failed", "counter incremented");
    }

    pub fn inc_runs_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_cancelled", "counter incremented");
    }

    pub fn inc_decisions_appended(&self) {
        self.decisions_appended.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "decisions_appended", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            stages_executed = self.stages_executed(),
            stage_retries = self.stage_retries(),
            runs_failed = self.runs_failed(),
            runs_cancelled = self.runs_cancelled(),
            decisions_appended = self.decisions_appended(),
        );
    }

    pub fn stages_executed(&self) -> u64 {
        self.stages_executed.load(Ordering::Relaxed)
    }

    pub fn stage_retries(&self) -> u64 {
        self.stage_retries.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn runs_cancelled(&self) -> u64 {
        self.runs_cancelled.load(Ordering::Relaxed)
    }

    pub fn decisions_appended(&self) -> u64 {
        self.decisions_appended.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.stages_executed.store(0, Ordering::Relaxed);
        self.stage_retries.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.runs_cancelled.store(0, Ordering::Relaxed);
        self.decisions_appended.store(0, Ordering::Relaxed);
    }
}
