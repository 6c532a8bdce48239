//! Structured observability hooks for pipeline lifecycle events.
//!
//! - [`run_span`] builds the span a spawned run is instrumented with
//! - `emit_*` functions log one named event each at `info!`
//!   (`warn!` for failures)

use tracing::{info, warn, Span};

/// Span tagged with run and paper id; attach with `Instrument::instrument`.
pub fn run_span(run_id: &str, paper_id: &str, kind: &str) -> Span {
    tracing::info_span!("aixiv.run", run_id = %run_id, paper_id = %paper_id, kind = %kind)
}

pub fn emit_run_started(run_id: &str, paper_id: &str, kind: &str, stages: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        paper_id = %paper_id,
        kind = %kind,
        stages = stages,
    );
}

pub fn emit_stage_attempt(run_id: &str, stage: &str, attempt: u32) {
    info!(event = "stage.attempt", run_id = %run_id, stage = %stage, attempt = attempt);
}

/// Emit event: stage attempt finished; `error` is set on failure.
pub fn emit_stage_finished(run_id: &str, stage: &str, attempt: u32, error: Option<&str>) {
    match error {
        None => info!(
            event = "stage.succeeded",
            run_id = %run_id,
            stage = %stage,
            attempt = attempt,
        ),
        Some(e) => warn!(
            event = "stage.failed",
            run_id = %run_id,
            stage = %stage,
            attempt = attempt,
            error = %e,
        ),
    }
}

pub fn emit_run_finished(run_id: &str, status: &str, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_transition(paper_id: &str, from: &str, to: &str, trigger: &str) {
    info!(
        event = "paper.transition",
        paper_id = %paper_id,
        from = %from,
        to = %to,
        trigger = %trigger,
    );
}

pub fn emit_decision_appended(paper_id: &str, seq: u64, action: &str) {
    info!(event = "decision.appended", paper_id = %paper_id, seq = seq, action = %action);
}

pub fn emit_evaluation_finished(paper_id: &str, version: u32, scored: usize, failed: usize) {
    info!(
        event = "evaluation.finished",
        paper_id = %paper_id,
        version = version,
        scored = scored,
        failed = failed,
    );
}

pub fn emit_assessment(paper_id: &str, level: &str, unmet: usize) {
    info!(event = "maturity.assessed", paper_id = %paper_id, level = %level, unmet = unmet);
}

/// Emit event: a persistence write that could not be completed (warning level).
pub fn emit_persistence_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.persistence_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_builds_without_subscriber() {
        let span = run_span("r1", "p1", "review");
        let _entered = span.enter();
        emit_stage_attempt("r1", "review", 1);
    }
}
