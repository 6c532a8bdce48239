//! Append-only decision recorder.
//!
//! Wraps a [`DecisionLog`] backend. Appends for one paper are serialized
//! through a per-paper lane so their sequence numbers follow call order;
//! appends for different papers never wait on each other. There is no
//! update or delete path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use aixiv_state::{DecisionLog, DecisionRecord, NewDecision, PaperId, RecordId};

use crate::domain::error::Result;
use crate::metrics::METRICS;
use crate::obs;
use crate::stage::parse::clip;

/// Summaries longer than this are truncated on append.
pub const SUMMARY_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct DecisionRecorder {
    log: Arc<dyn DecisionLog>,
    lanes: Arc<Mutex<HashMap<PaperId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl DecisionRecorder {
    pub fn new(log: Arc<dyn DecisionLog>) -> Self {
        Self {
            log,
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lanes(&self) -> MutexGuard<'_, HashMap<PaperId, Arc<tokio::sync::Mutex<()>>>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lane(&self, paper_id: &PaperId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.lanes().entry(paper_id.clone()).or_default())
    }

    /// Drop the paper's lane once no append holds or waits on it.
    fn release_lane(&self, paper_id: &PaperId) {
        let mut lanes = self.lanes();
        if lanes
            .get(paper_id)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            lanes.remove(paper_id);
        }
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.lanes().len()
    }

    /// Append one record and return its id.
    pub async fn append(&self, mut decision: NewDecision) -> Result<RecordId> {
        decision.input_summary = clip(&decision.input_summary, SUMMARY_LIMIT);
        decision.output_summary = clip(&decision.output_summary, SUMMARY_LIMIT);

        let paper_id = decision.paper_id.clone();
        let lane = self.lane(&paper_id);
        let appended = {
            let _turn = lane.lock().await;
            self.log.append(decision).await
        };
        drop(lane);
        self.release_lane(&paper_id);
        let record = appended?;

        METRICS.inc_decisions_appended();
        obs::emit_decision_appended(record.paper_id.as_str(), record.seq, &record.action_type);
        Ok(record.record_id)
    }

    /// Records for a paper in append order.
    pub async fn list_for(&self, paper_id: &PaperId) -> Result<Vec<DecisionRecord>> {
        Ok(self.log.list_for(paper_id).await?)
    }

    /// Most recent records across all papers, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<DecisionRecord>> {
        Ok(self.log.list_recent(limit).await?)
    }
}

/// Markdown rendering of an audit trail.
pub fn format_audit_log(records: &[DecisionRecord]) -> String {
    let mut lines = vec!["# Decision Record Audit Log".to_string(), String::new()];
    if records.is_empty() {
        lines.push("_No decisions recorded._".to_string());
        return lines.join("\n");
    }
    for r in records {
        lines.push(format!(
            "## #{} {} ({})",
            r.seq,
            r.action_type,
            r.recorded_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
        ));
        lines.push(format!("- **Actor:** {}", r.actor));
        if let Some(model) = &r.model {
            lines.push(format!("- **Model:** {model}"));
        }
        if let Some(run_id) = &r.run_id {
            lines.push(format!("- **Run:** {run_id}"));
        }
        if let Some(fp) = &r.prompt_fingerprint {
            lines.push(format!("- **Prompt fingerprint:** `{fp}`"));
        }
        if !r.input_summary.is_empty() {
            lines.push(format!("- **Input:** {}", clip(&r.input_summary, 200)));
        }
        if !r.output_summary.is_empty() {
            lines.push(format!("- **Output:** {}", clip(&r.output_summary, 200)));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}
