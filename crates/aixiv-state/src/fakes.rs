//! In-memory implementations of the storage traits
//!
//! `MemoryPaperStore`, `MemoryRunLedger`, `MemoryEvidenceStore` and
//! `MemoryDecisionLog` satisfy the trait contracts without any external
//! dependencies. The orchestrator uses them for ephemeral sessions and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryPaperStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryPaperStore {
    papers: Mutex<HashMap<PaperId, PaperRecord>>,
}

impl MemoryPaperStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaperStore for MemoryPaperStore {
    async fn insert_paper(&self, paper: PaperRecord) -> StorageResult<()> {
        let mut papers = lock(&self.papers);
        if papers.contains_key(&paper.paper_id) {
            return Err(StorageError::AlreadyExists {
                kind: "paper",
                id: paper.paper_id.0,
            });
        }
        papers.insert(paper.paper_id.clone(), paper);
        Ok(())
    }

    async fn get_paper(&self, paper_id: &PaperId) -> StorageResult<PaperRecord> {
        lock(&self.papers)
            .get(paper_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("paper", paper_id.as_str()))
    }

    async fn update_paper(&self, paper: PaperRecord) -> StorageResult<()> {
        let mut papers = lock(&self.papers);
        match papers.get_mut(&paper.paper_id) {
            Some(slot) => {
                *slot = paper;
                Ok(())
            }
            None => Err(StorageError::not_found("paper", paper.paper_id.0)),
        }
    }

    async fn list_papers(&self) -> StorageResult<Vec<PaperRecord>> {
        let mut all: Vec<PaperRecord> = lock(&self.papers).values().cloned().collect();
        all.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.paper_id.cmp(&b.paper_id))
        });
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// MemoryRunLedger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RunState {
    record: PipelineRunRecord,
    stages: Vec<StageExecution>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    runs: HashMap<RunId, RunState>,
    /// Run ids in creation order
    order: Vec<RunId>,
}

/// In-memory run ledger.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    inner: Mutex<LedgerInner>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn active_state<'a>(
    runs: &'a mut HashMap<RunId, RunState>,
    run_id: &RunId,
) -> StorageResult<&'a mut RunState> {
    let state = runs
        .get_mut(run_id)
        .ok_or_else(|| StorageError::not_found("run", run_id.as_str()))?;
    if state.record.status != RunStatus::Active {
        return Err(StorageError::InvalidRunState {
            run_id: run_id.0.clone(),
            status: state.record.status.as_str().to_string(),
            expected: "active".to_string(),
        });
    }
    Ok(state)
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn open_run(
        &self,
        paper_id: &PaperId,
        paper_version: u32,
        kind: RunKind,
    ) -> StorageResult<PipelineRunRecord> {
        let mut inner = lock(&self.inner);
        if let Some(active) = inner
            .runs
            .values()
            .find(|s| &s.record.paper_id == paper_id && s.record.status == RunStatus::Active)
        {
            return Err(StorageError::ActiveRunExists {
                paper_id: paper_id.0.clone(),
                run_id: active.record.run_id.0.clone(),
            });
        }

        let record = PipelineRunRecord {
            run_id: RunId::new(),
            paper_id: paper_id.clone(),
            paper_version,
            kind,
            status: RunStatus::Active,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        inner.order.push(record.run_id.clone());
        inner.runs.insert(
            record.run_id.clone(),
            RunState {
                record: record.clone(),
                stages: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn begin_stage(
        &self,
        run_id: &RunId,
        position: u32,
        stage: &str,
        attempt: u32,
        input_summary: &str,
    ) -> StorageResult<StageExecution> {
        let mut inner = lock(&self.inner);
        let state = active_state(&mut inner.runs, run_id)?;
        if state
            .stages
            .iter()
            .any(|s| s.position == position && s.attempt == attempt)
        {
            return Err(StorageError::AlreadyExists {
                kind: "stage attempt",
                id: format!("{run_id}/{position}/{attempt}"),
            });
        }
        let exec = StageExecution {
            run_id: run_id.clone(),
            position,
            stage: stage.to_string(),
            attempt,
            input_summary: input_summary.to_string(),
            output: None,
            status: StageStatus::Running,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        state.stages.push(exec.clone());
        Ok(exec)
    }

    async fn finish_stage(
        &self,
        run_id: &RunId,
        position: u32,
        attempt: u32,
        outcome: StageOutcome,
    ) -> StorageResult<StageExecution> {
        let mut inner = lock(&self.inner);
        let state = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StorageError::not_found("run", run_id.as_str()))?;
        let exec = state
            .stages
            .iter_mut()
            .find(|s| s.position == position && s.attempt == attempt)
            .ok_or_else(|| {
                StorageError::not_found("stage attempt", format!("{run_id}/{position}/{attempt}"))
            })?;
        if exec.status.is_terminal() {
            return Err(StorageError::ImmutableRecord {
                kind: "stage attempt",
                id: format!("{run_id}/{position}/{attempt}"),
                reason: format!("already {:?}", exec.status),
            });
        }
        match outcome {
            StageOutcome::Succeeded { output } => {
                exec.status = StageStatus::Succeeded;
                exec.output = Some(output);
            }
            StageOutcome::Failed { error } => {
                exec.status = StageStatus::Failed;
                exec.error = Some(error);
            }
        }
        exec.finished_at = Some(Utc::now());
        Ok(exec.clone())
    }

    async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        failure: Option<String>,
    ) -> StorageResult<PipelineRunRecord> {
        if !status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: status.as_str().to_string(),
                expected: "a terminal status".to_string(),
            });
        }
        let mut inner = lock(&self.inner);
        let state = active_state(&mut inner.runs, run_id)?;
        state.record.status = status;
        state.record.failure = failure;
        state.record.finished_at = Some(Utc::now());
        Ok(state.record.clone())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<PipelineRunRecord> {
        lock(&self.inner)
            .runs
            .get(run_id)
            .map(|s| s.record.clone())
            .ok_or_else(|| StorageError::not_found("run", run_id.as_str()))
    }

    async fn list_runs(&self, paper_id: &PaperId) -> StorageResult<Vec<PipelineRunRecord>> {
        let inner = lock(&self.inner);
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.runs.get(id))
            .filter(|s| &s.record.paper_id == paper_id)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn active_run(&self, paper_id: &PaperId) -> StorageResult<Option<PipelineRunRecord>> {
        Ok(lock(&self.inner)
            .runs
            .values()
            .find(|s| &s.record.paper_id == paper_id && s.record.status == RunStatus::Active)
            .map(|s| s.record.clone()))
    }

    async fn stage_executions(&self, run_id: &RunId) -> StorageResult<Vec<StageExecution>> {
        let inner = lock(&self.inner);
        let state = inner
            .runs
            .get(run_id)
            .ok_or_else(|| StorageError::not_found("run", run_id.as_str()))?;
        let mut stages = state.stages.clone();
        stages.sort_by_key(|s| (s.position, s.attempt));
        Ok(stages)
    }
}

// ---------------------------------------------------------------------------
// MemoryEvidenceStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EvidenceInner {
    cards: HashMap<(PaperId, u32, Scenario), ScoreCardRecord>,
    assessments: HashMap<PaperId, Vec<MaturityAssessmentRecord>>,
    reviews: HashMap<PaperId, Vec<ReviewRecord>>,
}

#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    inner: Mutex<EvidenceInner>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn put_score_cards(&self, cards: &[ScoreCardRecord]) -> StorageResult<()> {
        let mut inner = lock(&self.inner);
        for card in cards {
            inner.cards.insert(
                (card.paper_id.clone(), card.paper_version, card.scenario),
                card.clone(),
            );
        }
        Ok(())
    }

    async fn score_cards(
        &self,
        paper_id: &PaperId,
        paper_version: u32,
    ) -> StorageResult<Vec<ScoreCardRecord>> {
        let inner = lock(&self.inner);
        Ok(Scenario::ALL
            .iter()
            .filter_map(|s| inner.cards.get(&(paper_id.clone(), paper_version, *s)))
            .cloned()
            .collect())
    }

    async fn append_assessment(&self, assessment: MaturityAssessmentRecord) -> StorageResult<()> {
        lock(&self.inner)
            .assessments
            .entry(assessment.paper_id.clone())
            .or_default()
            .push(assessment);
        Ok(())
    }

    async fn assessments(
        &self,
        paper_id: &PaperId,
    ) -> StorageResult<Vec<MaturityAssessmentRecord>> {
        Ok(lock(&self.inner)
            .assessments
            .get(paper_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_review(&self, review: ReviewRecord) -> StorageResult<()> {
        lock(&self.inner)
            .reviews
            .entry(review.paper_id.clone())
            .or_default()
            .push(review);
        Ok(())
    }

    async fn reviews(&self, paper_id: &PaperId) -> StorageResult<Vec<ReviewRecord>> {
        Ok(lock(&self.inner)
            .reviews
            .get(paper_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryDecisionLog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LogInner {
    by_paper: HashMap<PaperId, Vec<DecisionRecord>>,
    /// (paper, index) in global append order
    global: Vec<(PaperId, usize)>,
}

/// In-memory append-only decision log.
#[derive(Debug, Default)]
pub struct MemoryDecisionLog {
    inner: Mutex<LogInner>,
}

impl MemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionLog for MemoryDecisionLog {
    async fn append(&self, decision: NewDecision) -> StorageResult<DecisionRecord> {
        let mut inner = lock(&self.inner);
        let records = inner.by_paper.entry(decision.paper_id.clone()).or_default();
        let now = Utc::now();
        let recorded_at = match records.last() {
            Some(last) if last.recorded_at > now => last.recorded_at,
            _ => now,
        };
        let record = DecisionRecord {
            record_id: RecordId::new(),
            paper_id: decision.paper_id,
            seq: records.len() as u64 + 1,
            run_id: decision.run_id,
            action_type: decision.action_type,
            actor: decision.actor,
            model: decision.model,
            prompt_fingerprint: decision.prompt_fingerprint,
            input_summary: decision.input_summary,
            output_summary: decision.output_summary,
            metadata: decision.metadata,
            recorded_at,
        };
        records.push(record.clone());
        let index = records.len() - 1;
        inner.global.push((record.paper_id.clone(), index));
        Ok(record)
    }

    async fn list_for(&self, paper_id: &PaperId) -> StorageResult<Vec<DecisionRecord>> {
        Ok(lock(&self.inner)
            .by_paper
            .get(paper_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<DecisionRecord>> {
        let inner = lock(&self.inner);
        Ok(inner
            .global
            .iter()
            .rev()
            .take(limit)
            .filter_map(|(paper, i)| inner.by_paper.get(paper).and_then(|r| r.get(*i)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(paper: &PaperId, action: &str) -> NewDecision {
        NewDecision {
            paper_id: paper.clone(),
            run_id: None,
            action_type: action.to_string(),
            actor: "test".to_string(),
            model: None,
            prompt_fingerprint: None,
            input_summary: String::new(),
            output_summary: String::new(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn decision_seq_is_per_paper() {
        let log = MemoryDecisionLog::new();
        let a = PaperId::from("a");
        let b = PaperId::from("b");
        log.append(decision(&a, "x")).await.unwrap();
        log.append(decision(&b, "x")).await.unwrap();
        let r = log.append(decision(&a, "y")).await.unwrap();
        assert_eq!(r.seq, 2);
        assert_eq!(log.list_for(&b).await.unwrap()[0].seq, 1);
    }

    #[tokio::test]
    async fn list_recent_is_newest_first() {
        let log = MemoryDecisionLog::new();
        let a = PaperId::from("a");
        for action in ["first", "second", "third"] {
            log.append(decision(&a, action)).await.unwrap();
        }
        let recent = log.list_recent(2).await.unwrap();
        let actions: Vec<_> = recent.iter().map(|r| r.action_type.as_str()).collect();
        assert_eq!(actions, vec!["third", "second"]);
    }
}
