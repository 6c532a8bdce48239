//! Execution of one pipeline run.
//!
//! A run walks its stage sequence strictly in order. Every attempt is a
//! new `StageExecution` row, a decision record and a pair of progress
//! events. Cancellation is observed between stages only. A run that ends
//! `failed` or `cancelled` never changes the paper's lifecycle state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use aixiv_state::{
    MaturityAssessmentRecord, NewDecision, PaperRecord, PaperState, PipelineRunRecord,
    Recommendation, ReviewRecord, RunId, RunKind, RunStatus, ScoreCardRecord, StageOutcome,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::guard::PaperGuard;
use super::Inner;
use crate::domain::error::{RailError, Result, StageError};
use crate::domain::lifecycle::Trigger;
use crate::metrics::METRICS;
use crate::obs;
use crate::progress::{ProgressEvent, ProgressKind};
use crate::retry::Attempt;
use crate::stage::compose::ComposeOutput;
use crate::stage::meta::MetaReview;
use crate::stage::redteam::RedTeamReport;
use crate::stage::review::ReviewReport;
use crate::stage::{sequence, StageContext, StageKind, StageOutput, StageSettings};
use crate::targeting::Evidence;

/// Handle to a spawned run.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    pub paper_id: aixiv_state::PaperId,
    pub kind: RunKind,
    cancel: watch::Sender<bool>,
    join: JoinHandle<Result<RunOutcome>>,
}

impl RunHandle {
    /// Ask the run to stop before its next stage.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Outcome of a succeeded or cancelled run; a failed run yields its error.
    pub async fn wait(self) -> Result<RunOutcome> {
        self.join
            .await
            .map_err(|e| RailError::TaskAborted(e.to_string()))?
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: PipelineRunRecord,
    /// Paper as committed by the run
    pub paper: PaperRecord,
    /// Payloads of every stage that completed
    pub outputs: BTreeMap<StageKind, serde_json::Value>,
    pub assessment: Option<MaturityAssessmentRecord>,
    pub score_cards: Vec<ScoreCardRecord>,
}

impl RunOutcome {
    pub fn output_as<T: DeserializeOwned>(&self, stage: StageKind) -> Option<T> {
        self.outputs
            .get(&stage)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

pub(super) fn spawn(
    inner: Arc<Inner>,
    run: PipelineRunRecord,
    ctx: StageContext,
    guard: PaperGuard,
) -> RunHandle {
    let (cancel, cancel_rx) = watch::channel(false);
    let span = obs::run_span(run.run_id.as_str(), run.paper_id.as_str(), run.kind.as_str());
    let handle_ids = (run.run_id.clone(), run.paper_id.clone(), run.kind);
    let task = RunTask {
        inner,
        paper: ctx.paper.clone(),
        run,
        ctx,
        cancel: cancel_rx,
        _guard: guard,
        seq: 0,
        started: Instant::now(),
        assessment: None,
        score_cards: Vec::new(),
    };
    let join = tokio::spawn(tracing::Instrument::instrument(task.execute(), span));
    RunHandle {
        run_id: handle_ids.0,
        paper_id: handle_ids.1,
        kind: handle_ids.2,
        cancel,
        join,
    }
}

struct RunTask {
    inner: Arc<Inner>,
    run: PipelineRunRecord,
    paper: PaperRecord,
    ctx: StageContext,
    cancel: watch::Receiver<bool>,
    _guard: PaperGuard,
    seq: u64,
    started: Instant,
    assessment: Option<MaturityAssessmentRecord>,
    score_cards: Vec<ScoreCardRecord>,
}

impl RunTask {
    async fn execute(mut self) -> Result<RunOutcome> {
        let stages = sequence(self.run.kind);
        obs::emit_run_started(
            self.run.run_id.as_str(),
            self.run.paper_id.as_str(),
            self.run.kind.as_str(),
            stages.len(),
        );

        for (position, &stage) in stages.iter().enumerate() {
            if self.cancel_requested() {
                return self.cancelled(stage).await;
            }
            match self.run_stage(position as u32, stage).await {
                Ok(output) => {
                    self.ctx.prior.insert(stage, output.payload);
                }
                Err(err) => return Err(self.failed(err).await),
            }
        }

        let committed = match self.run.kind {
            RunKind::Writer => self.commit_draft().await,
            RunKind::Review => self.commit_review().await,
            RunKind::Revision => Ok(()),
        };
        match committed {
            Ok(()) => self.finish(RunStatus::Succeeded).await,
            Err(err) => Err(self.failed(err).await),
        }
    }

    fn cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    fn publish(&mut self, kind: ProgressKind) {
        self.seq += 1;
        self.inner.progress.publish(ProgressEvent {
            run_id: self.run.run_id.clone(),
            paper_id: self.run.paper_id.clone(),
            seq: self.seq,
            kind,
            at: Utc::now(),
        });
    }

    fn decision(&self, action: &str, actor: &str) -> NewDecision {
        NewDecision {
            paper_id: self.run.paper_id.clone(),
            run_id: Some(self.run.run_id.clone()),
            action_type: action.to_string(),
            actor: actor.to_string(),
            model: None,
            prompt_fingerprint: None,
            input_summary: String::new(),
            output_summary: String::new(),
            metadata: json!({}),
        }
    }

    async fn record(&self, decision: NewDecision) -> Result<()> {
        self.inner.recorder.append(decision).await.map(|_| ())
    }

    fn input_summary(&self, stage: StageKind) -> String {
        let prior: Vec<&str> = self.ctx.prior.keys().map(StageKind::as_str).collect();
        format!(
            "{} \"{}\" v{} (prior: {})",
            stage,
            self.paper.title,
            self.paper.version,
            if prior.is_empty() {
                "none".to_string()
            } else {
                prior.join(", ")
            }
        )
    }

    // -----------------------------------------------------------------------
    // Stage attempts
    // -----------------------------------------------------------------------

    async fn run_stage(&mut self, position: u32, stage: StageKind) -> Result<StageOutput> {
        let run_id = self.run.run_id.clone();
        let runs = Arc::clone(&self.inner.stores.runs);
        self.ctx.settings = StageSettings::for_stage(&self.inner.config, stage);
        let mut attempt = Attempt::first();

        loop {
            self.ctx.corrective_hint = attempt.corrective_hint.clone();
            runs.begin_stage(
                &run_id,
                position,
                stage.as_str(),
                attempt.number,
                &self.input_summary(stage),
            )
            .await?;
            METRICS.inc_stages_executed();
            obs::emit_stage_attempt(run_id.as_str(), stage.as_str(), attempt.number);
            self.publish(ProgressKind::StageStarted {
                stage: stage.to_string(),
                attempt: attempt.number,
            });

            match stage.execute(&self.ctx, &self.inner.services).await {
                Ok(output) => {
                    runs.finish_stage(
                        &run_id,
                        position,
                        attempt.number,
                        StageOutcome::Succeeded {
                            output: output.payload.clone(),
                        },
                    )
                    .await?;
                    obs::emit_stage_finished(run_id.as_str(), stage.as_str(), attempt.number, None);

                    let draft = &output.decision;
                    let mut d = self.decision("stage_succeeded", stage.as_str());
                    d.model = Some(draft.model.clone());
                    d.prompt_fingerprint = draft.prompt_fingerprint.clone();
                    d.input_summary = draft.input_summary.clone();
                    d.output_summary = draft.output_summary.clone();
                    d.metadata = json!({
                        "stage": stage.as_str(),
                        "position": position,
                        "attempt": attempt.number,
                        "completion_calls": draft.completion_calls,
                    });
                    self.record(d).await?;

                    self.publish(ProgressKind::StageSucceeded {
                        stage: stage.to_string(),
                        attempt: attempt.number,
                    });
                    return Ok(output);
                }
                Err(err) => {
                    let next = self.inner.retry.next_attempt(&attempt, &err);
                    let message = err.to_string();
                    runs.finish_stage(
                        &run_id,
                        position,
                        attempt.number,
                        StageOutcome::Failed {
                            error: message.clone(),
                        },
                    )
                    .await?;
                    obs::emit_stage_finished(
                        run_id.as_str(),
                        stage.as_str(),
                        attempt.number,
                        Some(&message),
                    );

                    let mut d = self.decision("stage_failed", stage.as_str());
                    d.model = Some(self.ctx.settings.model.clone());
                    d.input_summary = self.input_summary(stage);
                    d.output_summary = message.clone();
                    d.metadata = json!({
                        "stage": stage.as_str(),
                        "position": position,
                        "attempt": attempt.number,
                        "error_kind": err.kind(),
                        "will_retry": next.is_some(),
                    });
                    self.record(d).await?;

                    self.publish(ProgressKind::StageFailed {
                        stage: stage.to_string(),
                        attempt: attempt.number,
                        error: message,
                        will_retry: next.is_some(),
                    });

                    match next {
                        Some((following, delay)) => {
                            METRICS.inc_stage_retries();
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            attempt = following;
                        }
                        None => {
                            return Err(RailError::Stage {
                                stage: stage.to_string(),
                                source: err,
                            })
                        }
                    }
                }
            }
        }
    }

    fn prior<T: DeserializeOwned>(&self, stage: StageKind) -> Result<T> {
        self.ctx.prior_as(stage).ok_or_else(|| RailError::Stage {
            stage: stage.to_string(),
            source: StageError::InvalidOutput("stage output missing from run context".into()),
        })
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    async fn commit_draft(&mut self) -> Result<()> {
        let draft: ComposeOutput = self.prior(StageKind::Compose)?;
        let mut paper = self.inner.stores.papers.get_paper(&self.run.paper_id).await?;

        if paper.state != PaperState::Submitted {
            let mut d = self.decision("draft_retained", "orchestrator");
            d.output_summary = format!(
                "paper is {}; draft kept in run output only",
                paper.state
            );
            self.record(d).await?;
            self.paper = paper;
            return Ok(());
        }

        paper.title = draft.title;
        paper.abstract_text = draft.abstract_text;
        paper.sections = draft.sections;
        paper.updated_at = Utc::now();
        self.inner.stores.papers.update_paper(paper.clone()).await?;

        let mut d = self.decision("draft_committed", "orchestrator");
        d.input_summary = self.input_summary(StageKind::Compose);
        d.output_summary = format!("{} sections for \"{}\"", paper.sections.len(), paper.title);
        self.record(d).await?;
        self.paper = paper;
        Ok(())
    }

    async fn commit_review(&mut self) -> Result<()> {
        let review: ReviewReport = self.prior(StageKind::Review)?;
        let redteam: RedTeamReport = self.prior(StageKind::RedTeam)?;
        let meta: MetaReview = self.prior(StageKind::MetaReview)?;
        let stores = &self.inner.stores;

        let mut paper = stores.papers.get_paper(&self.run.paper_id).await?;
        let cycle = paper.review_cycles + 1;
        let recommendation = Recommendation::from(meta.final_recommendation);

        let record = ReviewRecord {
            paper_id: paper.paper_id.clone(),
            paper_version: paper.version,
            review_cycle: cycle,
            run_id: self.run.run_id.clone(),
            scores: review.scores.clone(),
            overall: review.overall,
            recommendation,
            attested_items: review.attested_items.clone(),
            gate_results: review.gates.clone(),
            redteam_risk: redteam.overall_risk,
            weaknesses: review.weaknesses.clone(),
            required_changes: meta.required_changes.clone(),
            suggested_changes: meta.suggested_changes.clone(),
            arena_eligible: meta.arena_eligible,
            reviewed_at: Utc::now(),
        };
        stores.evidence.append_review(record.clone()).await?;

        // Evaluation and targeting: scenario failures only mark cards as missing.
        let report = self
            .inner
            .evaluation
            .evaluate(&paper, Some(&self.run.run_id))
            .await;
        stores.evidence.put_score_cards(&report.cards).await?;
        for decision in report.decisions {
            self.record(decision).await?;
        }

        let assessment = self.inner.targeting.assess(
            &paper,
            &Evidence {
                review: Some(&record),
                score_cards: &report.cards,
            },
        );
        stores.evidence.append_assessment(assessment.clone()).await?;
        let mut d = self.decision("maturity_assessed", "targeting");
        d.input_summary = format!("review cycle {cycle}, {} score cards", report.cards.len());
        d.output_summary = format!("{}; {} unmet items", assessment.level, assessment.unmet.len());
        d.metadata = json!({
            "level": assessment.level.to_string(),
            "unmet": assessment.unmet,
        });
        self.record(d).await?;

        let max_cycles = self.inner.config.lifecycle.max_review_cycles;
        let effective = if recommendation == Recommendation::Revise && cycle >= max_cycles {
            let mut d = self.decision("forced_rejection", "orchestrator");
            d.output_summary = format!(
                "revise recommended after {cycle} review cycles; limit is {max_cycles}"
            );
            d.metadata = json!({ "review_cycle": cycle, "max_review_cycles": max_cycles });
            self.record(d).await?;
            Recommendation::Reject
        } else {
            recommendation
        };

        paper.review_cycles = cycle;
        self.inner
            .transition(
                &mut paper,
                &Trigger::MetaReviewComplete(effective),
                Some(&self.run.run_id),
            )
            .await?;

        self.paper = paper;
        self.assessment = Some(assessment);
        self.score_cards = report.cards;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Terminal states
    // -----------------------------------------------------------------------

    fn outcome(self) -> RunOutcome {
        RunOutcome {
            run: self.run,
            paper: self.paper,
            outputs: self.ctx.prior,
            assessment: self.assessment,
            score_cards: self.score_cards,
        }
    }

    async fn finish(mut self, status: RunStatus) -> Result<RunOutcome> {
        self.run = self
            .inner
            .stores
            .runs
            .finish_run(&self.run.run_id, status, None)
            .await?;
        self.publish(ProgressKind::RunCompleted { status });
        obs::emit_run_finished(
            self.run.run_id.as_str(),
            status.as_str(),
            self.started.elapsed().as_millis() as u64,
        );
        Ok(self.outcome())
    }

    async fn cancelled(self, before: StageKind) -> Result<RunOutcome> {
        let mut d = self.decision("run_cancelled", "orchestrator");
        d.output_summary = format!("cancelled before stage {before}");
        d.metadata = json!({ "before_stage": before.as_str() });
        self.record(d).await?;
        METRICS.inc_runs_cancelled();
        self.finish(RunStatus::Cancelled).await
    }

    /// Record the failure and close the run. Persistence errors here are
    /// logged; the original error is what the caller sees.
    async fn failed(&mut self, err: RailError) -> RailError {
        let run_id = self.run.run_id.clone();
        let failure = err.to_string();
        let stage = match &err {
            RailError::Stage { stage, .. } => Some(stage.clone()),
            _ => None,
        };

        let mut d = self.decision("run_failed", "orchestrator");
        d.output_summary = failure.clone();
        d.metadata = json!({ "stage": stage, "error": failure });
        if let Err(e) = self.record(d).await {
            obs::emit_persistence_error(run_id.as_str(), &e);
        }
        match self
            .inner
            .stores
            .runs
            .finish_run(&run_id, RunStatus::Failed, Some(failure))
            .await
        {
            Ok(run) => self.run = run,
            Err(e) => obs::emit_persistence_error(run_id.as_str(), &e),
        }

        METRICS.inc_runs_failed();
        self.publish(ProgressKind::RunCompleted {
            status: RunStatus::Failed,
        });
        obs::emit_run_finished(
            run_id.as_str(),
            RunStatus::Failed.as_str(),
            self.started.elapsed().as_millis() as u64,
        );
        err
    }
}
