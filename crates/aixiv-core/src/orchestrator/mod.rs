//! Orchestrator: sequences agent stages for a paper and owns every
//! lifecycle transition.
//!
//! All runs and direct mutations for one paper go through a [`PaperGuard`],
//! so at most one of them is in flight per paper. Transitions are resolved
//! by [`next_state`] and are written together with a `state_transition`
//! decision record.

mod guard;
mod run;

pub use run::{RunHandle, RunOutcome};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use aixiv_state::fakes::{
    MemoryDecisionLog, MemoryEvidenceStore, MemoryPaperStore, MemoryRunLedger,
};
use aixiv_state::{
    DecisionLog, DecisionRecord, EvidenceStore, MaturityAssessmentRecord, MaturityLevel,
    NewDecision, PaperId, PaperRecord, PaperSection, PaperState, PaperStore, PipelineRunRecord,
    ReviewRecord, RunId, RunKind, RunLedger, RunStatus, ScoreCardRecord, StageExecution,
    StageStatus,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use self::guard::{ActiveRuns, PaperGuard};
use crate::arena::{ArenaEntry, ArenaInput, ArenaRanker, ArenaStats, LeaderboardFilter};
use crate::completion::CompletionService;
use crate::config::RailConfig;
use crate::decision::DecisionRecorder;
use crate::domain::error::{RailError, Result};
use crate::domain::lifecycle::{next_state, Trigger};
use crate::eval::EvaluationEngine;
use crate::literature::{LiteratureSearch, NoLiterature};
use crate::obs;
use crate::progress::{ProgressBus, ProgressSubscription};
use crate::retry::RetryPolicy;
use crate::stage::revise::RevisionProposal;
use crate::stage::{sequence, StageContext, StageKind, StageServices, StageSettings};
use crate::targeting::gates::{DomainGateRegistry, DomainGateSet};
use crate::targeting::TargetingEngine;

/// Persistence backends used by the orchestrator.
#[derive(Clone)]
pub struct Stores {
    pub papers: Arc<dyn PaperStore>,
    pub runs: Arc<dyn RunLedger>,
    pub evidence: Arc<dyn EvidenceStore>,
    pub decisions: Arc<dyn DecisionLog>,
}

impl Stores {
    /// In-memory backends for tests and local runs.
    pub fn in_memory() -> Self {
        Self {
            papers: Arc::new(MemoryPaperStore::new()),
            runs: Arc::new(MemoryRunLedger::new()),
            evidence: Arc::new(MemoryEvidenceStore::new()),
            decisions: Arc::new(MemoryDecisionLog::new()),
        }
    }
}

/// A paper as handed in by its authors.
#[derive(Debug, Clone, Default)]
pub struct NewPaper {
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub sections: Vec<PaperSection>,
}

impl NewPaper {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = text.into();
        self
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_section(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.sections.push(PaperSection::new(name, content));
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder {
    config: RailConfig,
    stores: Option<Stores>,
    completion: Option<Arc<dyn CompletionService>>,
    literature: Option<Arc<dyn LiteratureSearch>>,
    gates: DomainGateRegistry,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            config: RailConfig::default(),
            stores: None,
            completion: None,
            literature: None,
            gates: DomainGateRegistry::with_defaults(),
        }
    }
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: RailConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn literature(mut self, literature: Arc<dyn LiteratureSearch>) -> Self {
        self.literature = Some(literature);
        self
    }

    /// Add a domain gate set on top of the built-in ones.
    pub fn gate_set(mut self, set: Arc<dyn DomainGateSet>) -> Self {
        self.gates.register(set);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;
        let completion = self
            .completion
            .ok_or_else(|| RailError::Config("a completion service is required".into()))?;
        let stores = self.stores.unwrap_or_else(Stores::in_memory);
        let retry = RetryPolicy::new(&self.config.retry);

        let evaluation = EvaluationEngine::new(
            Arc::clone(&completion),
            retry.clone(),
            self.config.models.strong_model.clone(),
            self.config.sampling.clone(),
        );
        let services = StageServices {
            completion,
            literature: self
                .literature
                .unwrap_or_else(|| Arc::new(NoLiterature)),
        };

        let inner = Inner {
            recorder: DecisionRecorder::new(Arc::clone(&stores.decisions)),
            arena: ArenaRanker::new(self.config.arena.weights.clone()),
            targeting: TargetingEngine::new(self.gates),
            progress: ProgressBus::new(),
            active: ActiveRuns::default(),
            config: self.config,
            stores,
            services,
            retry,
            evaluation,
        };
        Ok(Orchestrator {
            inner: Arc::new(inner),
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Inner {
    config: RailConfig,
    stores: Stores,
    services: StageServices,
    recorder: DecisionRecorder,
    retry: RetryPolicy,
    evaluation: EvaluationEngine,
    targeting: TargetingEngine,
    arena: ArenaRanker,
    progress: ProgressBus,
    active: ActiveRuns,
}

impl Inner {
    /// Apply `trigger` to `paper` and persist it with a decision record.
    /// Nothing is written when the guard fails.
    async fn transition(
        &self,
        paper: &mut PaperRecord,
        trigger: &Trigger,
        run_id: Option<&RunId>,
    ) -> Result<PaperState> {
        let from = paper.state;
        let to = next_state(from, trigger)?;

        paper.state = to;
        paper.updated_at = Utc::now();
        self.stores.papers.update_paper(paper.clone()).await?;

        let mut metadata = json!({
            "from": from.as_str(),
            "to": to.as_str(),
            "trigger": trigger.name(),
            "version": paper.version,
        });
        match trigger {
            Trigger::MetaReviewComplete(rec) => {
                metadata["recommendation"] = json!(rec.as_str());
            }
            Trigger::ArenaPromotion { level, threshold } => {
                metadata["level"] = json!(level.to_string());
                metadata["threshold"] = json!(threshold.to_string());
            }
            _ => {}
        }
        self.recorder
            .append(NewDecision {
                paper_id: paper.paper_id.clone(),
                run_id: run_id.cloned(),
                action_type: "state_transition".into(),
                actor: "orchestrator".into(),
                model: None,
                prompt_fingerprint: None,
                input_summary: format!("{from} on {}", trigger.name()),
                output_summary: to.to_string(),
                metadata,
            })
            .await?;
        obs::emit_transition(paper.paper_id.as_str(), from.as_str(), to.as_str(), trigger.name());
        Ok(to)
    }

    async fn record(&self, paper_id: &PaperId, action: &str, output: String, metadata: serde_json::Value) -> Result<()> {
        self.recorder
            .append(NewDecision {
                paper_id: paper_id.clone(),
                run_id: None,
                action_type: action.into(),
                actor: "orchestrator".into(),
                model: None,
                prompt_fingerprint: None,
                input_summary: String::new(),
                output_summary: output,
                metadata,
            })
            .await
            .map(|_| ())
    }
}

/// Cheap to clone; clones share stores, guards and the progress bus.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &RailConfig {
        &self.inner.config
    }

    pub fn targeting(&self) -> &TargetingEngine {
        &self.inner.targeting
    }

    // -----------------------------------------------------------------------
    // Submission and runs
    // -----------------------------------------------------------------------

    /// Store a new paper in `submitted` at version 1.
    pub async fn submit(&self, new: NewPaper) -> Result<PaperRecord> {
        let mut paper = PaperRecord::new(new.title, new.authors, new.categories);
        paper.abstract_text = new.abstract_text;
        paper.sections = new.sections;
        self.inner.stores.papers.insert_paper(paper.clone()).await?;

        self.inner
            .record(
                &paper.paper_id,
                "paper_submitted",
                format!("\"{}\" with {} sections", paper.title, paper.sections.len()),
                json!({ "categories": paper.categories, "authors": paper.authors }),
            )
            .await?;
        info!(paper_id = %paper.paper_id, title = %paper.title, "paper submitted");
        Ok(paper)
    }

    /// Submit an empty paper for `topic` and start a writer run on it.
    pub async fn draft_paper(
        &self,
        topic: impl Into<String>,
        authors: Vec<String>,
        categories: Vec<String>,
    ) -> Result<RunHandle> {
        let paper = self
            .submit(
                NewPaper::new(topic)
                    .with_authors(authors)
                    .with_categories(categories),
            )
            .await?;
        self.start_run(&paper.paper_id, RunKind::Writer).await
    }

    /// Start a run of `kind`. Fails with `RunAlreadyActive` while another
    /// run or mutation holds the paper.
    pub async fn start_run(&self, paper_id: &PaperId, kind: RunKind) -> Result<RunHandle> {
        let guard = self.inner.active.acquire(paper_id)?;
        let paper = self.inner.stores.papers.get_paper(paper_id).await?;
        self.launch(guard, paper, kind).await
    }

    /// Move a submitted paper to `under_review` and start its review run.
    /// A paper in `re_review` goes straight to the run.
    ///
    /// The run is opened before the transition is written, so a request
    /// that cannot start leaves neither a state change nor a decision.
    pub async fn request_review(&self, paper_id: &PaperId) -> Result<RunHandle> {
        let guard = self.inner.active.acquire(paper_id)?;
        let mut paper = self.inner.stores.papers.get_paper(paper_id).await?;
        if paper.state == PaperState::ReReview {
            return self.launch(guard, paper, RunKind::Review).await;
        }

        let trigger = Trigger::ReviewRequested;
        let mut reviewing = paper.clone();
        reviewing.state = next_state(paper.state, &trigger)?;
        let (run, mut ctx) = self.prepare(&reviewing, RunKind::Review).await?;

        if let Err(err) = self.inner.transition(&mut paper, &trigger, Some(&run.run_id)).await {
            let closed = self
                .inner
                .stores
                .runs
                .finish_run(&run.run_id, RunStatus::Failed, Some(err.to_string()))
                .await;
            if let Err(e) = closed {
                obs::emit_persistence_error(run.run_id.as_str(), &e);
            }
            return Err(err);
        }
        ctx.paper = paper;
        Ok(run::spawn(Arc::clone(&self.inner), run, ctx, guard))
    }

    async fn launch(&self, guard: PaperGuard, paper: PaperRecord, kind: RunKind) -> Result<RunHandle> {
        let (run, ctx) = self.prepare(&paper, kind).await?;
        Ok(run::spawn(Arc::clone(&self.inner), run, ctx, guard))
    }

    /// Check the paper can host a `kind` run, build its context and open
    /// the run in the ledger.
    async fn prepare(&self, paper: &PaperRecord, kind: RunKind) -> Result<(PipelineRunRecord, StageContext)> {
        check_run_allowed(paper, kind)?;
        let inner = &self.inner;

        let stages = sequence(kind);
        let first = stages.first().copied().unwrap_or(StageKind::Idea);
        let mut ctx = StageContext::new(paper.clone(), StageSettings::for_stage(&inner.config, first));
        match kind {
            RunKind::Review => ctx.rubric = inner.targeting.rubric_for(&paper.categories),
            RunKind::Revision => {
                ctx.feedback = match inner.stores.evidence.latest_review(&paper.paper_id).await? {
                    Some(review) => Some(serde_json::to_value(review)?),
                    None => None,
                };
            }
            RunKind::Writer => {}
        }

        let run = inner
            .stores
            .runs
            .open_run(&paper.paper_id, paper.version, kind)
            .await?;
        Ok((run, ctx))
    }

    // -----------------------------------------------------------------------
    // Revision
    // -----------------------------------------------------------------------

    /// Run the revise stage and return its proposal without committing it.
    pub async fn suggest_revisions(&self, paper_id: &PaperId) -> Result<(RunId, RevisionProposal)> {
        let outcome = self.start_run(paper_id, RunKind::Revision).await?.wait().await?;
        if outcome.run.status != RunStatus::Succeeded {
            return Err(RailError::GuardNotMet {
                from: outcome.paper.state,
                trigger: "start_revision_run".into(),
                reason: format!("revision run ended {}", outcome.run.status.as_str()),
            });
        }
        let proposal = outcome
            .output_as::<RevisionProposal>(StageKind::Revise)
            .ok_or_else(|| RailError::RunNotFound(outcome.run.run_id.to_string()))?;
        Ok((outcome.run.run_id, proposal))
    }

    /// Commit the proposal of a succeeded revision run as the next version.
    pub async fn accept_revision(&self, paper_id: &PaperId, run_id: &RunId) -> Result<PaperRecord> {
        let run = self.inner.stores.runs.get_run(run_id).await?;
        let paper = self.inner.stores.papers.get_paper(paper_id).await?;
        if &run.paper_id != paper_id
            || run.kind != RunKind::Revision
            || run.status != RunStatus::Succeeded
        {
            return Err(RailError::GuardNotMet {
                from: paper.state,
                trigger: Trigger::RevisionSubmitted { validation: Ok(()) }.name().into(),
                reason: format!("run {run_id} is not a succeeded revision run of this paper"),
            });
        }

        let output = self
            .inner
            .stores
            .runs
            .stage_executions(run_id)
            .await?
            .into_iter()
            .rev()
            .find(|e| e.stage == StageKind::Revise.as_str() && e.status == StageStatus::Succeeded)
            .and_then(|e| e.output)
            .ok_or_else(|| RailError::RunNotFound(run_id.to_string()))?;
        let proposal: RevisionProposal = serde_json::from_value(output)?;

        self.submit_revision(paper_id, apply_proposal(&paper, &proposal))
            .await
    }

    /// Replace the paper's sections, bump its version and move it to
    /// `re_review`. Structural problems fail the guard and change nothing.
    pub async fn submit_revision(&self, paper_id: &PaperId, sections: Vec<PaperSection>) -> Result<PaperRecord> {
        let _guard = self.inner.active.acquire(paper_id)?;
        let current = self.inner.stores.papers.get_paper(paper_id).await?;

        let validation = validate_revision(&current, &sections);
        let mut revised = current.clone();
        if validation.is_ok() {
            revised.sections = sections;
            revised.version += 1;
        }
        self.inner
            .transition(&mut revised, &Trigger::RevisionSubmitted { validation }, None)
            .await?;

        self.inner
            .record(
                paper_id,
                "revision_submitted",
                format!("v{} -> v{}", current.version, revised.version),
                json!({
                    "from_version": current.version,
                    "to_version": revised.version,
                    "sections": revised.sections.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                }),
            )
            .await?;
        Ok(revised)
    }

    // -----------------------------------------------------------------------
    // Arena
    // -----------------------------------------------------------------------

    /// Publish an accepted paper whose latest assessment meets the
    /// configured threshold.
    pub async fn promote_to_arena(&self, paper_id: &PaperId) -> Result<PaperRecord> {
        let _guard = self.inner.active.acquire(paper_id)?;
        let mut paper = self.inner.stores.papers.get_paper(paper_id).await?;
        let level = self
            .inner
            .stores
            .evidence
            .latest_assessment(paper_id)
            .await?
            .map(|a| a.level)
            .unwrap_or(MaturityLevel::L0);
        let threshold = self.inner.config.arena.promotion_threshold;

        self.inner
            .transition(&mut paper, &Trigger::ArenaPromotion { level, threshold }, None)
            .await?;
        self.inner
            .record(
                paper_id,
                "arena_promotion",
                format!("published at {level} (threshold {threshold})"),
                json!({ "level": level.to_string(), "threshold": threshold.to_string() }),
            )
            .await?;
        Ok(paper)
    }

    async fn arena_inputs(&self) -> Result<Vec<ArenaInput>> {
        let stores = &self.inner.stores;
        let mut inputs = Vec::new();
        for paper in stores.papers.list_papers().await? {
            if !matches!(paper.state, PaperState::Accepted | PaperState::PublishedArena) {
                continue;
            }
            inputs.push(ArenaInput {
                review: stores.evidence.latest_review(&paper.paper_id).await?,
                assessment: stores.evidence.latest_assessment(&paper.paper_id).await?,
                score_cards: stores
                    .evidence
                    .score_cards(&paper.paper_id, paper.version)
                    .await?,
                paper,
            });
        }
        Ok(inputs)
    }

    pub async fn leaderboard(&self, filter: &LeaderboardFilter) -> Result<Vec<ArenaEntry>> {
        let inputs = self.arena_inputs().await?;
        Ok(self.inner.arena.leaderboard(&inputs, filter))
    }

    pub async fn arena_stats(&self) -> Result<ArenaStats> {
        let inputs = self.arena_inputs().await?;
        let ranked = self.inner.arena.rank(&inputs);
        Ok(self.inner.arena.stats(&ranked))
    }

    // -----------------------------------------------------------------------
    // Read models
    // -----------------------------------------------------------------------

    /// Paper count per lifecycle state; every state is present.
    pub async fn pipeline_stats(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts: BTreeMap<String, usize> = PaperState::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for paper in self.inner.stores.papers.list_papers().await? {
            *counts.entry(paper.state.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        self.inner.progress.subscribe()
    }

    pub fn subscribe_run(&self, run_id: &RunId) -> ProgressSubscription {
        self.inner.progress.subscribe_run(run_id)
    }

    pub fn is_busy(&self, paper_id: &PaperId) -> bool {
        self.inner.active.is_active(paper_id)
    }

    pub async fn paper(&self, paper_id: &PaperId) -> Result<PaperRecord> {
        Ok(self.inner.stores.papers.get_paper(paper_id).await?)
    }

    pub async fn papers(&self) -> Result<Vec<PaperRecord>> {
        Ok(self.inner.stores.papers.list_papers().await?)
    }

    pub async fn decisions(&self, paper_id: &PaperId) -> Result<Vec<DecisionRecord>> {
        self.inner.recorder.list_for(paper_id).await
    }

    pub async fn recent_decisions(&self, limit: usize) -> Result<Vec<DecisionRecord>> {
        self.inner.recorder.list_recent(limit).await
    }

    pub async fn reviews(&self, paper_id: &PaperId) -> Result<Vec<ReviewRecord>> {
        Ok(self.inner.stores.evidence.reviews(paper_id).await?)
    }

    pub async fn assessments(&self, paper_id: &PaperId) -> Result<Vec<MaturityAssessmentRecord>> {
        Ok(self.inner.stores.evidence.assessments(paper_id).await?)
    }

    pub async fn score_cards(&self, paper_id: &PaperId, version: u32) -> Result<Vec<ScoreCardRecord>> {
        Ok(self
            .inner
            .stores
            .evidence
            .score_cards(paper_id, version)
            .await?)
    }

    pub async fn runs(&self, paper_id: &PaperId) -> Result<Vec<PipelineRunRecord>> {
        Ok(self.inner.stores.runs.list_runs(paper_id).await?)
    }

    pub async fn stage_executions(&self, run_id: &RunId) -> Result<Vec<StageExecution>> {
        Ok(self.inner.stores.runs.stage_executions(run_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

fn check_run_allowed(paper: &PaperRecord, kind: RunKind) -> Result<()> {
    let allowed = match kind {
        RunKind::Writer => !paper.state.is_terminal(),
        RunKind::Review => matches!(paper.state, PaperState::UnderReview | PaperState::ReReview),
        RunKind::Revision => paper.state == PaperState::Revision,
    };
    if allowed {
        return Ok(());
    }
    Err(RailError::GuardNotMet {
        from: paper.state,
        trigger: format!("start_{}_run", kind.as_str()),
        reason: format!("a {} run cannot start while the paper is {}", kind.as_str(), paper.state),
    })
}

/// Structural checks on a revised section list.
pub fn validate_revision(current: &PaperRecord, sections: &[PaperSection]) -> std::result::Result<(), String> {
    if sections.is_empty() {
        return Err("revision has no sections".into());
    }
    let mut names = HashSet::new();
    for s in sections {
        if s.name.trim().is_empty() {
            return Err("section with an empty name".into());
        }
        if !names.insert(s.name.as_str()) {
            return Err(format!("duplicate section '{}'", s.name));
        }
        if s.content.trim().is_empty() {
            return Err(format!("section '{}' is empty", s.name));
        }
    }
    if let Some(missing) = current.sections.iter().find(|s| !names.contains(s.name.as_str())) {
        return Err(format!("section '{}' was dropped", missing.name));
    }
    Ok(())
}

/// Current sections with the proposal applied. Full replacements win over
/// suggestion-level edits for the same section.
pub fn apply_proposal(paper: &PaperRecord, proposal: &RevisionProposal) -> Vec<PaperSection> {
    paper
        .sections
        .iter()
        .map(|section| {
            if let Some(text) = proposal.revised_sections.get(&section.name) {
                return PaperSection::new(section.name.clone(), text.clone());
            }
            let mut content = section.content.clone();
            for s in proposal.suggestions.iter().filter(|s| s.section == section.name) {
                if !s.original.is_empty() && content.contains(&s.original) {
                    content = content.replacen(&s.original, &s.revised, 1);
                }
            }
            PaperSection::new(section.name.clone(), content)
        })
        .collect()
}
