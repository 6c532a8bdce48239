//! Storage trait definitions for the paper lifecycle
//!
//! These traits define the persistence seams of the orchestration core:
//! - `PaperStore`: papers and their committed content
//! - `RunLedger`: pipeline runs and per-attempt stage executions
//! - `EvidenceStore`: score cards, maturity assessments, review outcomes
//! - `DecisionLog`: the append-only audit trail of automated decisions
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

id_type!(
    /// Stable identifier of a paper
    PaperId
);
id_type!(
    /// Identifier of one pipeline run
    RunId
);
id_type!(
    /// Identifier of one decision record
    RecordId
);

/// Fingerprint of a prompt: first 16 hex chars of its SHA-256.
///
/// Only the fingerprint is persisted, never the prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptFingerprint(String);

impl PromptFingerprint {
    pub fn of(prompt: &str) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        let full = hex::encode(hasher.finalize());
        PromptFingerprint(full[..16].to_string())
    }

    pub(crate) fn from_stored(s: String) -> Self {
        PromptFingerprint(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PromptFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Shared enumerations
// ---------------------------------------------------------------------------

/// Lifecycle state of a paper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperState {
    Submitted,
    UnderReview,
    Revision,
    ReReview,
    Accepted,
    PublishedArena,
    Rejected,
}

impl PaperState {
    pub const ALL: [PaperState; 7] = [
        PaperState::Submitted,
        PaperState::UnderReview,
        PaperState::Revision,
        PaperState::ReReview,
        PaperState::Accepted,
        PaperState::PublishedArena,
        PaperState::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaperState::Submitted => "submitted",
            PaperState::UnderReview => "under_review",
            PaperState::Revision => "revision",
            PaperState::ReReview => "re_review",
            PaperState::Accepted => "accepted",
            PaperState::PublishedArena => "published_arena",
            PaperState::Rejected => "rejected",
        }
    }

    /// `published_arena` and `rejected` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaperState::PublishedArena | PaperState::Rejected)
    }
}

impl std::fmt::Display for PaperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maturity level L0 (ill-posed) through L5 (solved)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum MaturityLevel {
    #[default]
    L0,
    L1,
    L2,
    L3,
    L4,
    L5,
}

impl MaturityLevel {
    pub const ALL: [MaturityLevel; 6] = [
        MaturityLevel::L0,
        MaturityLevel::L1,
        MaturityLevel::L2,
        MaturityLevel::L3,
        MaturityLevel::L4,
        MaturityLevel::L5,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    /// The level directly above, if any.
    pub fn next(&self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MaturityLevel::L0 => "Ill-Posed",
            MaturityLevel::L1 => "Measurable",
            MaturityLevel::L2 => "Repeatable",
            MaturityLevel::L3 => "Automated",
            MaturityLevel::L4 => "Industrialized",
            MaturityLevel::L5 => "Solved",
        }
    }
}

impl std::fmt::Display for MaturityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.index())
    }
}

impl std::str::FromStr for MaturityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches(['L', 'l']);
        digits
            .parse::<usize>()
            .ok()
            .and_then(Self::from_index)
            .ok_or_else(|| format!("unknown maturity level: {s}"))
    }
}

/// One of the four fixed evaluation conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Ideal,
    Noisy,
    Mismatch,
    Adversarial,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Ideal,
        Scenario::Noisy,
        Scenario::Mismatch,
        Scenario::Adversarial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Ideal => "ideal",
            Scenario::Noisy => "noisy",
            Scenario::Mismatch => "mismatch",
            Scenario::Adversarial => "adversarial",
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle-level recommendation produced by a meta-review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Revise,
    Reject,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Accept => "accept",
            Recommendation::Revise => "revise",
            Recommendation::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Red-team overall risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Outcome of one domain gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Partial,
    Fail,
}

/// Peer-review scoring dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Soundness,
    Novelty,
    Clarity,
    Significance,
    Reproducibility,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Soundness,
        Dimension::Novelty,
        Dimension::Clarity,
        Dimension::Significance,
        Dimension::Reproducibility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Soundness => "soundness",
            Dimension::Novelty => "novelty",
            Dimension::Clarity => "clarity",
            Dimension::Significance => "significance",
            Dimension::Reproducibility => "reproducibility",
        }
    }
}

// ---------------------------------------------------------------------------
// PaperStore
// ---------------------------------------------------------------------------

/// A named content section of a paper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSection {
    pub name: String,
    pub content: String,
}

impl PaperSection {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A paper and its committed content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub paper_id: PaperId,
    pub title: String,
    pub abstract_text: String,
    pub state: PaperState,
    /// Starts at 1, bumped by every accepted revision
    pub version: u32,
    /// Ordered sections
    pub sections: Vec<PaperSection>,
    pub categories: Vec<String>,
    pub authors: Vec<String>,
    /// Completed meta-reviews
    pub review_cycles: u32,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaperRecord {
    /// A freshly submitted paper (state `submitted`, version 1).
    pub fn new(title: impl Into<String>, authors: Vec<String>, categories: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            paper_id: PaperId::new(),
            title: title.into(),
            abstract_text: String::new(),
            state: PaperState::Submitted,
            version: 1,
            sections: Vec::new(),
            categories,
            authors,
            review_cycles: 0,
            submitted_at: now,
            updated_at: now,
        }
    }

    pub fn section(&self, name: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.content.as_str())
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }
}

/// Paper persistence.
///
/// Guarantees:
/// - `insert_paper` never overwrites an existing paper.
/// - `list_papers` is ordered by submission time, then id.
#[async_trait]
pub trait PaperStore: Send + Sync {
    async fn insert_paper(&self, paper: PaperRecord) -> StorageResult<()>;

    /// Returns `StorageError::NotFound` if absent.
    async fn get_paper(&self, paper_id: &PaperId) -> StorageResult<PaperRecord>;

    /// Replace the stored paper. Returns `StorageError::NotFound` if absent.
    async fn update_paper(&self, paper: PaperRecord) -> StorageResult<()>;

    async fn list_papers(&self) -> StorageResult<Vec<PaperRecord>>;
}

// ---------------------------------------------------------------------------
// RunLedger: pipeline runs and stage executions
// ---------------------------------------------------------------------------

/// Which lifecycle path a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Writer,
    Review,
    Revision,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Writer => "writer",
            RunKind::Review => "review",
            RunKind::Revision => "revision",
        }
    }
}

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Active => "active",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// One execution of the orchestrator against a paper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunRecord {
    pub run_id: RunId,
    pub paper_id: PaperId,
    /// Paper version the run started against
    pub paper_version: u32,
    pub kind: RunKind,
    pub status: RunStatus,
    /// Failure reason for `failed` / `cancelled` runs
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Status of one stage attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Failed)
    }
}

/// One attempt of one stage within a run.
///
/// Keyed by `(run_id, position, attempt)`; a retry is a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecution {
    pub run_id: RunId,
    /// Position of the stage in the run's sequence (0-based)
    pub position: u32,
    pub stage: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub input_summary: String,
    pub output: Option<serde_json::Value>,
    pub status: StageStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Terminal outcome of a stage attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutcome {
    Succeeded { output: serde_json::Value },
    Failed { error: String },
}

/// Pipeline run ledger.
///
/// Guarantees:
/// - At most one `active` run per paper; `open_run` fails with
///   `StorageError::ActiveRunExists` otherwise.
/// - A run transitions `active → succeeded | failed | cancelled` exactly once.
/// - Stage attempts are ordered by `(position, attempt)` and are immutable
///   once terminal.
#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn open_run(
        &self,
        paper_id: &PaperId,
        paper_version: u32,
        kind: RunKind,
    ) -> StorageResult<PipelineRunRecord>;

    /// Record the start of an attempt. The run must be active.
    async fn begin_stage(
        &self,
        run_id: &RunId,
        position: u32,
        stage: &str,
        attempt: u32,
        input_summary: &str,
    ) -> StorageResult<StageExecution>;

    /// Close an attempt. Fails with `ImmutableRecord` if already terminal.
    async fn finish_stage(
        &self,
        run_id: &RunId,
        position: u32,
        attempt: u32,
        outcome: StageOutcome,
    ) -> StorageResult<StageExecution>;

    /// Move an active run to a terminal status.
    async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        failure: Option<String>,
    ) -> StorageResult<PipelineRunRecord>;

    async fn get_run(&self, run_id: &RunId) -> StorageResult<PipelineRunRecord>;

    /// Runs for a paper, oldest first.
    async fn list_runs(&self, paper_id: &PaperId) -> StorageResult<Vec<PipelineRunRecord>>;

    async fn active_run(&self, paper_id: &PaperId) -> StorageResult<Option<PipelineRunRecord>>;

    /// Attempts of a run ordered by `(position, attempt)`.
    async fn stage_executions(&self, run_id: &RunId) -> StorageResult<Vec<StageExecution>>;
}

// ---------------------------------------------------------------------------
// EvidenceStore: score cards, assessments, reviews
// ---------------------------------------------------------------------------

/// Output of one evaluation scenario for one paper version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCardRecord {
    pub paper_id: PaperId,
    pub paper_version: u32,
    pub scenario: Scenario,
    /// Normalized to [0, 1]; `None` when the scenario failed
    pub score: Option<f64>,
    pub detail: serde_json::Value,
    pub failure: Option<String>,
    pub computed_at: DateTime<Utc>,
}

/// Result of one checklist item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItemResult {
    pub id: String,
    pub description: String,
    pub met: bool,
    pub detail: Option<String>,
}

/// Checklist evaluation for one level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChecklist {
    pub level: MaturityLevel,
    pub satisfied: bool,
    pub items: Vec<ChecklistItemResult>,
}

/// Maturity level assigned to a paper version in one review cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaturityAssessmentRecord {
    pub paper_id: PaperId,
    pub paper_version: u32,
    pub review_cycle: u32,
    pub level: MaturityLevel,
    pub checklists: Vec<LevelChecklist>,
    /// Items blocking the next level
    pub unmet: Vec<String>,
    pub next_steps: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

/// Peer-review dimension scores on a 1–5 scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub soundness: f64,
    pub novelty: f64,
    pub clarity: f64,
    pub significance: f64,
    pub reproducibility: f64,
}

impl DimensionScores {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Soundness => self.soundness,
            Dimension::Novelty => self.novelty,
            Dimension::Clarity => self.clarity,
            Dimension::Significance => self.significance,
            Dimension::Reproducibility => self.reproducibility,
        }
    }
}

/// Consolidated outcome of one review cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub paper_id: PaperId,
    pub paper_version: u32,
    pub review_cycle: u32,
    pub run_id: RunId,
    pub scores: DimensionScores,
    /// Reviewer overall score, 1–10
    pub overall: f64,
    pub recommendation: Recommendation,
    /// Checklist item ids the reviewer attested
    pub attested_items: Vec<String>,
    pub gate_results: BTreeMap<String, GateStatus>,
    pub redteam_risk: RiskLevel,
    pub weaknesses: Vec<String>,
    pub required_changes: Vec<String>,
    pub suggested_changes: Vec<String>,
    pub arena_eligible: bool,
    pub reviewed_at: DateTime<Utc>,
}

/// Evidence persistence.
///
/// Guarantees:
/// - One score card per `(paper, version, scenario)`; re-putting replaces it.
/// - Assessments and reviews are history: appended, never replaced.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn put_score_cards(&self, cards: &[ScoreCardRecord]) -> StorageResult<()>;

    /// Cards for one paper version, in `Scenario::ALL` order.
    async fn score_cards(
        &self,
        paper_id: &PaperId,
        paper_version: u32,
    ) -> StorageResult<Vec<ScoreCardRecord>>;

    async fn append_assessment(&self, assessment: MaturityAssessmentRecord) -> StorageResult<()>;

    /// Assessment history, oldest first.
    async fn assessments(&self, paper_id: &PaperId)
        -> StorageResult<Vec<MaturityAssessmentRecord>>;

    async fn latest_assessment(
        &self,
        paper_id: &PaperId,
    ) -> StorageResult<Option<MaturityAssessmentRecord>> {
        Ok(self.assessments(paper_id).await?.pop())
    }

    async fn append_review(&self, review: ReviewRecord) -> StorageResult<()>;

    /// Review history, oldest first.
    async fn reviews(&self, paper_id: &PaperId) -> StorageResult<Vec<ReviewRecord>>;

    async fn latest_review(&self, paper_id: &PaperId) -> StorageResult<Option<ReviewRecord>> {
        Ok(self.reviews(paper_id).await?.pop())
    }
}

// ---------------------------------------------------------------------------
// DecisionLog: append-only audit trail
// ---------------------------------------------------------------------------

/// A decision about to be appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDecision {
    pub paper_id: PaperId,
    pub run_id: Option<RunId>,
    /// e.g. "stage_succeeded", "stage_failed", "state_transition"
    pub action_type: String,
    /// Stage or component that made the decision
    pub actor: String,
    pub model: Option<String>,
    pub prompt_fingerprint: Option<PromptFingerprint>,
    pub input_summary: String,
    pub output_summary: String,
    pub metadata: serde_json::Value,
}

/// An immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub record_id: RecordId,
    pub paper_id: PaperId,
    /// Per-paper append sequence, starting at 1
    pub seq: u64,
    pub run_id: Option<RunId>,
    pub action_type: String,
    pub actor: String,
    pub model: Option<String>,
    pub prompt_fingerprint: Option<PromptFingerprint>,
    pub input_summary: String,
    pub output_summary: String,
    pub metadata: serde_json::Value,
    /// Non-decreasing within a paper
    pub recorded_at: DateTime<Utc>,
}

/// Append-only decision log.
///
/// Guarantees:
/// - `append` is the only mutation; there is no update or delete.
/// - `list_for` returns records in append order (`seq` ascending).
#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn append(&self, decision: NewDecision) -> StorageResult<DecisionRecord>;

    async fn list_for(&self, paper_id: &PaperId) -> StorageResult<Vec<DecisionRecord>>;

    /// Most recent records across all papers, newest first.
    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<DecisionRecord>>;
}
