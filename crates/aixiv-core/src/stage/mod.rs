//! Agent stages.
//!
//! Every pipeline step is a variant of [`StageKind`] and runs through the
//! same contract: [`StageKind::execute`] takes a [`StageContext`] and the
//! external services, and returns a [`StageOutput`] or a typed
//! [`StageError`]. Stages never mutate the paper; drafting and revision
//! stages return proposals that the orchestrator commits.

pub mod compose;
pub mod idea;
pub mod literature;
pub mod meta;
pub mod method;
pub(crate) mod parse;
pub mod redteam;
pub mod review;
pub mod revise;
pub(crate) mod session;

use std::collections::BTreeMap;
use std::sync::Arc;

use aixiv_state::{PaperRecord, PromptFingerprint, RunKind};
use serde::{Deserialize, Serialize};

use crate::completion::{CompletionService, SamplingParams};
use crate::config::{IdeaConfig, LiteratureConfig, RailConfig};
use crate::domain::error::StageError;
use crate::literature::LiteratureSearch;

/// Closed set of pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Idea,
    Literature,
    Method,
    Compose,
    Review,
    RedTeam,
    MetaReview,
    Revise,
}

const WRITER_PATH: &[StageKind] = &[
    StageKind::Idea,
    StageKind::Literature,
    StageKind::Method,
    StageKind::Compose,
];
const REVIEWER_PATH: &[StageKind] = &[StageKind::Review, StageKind::RedTeam, StageKind::MetaReview];
const REVISION_PATH: &[StageKind] = &[StageKind::Revise];

/// Stage sequence executed by a run of `kind`, in order.
pub fn sequence(kind: RunKind) -> &'static [StageKind] {
    match kind {
        RunKind::Writer => WRITER_PATH,
        RunKind::Review => REVIEWER_PATH,
        RunKind::Revision => REVISION_PATH,
    }
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Idea => "idea",
            StageKind::Literature => "literature",
            StageKind::Method => "method",
            StageKind::Compose => "compose",
            StageKind::Review => "review",
            StageKind::RedTeam => "redteam",
            StageKind::MetaReview => "meta_review",
            StageKind::Revise => "revise",
        }
    }

    /// Judging stages run on the strong model.
    pub fn uses_strong_model(&self) -> bool {
        matches!(
            self,
            StageKind::Review | StageKind::RedTeam | StageKind::MetaReview
        )
    }

    pub async fn execute(
        &self,
        ctx: &StageContext,
        services: &StageServices,
    ) -> Result<StageOutput, StageError> {
        match self {
            StageKind::Idea => idea::run(ctx, services).await,
            StageKind::Literature => literature::run(ctx, services).await,
            StageKind::Method => method::run(ctx, services).await,
            StageKind::Compose => compose::run(ctx, services).await,
            StageKind::Review => review::run(ctx, services).await,
            StageKind::RedTeam => redteam::run(ctx, services).await,
            StageKind::MetaReview => meta::run(ctx, services).await,
            StageKind::Revise => revise::run(ctx, services).await,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model and loop bounds for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    pub model: String,
    pub params: SamplingParams,
    pub idea: IdeaConfig,
    pub literature: LiteratureConfig,
}

impl StageSettings {
    pub fn for_stage(config: &RailConfig, stage: StageKind) -> Self {
        let model = if stage.uses_strong_model() {
            config.models.strong_model.clone()
        } else {
            config.models.default_model.clone()
        };
        Self {
            model,
            params: config.sampling.clone(),
            idea: config.idea.clone(),
            literature: config.literature.clone(),
        }
    }
}

/// A checklist item or gate the reviewer is asked to attest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricItem {
    pub id: String,
    pub description: String,
}

/// What the review stage asks the reviewer to judge beyond the dimensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewRubric {
    pub checklist: Vec<RubricItem>,
    pub gates: Vec<RubricItem>,
}

/// Input to one stage attempt.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Snapshot of the paper at run start
    pub paper: PaperRecord,
    /// Payloads of stages already completed in this run
    pub prior: BTreeMap<StageKind, serde_json::Value>,
    pub settings: StageSettings,
    pub rubric: ReviewRubric,
    /// Latest review outcome, for the revise stage
    pub feedback: Option<serde_json::Value>,
    /// Set when retrying after `InvalidOutput`
    pub corrective_hint: Option<String>,
}

impl StageContext {
    pub fn new(paper: PaperRecord, settings: StageSettings) -> Self {
        Self {
            paper,
            prior: BTreeMap::new(),
            settings,
            rubric: ReviewRubric::default(),
            feedback: None,
            corrective_hint: None,
        }
    }

    /// Decode the payload of an earlier stage.
    pub fn prior_as<T: serde::de::DeserializeOwned>(&self, stage: StageKind) -> Option<T> {
        self.prior
            .get(&stage)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn paper_markdown(&self) -> String {
        render_markdown(&self.paper)
    }
}

/// Paper sections rendered as markdown, in section order.
pub fn render_markdown(paper: &PaperRecord) -> String {
    let mut out = format!("# {}\n\n", paper.title);
    if !paper.abstract_text.is_empty() && paper.section("abstract").is_none() {
        out.push_str(&format!("## abstract\n\n{}\n\n", paper.abstract_text));
    }
    for s in &paper.sections {
        out.push_str(&format!("## {}\n\n{}\n\n", s.name, s.content));
    }
    out
}

/// External capabilities available to stages.
#[derive(Clone)]
pub struct StageServices {
    pub completion: Arc<dyn CompletionService>,
    pub literature: Arc<dyn LiteratureSearch>,
}

/// Audit payload produced alongside a stage result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionDraft {
    pub model: String,
    /// Fingerprint of the first prompt sent
    pub prompt_fingerprint: Option<PromptFingerprint>,
    pub input_summary: String,
    pub output_summary: String,
    pub completion_calls: u32,
}

/// Successful stage result.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub payload: serde_json::Value,
    pub decision: DecisionDraft,
}
