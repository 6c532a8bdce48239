//! Methodology drafting followed by a self-critique.

use serde::{Deserialize, Serialize};

use super::idea::IdeaOutput;
use super::literature::LiteratureOutput;
use super::session::{header, Session};
use super::{StageContext, StageKind, StageOutput, StageServices};
use crate::domain::error::StageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Methodology {
    pub overview: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub experiments: Vec<String>,
    #[serde(default)]
    pub baselines: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCritique {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodOutput {
    pub methodology: Methodology,
    pub critique: MethodCritique,
}

fn draft_prompt(idea: &str, novelty: &str) -> String {
    format!(
        "{}Design the methodology for the research idea below. Name baselines, \
         datasets, metrics and the evaluation protocol.\n\nIdea:\n{idea}\n\n\
         Novelty check: {novelty}\n\n\
         Respond with JSON: {{\"overview\", \"steps\": [..], \"experiments\": [..], \
         \"baselines\": [..], \"metrics\": [..]}}",
        header("method_draft")
    )
}

fn critique_prompt(methodology: &Methodology) -> String {
    format!(
        "{}Critique this methodology for soundness and reproducibility.\n\n\
         Overview: {}\nSteps: {}\nMetrics: {}\n\n\
         Respond with JSON: {{\"score\": 0-10, \"issues\": [..], \"suggestions\": [..]}}",
        header("method_critique"),
        methodology.overview,
        methodology.steps.join("; "),
        methodology.metrics.join(", ")
    )
}

pub(super) async fn run(ctx: &StageContext, services: &StageServices) -> Result<StageOutput, StageError> {
    let idea = match ctx.prior_as::<IdeaOutput>(StageKind::Idea) {
        Some(out) => format!(
            "{}\n{}\n{}",
            out.idea.title, out.idea.description, out.idea.methodology_sketch
        ),
        None => format!("{}\n{}", ctx.paper.title, ctx.paper.abstract_text),
    };
    let novelty = ctx
        .prior_as::<LiteratureOutput>(StageKind::Literature)
        .map(|l| format!("{:?}: {}", l.verdict, l.assessment.reasoning))
        .unwrap_or_else(|| "not checked".to_string());

    let mut session = Session::for_stage(ctx, services);
    let methodology: Methodology = session.ask_json(draft_prompt(&idea, &novelty)).await?;
    if methodology.overview.trim().is_empty() {
        return Err(StageError::InvalidOutput("methodology overview is empty".into()));
    }
    let critique: MethodCritique = session.ask_json(critique_prompt(&methodology)).await?;

    let summary = methodology.overview.clone();
    let payload = serde_json::to_value(MethodOutput {
        methodology,
        critique,
    })
    .map_err(|e| StageError::InvalidOutput(e.to_string()))?;
    Ok(session.finish(payload, &idea, &summary))
}
