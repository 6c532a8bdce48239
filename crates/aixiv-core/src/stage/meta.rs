//! Meta-review: synthesizes review and red-team into one recommendation.

use serde::{Deserialize, Serialize};

use super::redteam::RedTeamReport;
use super::review::{ReviewReport, ReviewerVerdict};
use super::session::{header, Session};
use super::{StageContext, StageKind, StageOutput, StageServices};
use crate::domain::error::StageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaReview {
    pub final_recommendation: ReviewerVerdict,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub required_changes: Vec<String>,
    #[serde(default)]
    pub suggested_changes: Vec<String>,
    #[serde(default)]
    pub arena_eligible: bool,
}

fn meta_prompt(title: &str, review: &ReviewReport, redteam: &RedTeamReport) -> String {
    let findings: Vec<String> = redteam
        .findings
        .iter()
        .map(|f| format!("- [{}] {}: {}", f.severity, f.category, f.title))
        .collect();
    format!(
        "{}Write the meta-review for \"{title}\".\n\n\
         Reviewer: overall {:.1}/10, recommendation {:?}\n\
         Scores: soundness {}, novelty {}, clarity {}, significance {}, reproducibility {}\n\
         Weaknesses: {}\n\nRed team: risk {:?}, confidence {:.2}\n{}\n\n\
         Respond with JSON: {{\"final_recommendation\": \"accept|minor_revision|major_revision|reject\", \
         \"confidence\": 0-1, \"justification\", \"required_changes\": [..], \
         \"suggested_changes\": [..], \"arena_eligible\": bool}}",
        header("meta_review"),
        review.overall,
        review.recommendation,
        review.scores.soundness,
        review.scores.novelty,
        review.scores.clarity,
        review.scores.significance,
        review.scores.reproducibility,
        review.weaknesses.join("; "),
        redteam.overall_risk,
        redteam.confidence,
        findings.join("\n")
    )
}

pub(super) async fn run(ctx: &StageContext, services: &StageServices) -> Result<StageOutput, StageError> {
    let review = ctx
        .prior_as::<ReviewReport>(StageKind::Review)
        .ok_or_else(|| StageError::InvalidOutput("meta-review requires a review".into()))?;
    let redteam = ctx
        .prior_as::<RedTeamReport>(StageKind::RedTeam)
        .ok_or_else(|| StageError::InvalidOutput("meta-review requires a red-team report".into()))?;

    let mut session = Session::for_stage(ctx, services);
    let meta: MetaReview = session
        .ask_json(meta_prompt(&ctx.paper.title, &review, &redteam))
        .await?;

    let summary = format!(
        "{:?} (confidence {:.2}), {} required changes",
        meta.final_recommendation,
        meta.confidence,
        meta.required_changes.len()
    );
    let payload =
        serde_json::to_value(&meta).map_err(|e| StageError::InvalidOutput(e.to_string()))?;
    Ok(session.finish(payload, &ctx.paper.title, &summary))
}
