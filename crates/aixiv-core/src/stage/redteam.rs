//! Adversarial red-team pass over the paper and its review.

use aixiv_state::RiskLevel;
use serde::{Deserialize, Serialize};

use super::review::ReviewReport;
use super::session::{header, Session};
use super::{StageContext, StageKind, StageOutput, StageServices};
use crate::domain::error::StageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub id: String,
    pub severity: String,
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedTeamReport {
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub overall_risk: RiskLevel,
    /// Confidence that the paper's conclusions survive, 0-1
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub attack_scenarios: Vec<String>,
}

fn redteam_prompt(ctx: &StageContext, review: Option<&ReviewReport>) -> String {
    let review_note = review
        .map(|r| {
            format!(
                "Peer review summary: {}\nWeaknesses noted: {}\n\n",
                r.summary,
                r.weaknesses.join("; ")
            )
        })
        .unwrap_or_default();
    format!(
        "{}Act as a red team. Find statistical, methodological, reproducibility and \
         overclaiming flaws in the paper below.\n\n{review_note}\
         Respond with JSON: {{\"findings\": [{{\"id\", \"severity\": \"critical|major|minor\", \
         \"category\", \"title\", \"description\"}}], \"overall_risk\": \"low|medium|high\", \
         \"confidence\": 0-1, \"attack_scenarios\": [..]}}\n\n{}",
        header("redteam"),
        ctx.paper_markdown()
    )
}

pub(super) async fn run(ctx: &StageContext, services: &StageServices) -> Result<StageOutput, StageError> {
    let review = ctx.prior_as::<ReviewReport>(StageKind::Review);
    let mut session = Session::for_stage(ctx, services);
    let report: RedTeamReport = session
        .ask_json(redteam_prompt(ctx, review.as_ref()))
        .await?;

    let summary = format!(
        "risk {:?}, {} findings",
        report.overall_risk,
        report.findings.len()
    );
    let payload =
        serde_json::to_value(&report).map_err(|e| StageError::InvalidOutput(e.to_string()))?;
    Ok(session.finish(payload, &ctx.paper.title, &summary))
}
