//! Revision suggestions driven by the latest review feedback.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::session::{header, Session};
use super::{StageContext, StageOutput, StageServices};
use crate::domain::error::StageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionSuggestion {
    pub section: String,
    #[serde(default)]
    pub original: String,
    pub revised: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub rationale: String,
}

/// Proposal returned to the orchestrator; committed only on acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionProposal {
    #[serde(default)]
    pub suggestions: Vec<RevisionSuggestion>,
    /// Full replacement text keyed by section name
    #[serde(default)]
    pub revised_sections: BTreeMap<String, String>,
}

fn revise_prompt(ctx: &StageContext) -> String {
    let feedback = ctx
        .feedback
        .as_ref()
        .map(|f| serde_json::to_string_pretty(f).unwrap_or_default())
        .unwrap_or_else(|| "(no structured feedback)".to_string());
    format!(
        "{}Revise the paper to address the review feedback. Only touch sections that \
         need changes.\n\nFeedback:\n{feedback}\n\n\
         Respond with JSON: {{\"suggestions\": [{{\"section\", \"original\", \"revised\", \
         \"priority\": \"high|medium|low\", \"rationale\"}}], \
         \"revised_sections\": {{section name: full new text}}}}\n\n{}",
        header("revise"),
        ctx.paper_markdown()
    )
}

pub(super) async fn run(ctx: &StageContext, services: &StageServices) -> Result<StageOutput, StageError> {
    let mut session = Session::for_stage(ctx, services);
    let proposal: RevisionProposal = session.ask_json(revise_prompt(ctx)).await?;

    if proposal.suggestions.is_empty() && proposal.revised_sections.is_empty() {
        return Err(StageError::InvalidOutput("revision proposal is empty".into()));
    }
    if let Some(unknown) = proposal
        .revised_sections
        .keys()
        .find(|name| ctx.paper.section(name).is_none())
    {
        return Err(StageError::InvalidOutput(format!(
            "revision targets unknown section: {unknown}"
        )));
    }

    let summary = format!(
        "{} suggestions, {} sections rewritten",
        proposal.suggestions.len(),
        proposal.revised_sections.len()
    );
    let payload =
        serde_json::to_value(&proposal).map_err(|e| StageError::InvalidOutput(e.to_string()))?;
    Ok(session.finish(payload, &ctx.paper.title, &summary))
}
