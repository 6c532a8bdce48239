//! Section-by-section drafting of the paper body.

use aixiv_state::PaperSection;
use serde::{Deserialize, Serialize};

use super::idea::IdeaOutput;
use super::method::MethodOutput;
use super::parse::clip;
use super::session::{header, Session};
use super::{StageContext, StageKind, StageOutput, StageServices};
use crate::domain::error::StageError;

/// Section order of a composed paper.
pub const SECTIONS: [&str; 7] = [
    "abstract",
    "introduction",
    "related_work",
    "methods",
    "experiments",
    "discussion",
    "conclusion",
];

/// Draft proposal returned to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeOutput {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub sections: Vec<PaperSection>,
}

fn section_prompt(section: &str, brief: &str, written: &[PaperSection]) -> String {
    let context: Vec<String> = written
        .iter()
        .map(|s| format!("## {}\n{}", s.name, clip(&s.content, 600)))
        .collect();
    format!(
        "{}Section: {section}\n\nWrite the \"{section}\" section of the paper described below. \
         Return only the section text.\n\n{brief}\n\nSections written so far:\n{}",
        header("compose_section"),
        if context.is_empty() {
            "(none)".to_string()
        } else {
            context.join("\n\n")
        }
    )
}

pub(super) async fn run(ctx: &StageContext, services: &StageServices) -> Result<StageOutput, StageError> {
    let idea = ctx.prior_as::<IdeaOutput>(StageKind::Idea);
    let method = ctx.prior_as::<MethodOutput>(StageKind::Method);

    let title = idea
        .as_ref()
        .map(|o| o.idea.title.clone())
        .unwrap_or_else(|| ctx.paper.title.clone());
    let mut brief = format!("Title: {title}\n");
    if let Some(o) = &idea {
        brief.push_str(&format!(
            "Idea: {}\nContribution: {}\n",
            o.idea.description, o.idea.key_contribution
        ));
    }
    if let Some(m) = &method {
        brief.push_str(&format!(
            "Methodology: {}\nExperiments: {}\nMetrics: {}\n",
            m.methodology.overview,
            m.methodology.experiments.join("; "),
            m.methodology.metrics.join(", ")
        ));
    }

    let mut session = Session::for_stage(ctx, services);
    let mut sections: Vec<PaperSection> = Vec::with_capacity(SECTIONS.len());
    for name in SECTIONS {
        let text = session.ask(section_prompt(name, &brief, &sections)).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(StageError::InvalidOutput(format!("section {name} is empty")));
        }
        sections.push(PaperSection::new(name, text));
    }

    let abstract_text = sections
        .first()
        .map(|s| s.content.clone())
        .unwrap_or_default();
    let summary = format!("{} sections for \"{title}\"", sections.len());
    let payload = serde_json::to_value(ComposeOutput {
        title,
        abstract_text,
        sections,
    })
    .map_err(|e| StageError::InvalidOutput(e.to_string()))?;
    Ok(session.finish(payload, &brief, &summary))
}
