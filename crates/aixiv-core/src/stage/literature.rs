//! Literature search with bounded refinement rounds.
//!
//! Each round runs the current queries, merges new works (de-duplicated by
//! id) and asks for a novelty verdict. The loop stops on a verdict other
//! than `needs_more_search`, on the round cap, or when no follow-up
//! queries are suggested.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::idea::IdeaOutput;
use super::session::{header, Session};
use super::{StageContext, StageKind, StageOutput, StageServices};
use crate::domain::error::StageError;
use crate::literature::RelatedWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoveltyVerdict {
    Novel,
    NotNovel,
    NeedsMoreSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyAssessment {
    pub verdict: NoveltyVerdict,
    #[serde(default)]
    pub confidence: f64,
    /// Ids of works that overlap the idea
    #[serde(default)]
    pub overlapping: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub suggested_queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteratureOutput {
    pub verdict: NoveltyVerdict,
    pub assessment: NoveltyAssessment,
    pub rounds: u32,
    pub works: Vec<RelatedWork>,
}

#[derive(Deserialize)]
struct Queries {
    queries: Vec<String>,
}

/// Idea under study: the idea stage's output if present, else the paper.
fn idea_text(ctx: &StageContext) -> String {
    match ctx.prior_as::<IdeaOutput>(StageKind::Idea) {
        Some(out) => format!("{}\n{}", out.idea.title, out.idea.description),
        None => format!("{}\n{}", ctx.paper.title, ctx.paper.abstract_text),
    }
}

fn query_prompt(idea: &str, k: usize) -> String {
    format!(
        "{}Write {k} literature search queries that would surface prior work \
         overlapping this idea:\n\n{idea}\n\nRespond with JSON: {{\"queries\": [..]}}",
        header("literature_queries")
    )
}

fn assess_prompt(idea: &str, works: &[RelatedWork], round: u32) -> String {
    let listing: Vec<String> = works
        .iter()
        .map(|w| format!("- [{}] {} :: {}", w.id, w.title, w.summary))
        .collect();
    format!(
        "{}Round {round}. Judge the novelty of the idea against the related work found so far.\n\n\
         Idea:\n{idea}\n\nRelated work:\n{}\n\n\
         Respond with JSON: {{\"verdict\": \"novel|not_novel|needs_more_search\", \
         \"confidence\": 0-1, \"overlapping\": [ids], \"reasoning\", \"suggested_queries\": [..]}}",
        header("literature_assess"),
        if listing.is_empty() {
            "(none)".to_string()
        } else {
            listing.join("\n")
        }
    )
}

pub(super) async fn run(ctx: &StageContext, services: &StageServices) -> Result<StageOutput, StageError> {
    let cfg = &ctx.settings.literature;
    let idea = idea_text(ctx);
    let mut session = Session::for_stage(ctx, services);

    let initial: Queries = session
        .ask_json(query_prompt(&idea, cfg.queries_per_round))
        .await?;
    let mut queries: Vec<String> = initial
        .queries
        .into_iter()
        .filter(|q| !q.trim().is_empty())
        .take(cfg.queries_per_round)
        .collect();
    if queries.is_empty() {
        return Err(StageError::InvalidOutput("no search queries produced".to_string()));
    }

    let mut works: Vec<RelatedWork> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut rounds = 0;
    let mut last: Option<NoveltyAssessment> = None;

    while rounds < cfg.max_rounds {
        rounds += 1;
        for q in &queries {
            for work in services.literature.search(q, cfg.max_results).await? {
                if seen.insert(work.id.clone()) {
                    works.push(work);
                }
            }
        }

        let assessment: NoveltyAssessment =
            session.ask_json(assess_prompt(&idea, &works, rounds)).await?;
        let done = assessment.verdict != NoveltyVerdict::NeedsMoreSearch;
        queries = assessment
            .suggested_queries
            .iter()
            .filter(|q| !q.trim().is_empty())
            .take(cfg.queries_per_round)
            .cloned()
            .collect();
        last = Some(assessment);
        if done || queries.is_empty() {
            break;
        }
    }

    let assessment = last.ok_or_else(|| StageError::InvalidOutput("no novelty verdict".into()))?;
    let summary = format!(
        "{:?} after {rounds} round(s), {} related works",
        assessment.verdict,
        works.len()
    );
    let payload = serde_json::to_value(LiteratureOutput {
        verdict: assessment.verdict,
        assessment,
        rounds,
        works,
    })
    .map_err(|e| StageError::InvalidOutput(e.to_string()))?;
    Ok(session.finish(payload, &idea, &summary))
}
