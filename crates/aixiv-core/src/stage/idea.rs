//! Idea generation: a bounded maker/critic loop.
//!
//! Generate `candidates` ideas, then for each entry of `narrowing` critique
//! the pool and keep that many survivors, then refine the last survivor.

use serde::{Deserialize, Serialize};

use super::session::{header, numbered, Session};
use super::{StageContext, StageOutput, StageServices};
use crate::domain::error::StageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_contribution: String,
    #[serde(default)]
    pub methodology_sketch: String,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub maturity_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    /// 0-based index into the critiqued pool
    pub index: usize,
    pub score: f64,
    #[serde(default)]
    pub verdict: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
struct IdeaBatch {
    ideas: Vec<Idea>,
}

#[derive(Deserialize)]
struct CritiqueBatch {
    critiques: Vec<Critique>,
}

/// Payload of a successful idea stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaOutput {
    pub idea: Idea,
    pub shortlist: Vec<Idea>,
    pub candidates: usize,
    pub rounds: usize,
}

fn describe(ideas: &[Idea]) -> String {
    let lines: Vec<String> = ideas
        .iter()
        .map(|i| format!("{} :: {}", i.title, i.description))
        .collect();
    numbered(&lines)
}

fn generate_prompt(topic: &str, categories: &[String], n: usize) -> String {
    format!(
        "{}Propose {n} distinct research ideas on the topic below.\n\
         Topic: {topic}\nCategories: {}\n\n\
         Respond with JSON: {{\"ideas\": [{{\"title\", \"description\", \"key_contribution\", \
         \"methodology_sketch\", \"metrics\": [..], \"maturity_target\"}}]}}",
        header("idea_generate"),
        categories.join(", ")
    )
}

fn critique_prompt(topic: &str, pool: &[Idea]) -> String {
    format!(
        "{}Critique each research idea for the topic \"{topic}\" on novelty, feasibility \
         and measurability.\n\n{}\n\n\
         Respond with JSON: {{\"critiques\": [{{\"index\": <0-based>, \"score\": 0-10, \
         \"verdict\": \"keep|revise|discard\", \"reason\"}}]}}",
        header("idea_critique"),
        describe(pool)
    )
}

fn refine_prompt(topic: &str, idea: &Idea) -> String {
    format!(
        "{}Refine the selected idea for the topic \"{topic}\" into a precise, \
         measurable research plan.\n\nIdea: {}\nDescription: {}\nContribution: {}\n\n\
         Respond with JSON using the same fields as the idea.",
        header("idea_refine"),
        idea.title,
        idea.description,
        idea.key_contribution
    )
}

/// Keep the `keep` best-scored ideas, skipping `discard` verdicts.
///
/// Ties keep pool order. Ideas without a critique score 0. If every idea is
/// discarded, the first `keep` ideas survive.
pub fn select(pool: &[Idea], critiques: &[Critique], keep: usize) -> Vec<Idea> {
    let mut ranked: Vec<(usize, f64)> = pool
        .iter()
        .enumerate()
        .filter_map(|(i, _)| {
            let critique = critiques.iter().find(|c| c.index == i);
            match critique {
                Some(c) if c.verdict.eq_ignore_ascii_case("discard") => None,
                Some(c) => Some((i, c.score)),
                None => Some((i, 0.0)),
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let chosen: Vec<Idea> = ranked
        .into_iter()
        .take(keep)
        .map(|(i, _)| pool[i].clone())
        .collect();
    if chosen.is_empty() {
        pool.iter().take(keep).cloned().collect()
    } else {
        chosen
    }
}

pub(super) async fn run(ctx: &StageContext, services: &StageServices) -> Result<StageOutput, StageError> {
    let topic = ctx.paper.title.as_str();
    let n = ctx.settings.idea.candidates;
    let mut session = Session::for_stage(ctx, services);

    let batch: IdeaBatch = session
        .ask_json(generate_prompt(topic, &ctx.paper.categories, n))
        .await?;
    let mut pool: Vec<Idea> = batch.ideas.into_iter().take(n).collect();
    if pool.is_empty() {
        return Err(StageError::InvalidOutput("no ideas generated".to_string()));
    }

    let mut rounds = 0;
    for &keep in &ctx.settings.idea.narrowing {
        if pool.len() <= keep {
            continue;
        }
        let critiques: CritiqueBatch = session.ask_json(critique_prompt(topic, &pool)).await?;
        pool = select(&pool, &critiques.critiques, keep);
        rounds += 1;
    }

    let refined: Idea = session.ask_json(refine_prompt(topic, &pool[0])).await?;
    if refined.title.trim().is_empty() {
        return Err(StageError::InvalidOutput("refined idea has no title".to_string()));
    }

    let output_summary = refined.title.clone();
    let payload = serde_json::to_value(IdeaOutput {
        idea: refined,
        shortlist: pool,
        candidates: n,
        rounds,
    })
    .map_err(|e| StageError::InvalidOutput(e.to_string()))?;
    Ok(session.finish(payload, topic, &output_summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idea(title: &str) -> Idea {
        Idea {
            title: title.to_string(),
            description: String::new(),
            key_contribution: String::new(),
            methodology_sketch: String::new(),
            metrics: vec![],
            maturity_target: None,
        }
    }

    fn critique(index: usize, score: f64, verdict: &str) -> Critique {
        Critique {
            index,
            score,
            verdict: verdict.to_string(),
            reason: String::new(),
        }
    }

    #[test]
    fn select_skips_discard_and_sorts_by_score() {
        let pool = vec![idea("a"), idea("b"), idea("c"), idea("d")];
        let critiques = vec![
            critique(0, 9.0, "discard"),
            critique(1, 5.0, "keep"),
            critique(2, 8.0, "revise"),
            critique(3, 8.0, "keep"),
        ];
        let chosen = select(&pool, &critiques, 2);
        let titles: Vec<_> = chosen.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "d"]);
    }

    #[test]
    fn select_falls_back_when_all_discarded() {
        let pool = vec![idea("a"), idea("b")];
        let critiques = vec![critique(0, 1.0, "discard"), critique(1, 2.0, "DISCARD")];
        let chosen = select(&pool, &critiques, 1);
        assert_eq!(chosen[0].title, "a");
    }

    #[test]
    fn prompts_are_deterministic() {
        let cats = vec!["imaging".to_string()];
        assert_eq!(
            generate_prompt("phase retrieval", &cats, 5),
            generate_prompt("phase retrieval", &cats, 5)
        );
    }
}
