//! Four-scenario evaluation engine.
//!
//! Scores one paper version under the `ideal`, `noisy`, `mismatch` and
//! `adversarial` scenarios. Scenarios run concurrently and independently;
//! a scenario that still fails after the retry policy gives up yields a
//! card with `score: None` and a failure detail, so [`EvaluationEngine::evaluate`]
//! always returns exactly four cards in [`Scenario::ALL`] order.

use std::sync::Arc;

use aixiv_state::{NewDecision, PaperRecord, PromptFingerprint, RunId, Scenario, ScoreCardRecord};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::completion::{CompletionService, SamplingParams};
use crate::domain::error::StageError;
use crate::obs;
use crate::retry::RetryPolicy;
use crate::stage::parse::clip;
use crate::stage::render_markdown;
use crate::stage::session::{header, Session};

/// Scores at or above this on every scenario make a paper rail-compliant.
pub const RAIL_THRESHOLD: f64 = 0.5;

const PAPER_CHARS: usize = 6000;

// ---------------------------------------------------------------------------
// Scenario prompts
// ---------------------------------------------------------------------------

fn scenario_title(scenario: Scenario) -> &'static str {
    match scenario {
        Scenario::Ideal => "Scenario 1: Ideal Conditions",
        Scenario::Noisy => "Scenario 2: Real-World Noise",
        Scenario::Mismatch => "Scenario 3: Operator Mismatch",
        Scenario::Adversarial => "Scenario 4: Adversarial Perturbation",
    }
}

fn scenario_questions(scenario: Scenario) -> &'static str {
    match scenario {
        Scenario::Ideal => {
            "Does the method work under the paper's own assumptions? Are the theoretical \
             claims valid, do the experiments match the stated conditions, and are results \
             consistent with the methodology?"
        }
        Scenario::Noisy => {
            "Does the method degrade gracefully with realistic noise? Is noise modeling \
             realistic, are robustness experiments included, and how sensitive is \
             performance to noise levels?"
        }
        Scenario::Mismatch => {
            "Does the method handle an imperfect forward model? Is model mismatch \
             acknowledged, are calibration errors considered, and how does performance \
             change with model inaccuracy?"
        }
        Scenario::Adversarial => {
            "Does the method survive worst-case perturbation within a bounded budget? Is \
             adversarial robustness tested and are failure modes under attack characterized?"
        }
    }
}

fn scenario_prompt(scenario: Scenario, paper: &PaperRecord) -> String {
    format!(
        "{}Evaluate the paper below under {}.\n{}\n\n\
         Respond with JSON: {{\"score\": 0-10, \"assessment\", \"evidence\", \"gaps\": [..]}}\n\n{}",
        header(&format!("eval_{}", scenario.as_str())),
        scenario_title(scenario),
        scenario_questions(scenario),
        clip(&render_markdown(paper), PAPER_CHARS)
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ScenarioResponse {
    score: f64,
    #[serde(default)]
    assessment: String,
    #[serde(default)]
    evidence: String,
    #[serde(default)]
    gaps: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Cards plus the audit entries produced while computing them.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    /// Always four, in `Scenario::ALL` order
    pub cards: Vec<ScoreCardRecord>,
    pub decisions: Vec<NewDecision>,
}

impl EvaluationReport {
    pub fn failed(&self) -> usize {
        self.cards.iter().filter(|c| c.score.is_none()).count()
    }
}

pub struct EvaluationEngine {
    completion: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    model: String,
    params: SamplingParams,
}

impl EvaluationEngine {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        retry: RetryPolicy,
        model: impl Into<String>,
        params: SamplingParams,
    ) -> Self {
        Self {
            completion,
            retry,
            model: model.into(),
            params,
        }
    }

    /// Run all four scenarios against the current version of `paper`.
    pub async fn evaluate(&self, paper: &PaperRecord, run_id: Option<&RunId>) -> EvaluationReport {
        let runs = Scenario::ALL
            .iter()
            .map(|&scenario| self.run_scenario(scenario, paper, run_id));
        let results = join_all(runs).await;

        let mut cards = Vec::with_capacity(Scenario::ALL.len());
        let mut decisions = Vec::with_capacity(Scenario::ALL.len());
        for (card, decision) in results {
            cards.push(card);
            decisions.push(decision);
        }

        let report = EvaluationReport { cards, decisions };
        obs::emit_evaluation_finished(
            paper.paper_id.as_str(),
            paper.version,
            Scenario::ALL.len() - report.failed(),
            report.failed(),
        );
        report
    }

    async fn run_scenario(
        &self,
        scenario: Scenario,
        paper: &PaperRecord,
        run_id: Option<&RunId>,
    ) -> (ScoreCardRecord, NewDecision) {
        let prompt = scenario_prompt(scenario, paper);
        let result = self
            .retry
            .run(|attempt| {
                let prompt = prompt.clone();
                async move {
                    let mut session = Session::new(
                        self.completion.as_ref(),
                        &self.model,
                        &self.params,
                        attempt.corrective_hint.as_deref(),
                    );
                    let response: ScenarioResponse = session.ask_json(prompt).await?;
                    if !(0.0..=10.0).contains(&response.score) {
                        return Err(StageError::InvalidOutput(format!(
                            "{} score {} outside 0-10",
                            scenario.as_str(),
                            response.score
                        )));
                    }
                    Ok(response)
                }
            })
            .await;

        let (score, detail, failure, output_summary) = match result {
            Ok(r) => {
                let summary = format!("{}: {:.1}/10", scenario.as_str(), r.score);
                let detail = serde_json::json!({
                    "assessment": r.assessment,
                    "evidence": r.evidence,
                    "gaps": r.gaps,
                    "raw_score": r.score,
                });
                (Some(r.score / 10.0), detail, None, summary)
            }
            Err(e) => {
                let summary = format!("{} failed: {e}", scenario.as_str());
                let detail = serde_json::json!({ "error_kind": e.kind() });
                (None, detail, Some(e.to_string()), summary)
            }
        };

        let decision = NewDecision {
            paper_id: paper.paper_id.clone(),
            run_id: run_id.cloned(),
            action_type: if score.is_some() {
                "scenario_scored".to_string()
            } else {
                "scenario_failed".to_string()
            },
            actor: format!("eval_{}", scenario.as_str()),
            model: Some(self.model.clone()),
            prompt_fingerprint: Some(PromptFingerprint::of(&prompt)),
            input_summary: format!("{} v{}", paper.title, paper.version),
            output_summary,
            metadata: serde_json::json!({
                "scenario": scenario.as_str(),
                "paper_version": paper.version,
            }),
        };
        let card = ScoreCardRecord {
            paper_id: paper.paper_id.clone(),
            paper_version: paper.version,
            scenario,
            score,
            detail,
            failure,
            computed_at: Utc::now(),
        };
        (card, decision)
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Score of `scenario` among `cards`, if present and scored.
pub fn scenario_score(cards: &[ScoreCardRecord], scenario: Scenario) -> Option<f64> {
    cards
        .iter()
        .find(|c| c.scenario == scenario)
        .and_then(|c| c.score)
}

/// All four scenarios scored at or above [`RAIL_THRESHOLD`].
pub fn rail_compliant(cards: &[ScoreCardRecord]) -> bool {
    Scenario::ALL
        .iter()
        .all(|&s| scenario_score(cards, s).is_some_and(|v| v >= RAIL_THRESHOLD))
}

/// Markdown evaluation report.
pub fn format_eval_report(cards: &[ScoreCardRecord]) -> String {
    let scored: Vec<f64> = cards.iter().filter_map(|c| c.score).collect();
    let mut lines = vec!["# Rail Evaluation Report".to_string(), String::new()];
    if scored.is_empty() {
        lines.push("**Overall Robustness:** N/A".to_string());
    } else {
        let mean = scored.iter().sum::<f64>() / scored.len() as f64;
        lines.push(format!("**Overall Robustness:** {:.1}/10", mean * 10.0));
    }
    lines.push(format!(
        "**Rail Compliant:** {}",
        if rail_compliant(cards) { "Yes" } else { "No" }
    ));
    lines.push(String::new());

    for scenario in Scenario::ALL {
        lines.push(format!("## {}", scenario_title(scenario)));
        let Some(card) = cards.iter().find(|c| c.scenario == scenario) else {
            lines.push("_not evaluated_".to_string());
            lines.push(String::new());
            continue;
        };
        match (card.score, &card.failure) {
            (Some(score), _) => lines.push(format!("**Score:** {:.1}/10", score * 10.0)),
            (None, Some(failure)) => lines.push(format!("**Score:** failed ({failure})")),
            (None, None) => lines.push("**Score:** N/A".to_string()),
        }
        if let Some(assessment) = card.detail.get("assessment").and_then(|v| v.as_str()) {
            if !assessment.is_empty() {
                lines.push(String::new());
                lines.push(assessment.to_string());
            }
        }
        if let Some(gaps) = card.detail.get("gaps").and_then(|v| v.as_array()) {
            if !gaps.is_empty() {
                lines.push(String::new());
                lines.push("**Gaps:**".to_string());
                lines.extend(gaps.iter().filter_map(|g| g.as_str()).map(|g| format!("- {g}")));
            }
        }
        lines.push(String::new());
    }
    lines.join("\n")
}
