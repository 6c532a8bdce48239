//! Structured peer review.
//!
//! Asks for five dimension scores (1-5), an overall score (1-10), a
//! recommendation, the maturity checklist items the reviewer can attest,
//! and a status for every domain gate registered for the paper's
//! categories. Free-text answers are accepted when the scores and
//! recommendation can still be read off them.

use std::collections::BTreeMap;

use aixiv_state::{Dimension, DimensionScores, GateStatus, Recommendation};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::parse::extract_json;
use super::session::{header, numbered, Session};
use super::{RubricItem, StageContext, StageOutput, StageServices};
use crate::domain::error::StageError;

/// Reviewer-level verdict; finer-grained than the lifecycle recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerVerdict {
    Accept,
    MinorRevision,
    MajorRevision,
    Reject,
}

impl From<ReviewerVerdict> for Recommendation {
    fn from(v: ReviewerVerdict) -> Self {
        match v {
            ReviewerVerdict::Accept => Recommendation::Accept,
            ReviewerVerdict::MinorRevision | ReviewerVerdict::MajorRevision => {
                Recommendation::Revise
            }
            ReviewerVerdict::Reject => Recommendation::Reject,
        }
    }
}

impl std::str::FromStr for ReviewerVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "accept" => Ok(ReviewerVerdict::Accept),
            "minor_revision" => Ok(ReviewerVerdict::MinorRevision),
            "major_revision" => Ok(ReviewerVerdict::MajorRevision),
            "reject" => Ok(ReviewerVerdict::Reject),
            other => Err(format!("unknown recommendation: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub scores: DimensionScores,
    pub overall: f64,
    pub recommendation: ReviewerVerdict,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    /// Checklist item ids the reviewer attests as satisfied
    #[serde(default)]
    pub attested_items: Vec<String>,
    #[serde(default)]
    pub gates: BTreeMap<String, GateStatus>,
    #[serde(default)]
    pub summary: String,
}

impl ReviewReport {
    fn validate(&self) -> Result<(), StageError> {
        for d in Dimension::ALL {
            let v = self.scores.get(d);
            if !(1.0..=5.0).contains(&v) {
                return Err(StageError::InvalidOutput(format!(
                    "{} score {v} outside 1-5",
                    d.as_str()
                )));
            }
        }
        if !(1.0..=10.0).contains(&self.overall) {
            return Err(StageError::InvalidOutput(format!(
                "overall score {} outside 1-10",
                self.overall
            )));
        }
        Ok(())
    }
}

fn rubric_block(title: &str, items: &[RubricItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|i| format!("[{}] {}", i.id, i.description))
        .collect();
    format!("{title}:\n{}\n\n", numbered(&lines))
}

fn review_prompt(ctx: &StageContext) -> String {
    format!(
        "{}Review the paper below as a rigorous peer reviewer.\n\
         Categories: {}\n\n{}{}\
         Respond with JSON: {{\"scores\": {{\"soundness\", \"novelty\", \"clarity\", \
         \"significance\", \"reproducibility\"}} (each 1-5), \"overall\": 1-10, \
         \"recommendation\": \"accept|minor_revision|major_revision|reject\", \
         \"strengths\": [..], \"weaknesses\": [..], \"questions\": [..], \
         \"attested_items\": [checklist ids satisfied], \
         \"gates\": {{gate id: \"pass|partial|fail\"}}, \"summary\"}}\n\n{}",
        header("review"),
        ctx.paper.categories.join(", "),
        rubric_block("Maturity checklist", &ctx.rubric.checklist),
        rubric_block("Domain gates", &ctx.rubric.gates),
        ctx.paper_markdown()
    )
}

fn compile(pattern: &str) -> Result<Regex, StageError> {
    Regex::new(pattern).map_err(|e| StageError::InvalidOutput(e.to_string()))
}

/// Read scores and recommendation out of a free-text review.
fn fallback_extract(text: &str) -> Result<Option<ReviewReport>, StageError> {
    let dims = compile(
        r"(?i)\b(soundness|novelty|clarity|significance|reproducibility)\b\s*(?:score)?\s*[:=]\s*(\d+(?:\.\d+)?)",
    )?;
    let overall_re = compile(r"(?i)\boverall(?:\s+score)?\s*[:=]\s*(\d+(?:\.\d+)?)")?;
    let rec_re = compile(
        r"(?i)\brecommendation\s*[:=]\s*\**\s*(accept|minor[ _-]revision|major[ _-]revision|reject)",
    )?;

    let mut found: BTreeMap<String, f64> = BTreeMap::new();
    for cap in dims.captures_iter(text) {
        let name = cap[1].to_ascii_lowercase();
        if let Ok(v) = cap[2].parse::<f64>() {
            found.entry(name).or_insert(v);
        }
    }
    let get = |d: Dimension| found.get(d.as_str()).copied();
    let (Some(soundness), Some(novelty), Some(clarity), Some(significance), Some(reproducibility)) = (
        get(Dimension::Soundness),
        get(Dimension::Novelty),
        get(Dimension::Clarity),
        get(Dimension::Significance),
        get(Dimension::Reproducibility),
    ) else {
        return Ok(None);
    };
    let Some(recommendation) = rec_re
        .captures(text)
        .and_then(|c| c[1].parse::<ReviewerVerdict>().ok())
    else {
        return Ok(None);
    };

    let scores = DimensionScores {
        soundness,
        novelty,
        clarity,
        significance,
        reproducibility,
    };
    let mean = Dimension::ALL.iter().map(|d| scores.get(*d)).sum::<f64>() / 5.0;
    let overall = overall_re
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
        .unwrap_or(mean * 2.0);

    Ok(Some(ReviewReport {
        scores,
        overall,
        recommendation,
        strengths: vec![],
        weaknesses: vec![],
        questions: vec![],
        attested_items: vec![],
        gates: BTreeMap::new(),
        summary: text.chars().take(500).collect(),
    }))
}

/// Parse a review response, falling back to free-text extraction.
pub fn parse_review(text: &str) -> Result<ReviewReport, StageError> {
    let report = match extract_json::<ReviewReport>(text) {
        Ok(r) => r,
        Err(json_err) => match fallback_extract(text)? {
            Some(r) => r,
            None => return Err(json_err),
        },
    };
    report.validate()?;
    Ok(report)
}

pub(super) async fn run(ctx: &StageContext, services: &StageServices) -> Result<StageOutput, StageError> {
    let mut session = Session::for_stage(ctx, services);
    let text = session.ask(review_prompt(ctx)).await?;
    let report = parse_review(&text)?;

    let summary = format!(
        "{:?}, overall {:.1}, {} attested items",
        report.recommendation,
        report.overall,
        report.attested_items.len()
    );
    let payload =
        serde_json::to_value(&report).map_err(|e| StageError::InvalidOutput(e.to_string()))?;
    Ok(session.finish(payload, &ctx.paper.title, &summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_maps_to_lifecycle_recommendation() {
        assert_eq!(
            Recommendation::from(ReviewerVerdict::MinorRevision),
            Recommendation::Revise
        );
        assert_eq!(
            Recommendation::from(ReviewerVerdict::MajorRevision),
            Recommendation::Revise
        );
        assert_eq!(
            Recommendation::from(ReviewerVerdict::Reject),
            Recommendation::Reject
        );
    }

    #[test]
    fn json_review_parses() {
        let text = r#"{"scores": {"soundness": 4, "novelty": 3, "clarity": 4,
            "significance": 3, "reproducibility": 2}, "overall": 6,
            "recommendation": "major_revision", "attested_items": ["L1.1"],
            "gates": {"recoverability": "pass"}}"#;
        let r = parse_review(text).unwrap();
        assert_eq!(r.recommendation, ReviewerVerdict::MajorRevision);
        assert_eq!(r.gates.get("recoverability"), Some(&GateStatus::Pass));
    }

    #[test]
    fn free_text_review_falls_back_to_regex() {
        let text = "Soundness: 4\nNovelty: 5\nClarity: 3\nSignificance: 4\n\
                    Reproducibility: 3\nOverall score: 7\nRecommendation: Minor Revision";
        let r = parse_review(text).unwrap();
        assert_eq!(r.scores.novelty, 5.0);
        assert_eq!(r.overall, 7.0);
        assert_eq!(r.recommendation, ReviewerVerdict::MinorRevision);
    }

    #[test]
    fn out_of_range_score_is_invalid_output() {
        let text = r#"{"scores": {"soundness": 9, "novelty": 3, "clarity": 4,
            "significance": 3, "reproducibility": 2}, "overall": 6,
            "recommendation": "accept"}"#;
        assert!(matches!(
            parse_review(text),
            Err(StageError::InvalidOutput(_))
        ));
    }

    #[test]
    fn unusable_text_is_invalid_output() {
        assert!(matches!(
            parse_review("Looks fine to me."),
            Err(StageError::InvalidOutput(_))
        ));
    }
}
