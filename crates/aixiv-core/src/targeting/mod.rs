//! L0-L5 maturity targeting.
//!
//! Deterministic rule evaluation over review output, evaluation score
//! cards and domain gate results. A level holds when its quorum of
//! reviewer-attested checklist items is met and its evidence requirements
//! pass:
//!
//! | Level | Evidence requirements |
//! |---|---|
//! | L1 | review present, soundness >= 3 |
//! | L2 | all four score cards scored, `ideal` >= 0.5 |
//! | L3 | `noisy` and `mismatch` >= 0.5, every domain gate passed |
//! | L4 | `adversarial` >= 0.5, red-team risk not high |
//! | L5 | every scenario >= 0.8 |
//!
//! Promotion starts at L0 and stops at the first level that does not hold,
//! so evidence for higher levels never lifts a paper past a gap.

pub mod checklist;
pub mod gates;

use std::collections::BTreeMap;

use aixiv_state::{
    ChecklistItemResult, LevelChecklist, MaturityAssessmentRecord, MaturityLevel, PaperRecord,
    ReviewRecord, RiskLevel, Scenario, ScoreCardRecord,
};
use chrono::Utc;

pub use checklist::{criteria_for, format_criteria, gap_items, maturity_criteria, LevelCriteria};
pub use gates::{DomainGateRegistry, DomainGateSet, ImagingGates};

use crate::eval::scenario_score;
use crate::obs;
use crate::stage::ReviewRubric;

const MIN_SOUNDNESS: f64 = 3.0;
const SCENARIO_PASS: f64 = 0.5;
const SCENARIO_SOLVED: f64 = 0.8;

/// Everything the engine judges a paper version on.
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    pub review: Option<&'a ReviewRecord>,
    pub score_cards: &'a [ScoreCardRecord],
}

#[derive(Debug, Clone, Default)]
pub struct TargetingEngine {
    gates: DomainGateRegistry,
}

impl TargetingEngine {
    pub fn new(gates: DomainGateRegistry) -> Self {
        Self { gates }
    }

    pub fn gates(&self) -> &DomainGateRegistry {
        &self.gates
    }

    /// Checklist items (L1-L5) and domain gates a reviewer should judge.
    pub fn rubric_for(&self, categories: &[String]) -> ReviewRubric {
        ReviewRubric {
            checklist: gap_items(MaturityLevel::L0, MaturityLevel::L5),
            gates: self.gates.gates_for(categories),
        }
    }

    pub fn assess(&self, paper: &PaperRecord, evidence: &Evidence<'_>) -> MaturityAssessmentRecord {
        let mut checklists = vec![baseline()];
        checklists.extend(
            maturity_criteria()
                .iter()
                .skip(1)
                .map(|c| self.level_checklist(c, paper, evidence)),
        );

        let level = checklists
            .iter()
            .skip(1)
            .take_while(|c| c.satisfied)
            .last()
            .map(|c| c.level)
            .unwrap_or(MaturityLevel::L0);

        let (unmet, next_steps) = match level.next() {
            Some(next) => gap_report(criteria_for(next), &checklists[next.index()]),
            None => (vec![], vec![]),
        };

        obs::emit_assessment(paper.paper_id.as_str(), &level.to_string(), unmet.len());

        MaturityAssessmentRecord {
            paper_id: paper.paper_id.clone(),
            paper_version: paper.version,
            review_cycle: evidence
                .review
                .map(|r| r.review_cycle)
                .unwrap_or(paper.review_cycles),
            level,
            checklists,
            unmet,
            next_steps,
            assessed_at: Utc::now(),
        }
    }

    fn level_checklist(
        &self,
        criteria: &LevelCriteria,
        paper: &PaperRecord,
        evidence: &Evidence<'_>,
    ) -> LevelChecklist {
        let attested: &[String] = evidence
            .review
            .map(|r| r.attested_items.as_slice())
            .unwrap_or(&[]);
        let mut items: Vec<ChecklistItemResult> = criteria
            .items()
            .into_iter()
            .map(|item| ChecklistItemResult {
                met: attested.contains(&item.id),
                id: item.id,
                description: item.description,
                detail: None,
            })
            .collect();
        let attested_count = items.iter().filter(|i| i.met).count();

        let requirements = self.requirements(criteria.level, paper, evidence);
        let satisfied = attested_count >= criteria.quorum && requirements.iter().all(|r| r.met);
        items.extend(requirements);

        LevelChecklist {
            level: criteria.level,
            satisfied,
            items,
        }
    }

    fn requirements(
        &self,
        level: MaturityLevel,
        paper: &PaperRecord,
        evidence: &Evidence<'_>,
    ) -> Vec<ChecklistItemResult> {
        let cards = evidence.score_cards;
        match level {
            MaturityLevel::L0 => vec![],
            MaturityLevel::L1 => {
                let soundness = evidence.review.map(|r| r.scores.soundness);
                vec![requirement(
                    level,
                    "soundness",
                    format!("Peer-review soundness of at least {MIN_SOUNDNESS}"),
                    soundness.is_some_and(|s| s >= MIN_SOUNDNESS),
                    soundness.map(|s| format!("{s:.1}")),
                )]
            }
            MaturityLevel::L2 => {
                let scored = Scenario::ALL
                    .iter()
                    .filter(|&&s| scenario_score(cards, s).is_some())
                    .count();
                vec![
                    requirement(
                        level,
                        "score_cards",
                        "All four evaluation scenarios scored".to_string(),
                        scored == Scenario::ALL.len(),
                        Some(format!("{scored} of 4 scored")),
                    ),
                    scenario_requirement(level, cards, Scenario::Ideal, SCENARIO_PASS),
                ]
            }
            MaturityLevel::L3 => {
                let mut reqs = vec![
                    scenario_requirement(level, cards, Scenario::Noisy, SCENARIO_PASS),
                    scenario_requirement(level, cards, Scenario::Mismatch, SCENARIO_PASS),
                ];
                let empty = BTreeMap::new();
                let gate_results = evidence.review.map(|r| &r.gate_results).unwrap_or(&empty);
                reqs.extend(self.gates.evaluate(&paper.categories, gate_results));
                reqs
            }
            MaturityLevel::L4 => {
                let risk = evidence.review.map(|r| r.redteam_risk);
                vec![
                    scenario_requirement(level, cards, Scenario::Adversarial, SCENARIO_PASS),
                    requirement(
                        level,
                        "redteam_risk",
                        "Red-team overall risk below high".to_string(),
                        risk.is_some_and(|r| r < RiskLevel::High),
                        risk.map(|r| format!("{r:?}").to_lowercase()),
                    ),
                ]
            }
            MaturityLevel::L5 => Scenario::ALL
                .iter()
                .map(|&s| scenario_requirement(level, cards, s, SCENARIO_SOLVED))
                .collect(),
        }
    }
}

fn baseline() -> LevelChecklist {
    LevelChecklist {
        level: MaturityLevel::L0,
        satisfied: true,
        items: criteria_for(MaturityLevel::L0)
            .items()
            .into_iter()
            .map(|item| ChecklistItemResult {
                id: item.id,
                description: item.description,
                met: true,
                detail: Some("baseline".to_string()),
            })
            .collect(),
    }
}

fn requirement(
    level: MaturityLevel,
    key: &str,
    description: String,
    met: bool,
    detail: Option<String>,
) -> ChecklistItemResult {
    ChecklistItemResult {
        id: format!("{level}.req.{key}"),
        description,
        met,
        detail: Some(detail.unwrap_or_else(|| "missing".to_string())),
    }
}

fn scenario_requirement(
    level: MaturityLevel,
    cards: &[ScoreCardRecord],
    scenario: Scenario,
    min: f64,
) -> ChecklistItemResult {
    let score = scenario_score(cards, scenario);
    requirement(
        level,
        scenario.as_str(),
        format!("{scenario} scenario score of at least {min}"),
        score.is_some_and(|s| s >= min),
        score.map(|s| format!("{s:.2}")),
    )
}

/// Unmet items and next steps blocking promotion to the level of `checklist`.
fn gap_report(criteria: &LevelCriteria, checklist: &LevelChecklist) -> (Vec<String>, Vec<String>) {
    let (items, reqs): (Vec<&ChecklistItemResult>, Vec<&ChecklistItemResult>) = checklist
        .items
        .iter()
        .partition(|i| i.id.split_once('.').is_some_and(|(_, k)| k.parse::<usize>().is_ok()));

    let met = items.iter().filter(|i| i.met).count();
    let mut unmet = Vec::new();
    let mut next_steps = Vec::new();

    if met < criteria.quorum {
        let missing: Vec<&&ChecklistItemResult> = items.iter().filter(|i| !i.met).collect();
        next_steps.push(format!(
            "Satisfy {} more of the {} {} checklist items",
            criteria.quorum - met,
            criteria.level,
            criteria.name
        ));
        unmet.extend(missing.iter().map(|i| format!("{}: {}", i.id, i.description)));
    }
    for r in reqs.iter().filter(|r| !r.met) {
        let detail = r.detail.as_deref().unwrap_or("missing");
        unmet.push(format!("{}: {} ({detail})", r.id, r.description));
        next_steps.push(format!("{} ({detail})", r.description));
    }
    (unmet, next_steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aixiv_state::{DimensionScores, GateStatus, PaperId, Recommendation, RunId};

    fn review(attested: &[&str], soundness: f64) -> ReviewRecord {
        ReviewRecord {
            paper_id: PaperId::from("p1"),
            paper_version: 1,
            review_cycle: 1,
            run_id: RunId::from("r1"),
            scores: DimensionScores {
                soundness,
                novelty: 4.0,
                clarity: 4.0,
                significance: 4.0,
                reproducibility: 3.0,
            },
            overall: 7.0,
            recommendation: Recommendation::Revise,
            attested_items: attested.iter().map(|s| s.to_string()).collect(),
            gate_results: BTreeMap::new(),
            redteam_risk: RiskLevel::Low,
            weaknesses: vec![],
            required_changes: vec![],
            suggested_changes: vec![],
            arena_eligible: false,
            reviewed_at: Utc::now(),
        }
    }

    fn cards(scores: [Option<f64>; 4]) -> Vec<ScoreCardRecord> {
        Scenario::ALL
            .iter()
            .zip(scores)
            .map(|(&scenario, score)| ScoreCardRecord {
                paper_id: PaperId::from("p1"),
                paper_version: 1,
                scenario,
                score,
                detail: serde_json::json!({}),
                failure: None,
                computed_at: Utc::now(),
            })
            .collect()
    }

    fn all_items(levels: &[MaturityLevel]) -> Vec<String> {
        levels
            .iter()
            .flat_map(|l| criteria_for(*l).items())
            .map(|i| i.id)
            .collect()
    }

    #[test]
    fn no_evidence_is_l0_with_l1_gap() {
        let engine = TargetingEngine::default();
        let paper = PaperRecord::new("t", vec![], vec![]);
        let a = engine.assess(
            &paper,
            &Evidence {
                review: None,
                score_cards: &[],
            },
        );
        assert_eq!(a.level, MaturityLevel::L0);
        assert!(a.unmet.iter().any(|u| u.starts_with("L1.1")));
        assert!(a.unmet.iter().any(|u| u.starts_with("L1.req.soundness")));
        assert_eq!(a.checklists.len(), 6);
    }

    #[test]
    fn l1_quorum_is_three_of_five() {
        let engine = TargetingEngine::default();
        let paper = PaperRecord::new("t", vec![], vec![]);
        let r = review(&["L1.1", "L1.2", "L1.3"], 4.0);
        let a = engine.assess(
            &paper,
            &Evidence {
                review: Some(&r),
                score_cards: &[],
            },
        );
        assert_eq!(a.level, MaturityLevel::L1);
        // L2 blocked on both checklist quorum and missing cards
        assert!(a.unmet.iter().any(|u| u.starts_with("L2.req.score_cards")));
        assert!(a.next_steps[0].contains("4 more"));
    }

    #[test]
    fn failed_scenario_counts_as_missing_not_zero() {
        let engine = TargetingEngine::default();
        let paper = PaperRecord::new("t", vec![], vec![]);
        let attested = all_items(&[MaturityLevel::L1, MaturityLevel::L2]);
        let attested: Vec<&str> = attested.iter().map(String::as_str).collect();
        let r = review(&attested, 4.0);
        let c = cards([Some(0.9), None, Some(0.7), Some(0.6)]);
        let a = engine.assess(
            &paper,
            &Evidence {
                review: Some(&r),
                score_cards: &c,
            },
        );
        assert_eq!(a.level, MaturityLevel::L1);
        assert!(a.unmet.iter().any(|u| u.contains("3 of 4 scored")));
    }

    #[test]
    fn unmet_level_caps_assignment_regardless_of_higher_evidence() {
        let engine = TargetingEngine::default();
        let paper = PaperRecord::new("t", vec![], vec![]);
        // Everything except the L2 checklist
        let attested = all_items(&[
            MaturityLevel::L1,
            MaturityLevel::L3,
            MaturityLevel::L4,
            MaturityLevel::L5,
        ]);
        let attested: Vec<&str> = attested.iter().map(String::as_str).collect();
        let r = review(&attested, 5.0);
        let c = cards([Some(1.0); 4]);
        let a = engine.assess(
            &paper,
            &Evidence {
                review: Some(&r),
                score_cards: &c,
            },
        );
        assert_eq!(a.level, MaturityLevel::L1);
        assert!(a.checklists[5].satisfied);
        assert!(!a.checklists[2].satisfied);
    }

    #[test]
    fn imaging_gates_block_l3_until_passed() {
        let engine = TargetingEngine::new(DomainGateRegistry::with_defaults());
        let paper = PaperRecord::new("t", vec![], vec!["imaging".into()]);
        let attested = all_items(&[MaturityLevel::L1, MaturityLevel::L2, MaturityLevel::L3]);
        let attested: Vec<&str> = attested.iter().map(String::as_str).collect();
        let mut r = review(&attested, 4.0);
        let c = cards([Some(0.9), Some(0.7), Some(0.7), Some(0.3)]);

        r.gate_results = [
            ("recoverability".to_string(), GateStatus::Pass),
            ("carrier_budget".to_string(), GateStatus::Partial),
            ("operator_mismatch".to_string(), GateStatus::Pass),
        ]
        .into_iter()
        .collect();
        let a = engine.assess(
            &paper,
            &Evidence {
                review: Some(&r),
                score_cards: &c,
            },
        );
        assert_eq!(a.level, MaturityLevel::L2);
        assert!(a.unmet.iter().any(|u| u.starts_with("gate.carrier_budget")));

        r.gate_results
            .insert("carrier_budget".to_string(), GateStatus::Pass);
        let a = engine.assess(
            &paper,
            &Evidence {
                review: Some(&r),
                score_cards: &c,
            },
        );
        assert_eq!(a.level, MaturityLevel::L3);
    }

    #[test]
    fn rubric_lists_checklists_and_category_gates() {
        let engine = TargetingEngine::new(DomainGateRegistry::with_defaults());
        let rubric = engine.rubric_for(&["imaging".into()]);
        assert_eq!(rubric.checklist.len(), 29);
        assert_eq!(rubric.gates.len(), 3);
    }
}
