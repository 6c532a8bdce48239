//! Arena composite scoring, ranking and badges.
//!
//! Everything here is a pure function of paper, latest review, latest
//! maturity assessment and score cards. Nothing is cached, so recomputing
//! on identical inputs yields an identical leaderboard.

use std::collections::BTreeMap;

use aixiv_state::{
    Dimension, MaturityAssessmentRecord, MaturityLevel, PaperId, PaperRecord, PaperState,
    ReviewRecord, RiskLevel, ScoreCardRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::eval::rail_compliant;

/// Per-dimension weights of the composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaWeights {
    pub soundness: f64,
    pub novelty: f64,
    pub clarity: f64,
    pub significance: f64,
    pub reproducibility: f64,
}

impl Default for ArenaWeights {
    fn default() -> Self {
        Self {
            soundness: 0.30,
            novelty: 0.25,
            clarity: 0.15,
            significance: 0.20,
            reproducibility: 0.10,
        }
    }
}

impl ArenaWeights {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Soundness => self.soundness,
            Dimension::Novelty => self.novelty,
            Dimension::Clarity => self.clarity,
            Dimension::Significance => self.significance,
            Dimension::Reproducibility => self.reproducibility,
        }
    }
}

pub fn maturity_bonus(level: MaturityLevel) -> f64 {
    level.index() as f64 * 0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    L3Certified,
    L4Certified,
    L5Certified,
    RedTeamCleared,
    RailCompliant,
    HighSoundness,
    HighNovelty,
}

impl Badge {
    pub fn label(&self) -> &'static str {
        match self {
            Badge::L3Certified => "L3 Certified",
            Badge::L4Certified => "L4 Certified",
            Badge::L5Certified => "L5 Certified",
            Badge::RedTeamCleared => "Red-Team Cleared",
            Badge::RailCompliant => "Rail Compliant",
            Badge::HighSoundness => "High Soundness",
            Badge::HighNovelty => "High Novelty",
        }
    }
}

impl std::fmt::Display for Badge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Source records for one paper.
#[derive(Debug, Clone)]
pub struct ArenaInput {
    pub paper: PaperRecord,
    pub review: Option<ReviewRecord>,
    pub assessment: Option<MaturityAssessmentRecord>,
    /// Cards for the paper's current version
    pub score_cards: Vec<ScoreCardRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaEntry {
    /// 1-based position in the full ranking
    pub rank: usize,
    pub paper_id: PaperId,
    pub title: String,
    pub state: PaperState,
    pub categories: Vec<String>,
    pub composite: f64,
    pub novelty: f64,
    pub maturity: MaturityLevel,
    /// 1-based position among ranked papers sharing the category
    pub category_ranks: BTreeMap<String, usize>,
    pub badges: Vec<Badge>,
    pub rail_compliant: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardFilter {
    pub category: Option<String>,
    pub level: Option<MaturityLevel>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaStats {
    pub total: usize,
    pub mean_composite: f64,
    pub rail_compliant: usize,
    /// Count per level, `"L0"`..`"L5"`
    pub maturity_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ArenaRanker {
    weights: ArenaWeights,
}

impl ArenaRanker {
    pub fn new(weights: ArenaWeights) -> Self {
        Self { weights }
    }

    /// Weighted dimension sum plus the maturity bonus.
    pub fn composite(&self, review: &ReviewRecord, level: MaturityLevel) -> f64 {
        let weighted: f64 = Dimension::ALL
            .iter()
            .map(|&d| self.weights.get(d) * review.scores.get(d))
            .sum();
        weighted + maturity_bonus(level)
    }

    /// Rank every eligible paper. Only `accepted` and `published_arena`
    /// papers with a review take part.
    pub fn rank(&self, inputs: &[ArenaInput]) -> Vec<ArenaEntry> {
        let mut entries: Vec<ArenaEntry> = inputs
            .iter()
            .filter(|i| {
                matches!(
                    i.paper.state,
                    PaperState::Accepted | PaperState::PublishedArena
                )
            })
            .filter_map(|i| {
                let review = i.review.as_ref()?;
                Some(self.entry(i, review))
            })
            .collect();

        entries.sort_by(|a, b| {
            b.composite
                .total_cmp(&a.composite)
                .then_with(|| b.novelty.total_cmp(&a.novelty))
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
                .then_with(|| a.paper_id.cmp(&b.paper_id))
        });

        let mut per_category: BTreeMap<String, usize> = BTreeMap::new();
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
            for category in &entry.categories {
                let n = per_category.entry(category.clone()).or_insert(0);
                *n += 1;
                entry.category_ranks.insert(category.clone(), *n);
            }
        }
        entries
    }

    /// Ranked entries narrowed by `filter`; ranks stay global.
    pub fn leaderboard(&self, inputs: &[ArenaInput], filter: &LeaderboardFilter) -> Vec<ArenaEntry> {
        let entries = self.rank(inputs).into_iter().filter(|e| {
            filter
                .category
                .as_ref()
                .map_or(true, |c| e.categories.contains(c))
                && filter.level.map_or(true, |l| e.maturity == l)
        });
        match filter.limit {
            Some(limit) => entries.take(limit).collect(),
            None => entries.collect(),
        }
    }

    pub fn stats(&self, entries: &[ArenaEntry]) -> ArenaStats {
        let mut maturity_distribution: BTreeMap<String, usize> = MaturityLevel::ALL
            .iter()
            .map(|l| (l.to_string(), 0))
            .collect();
        for e in entries {
            *maturity_distribution.entry(e.maturity.to_string()).or_insert(0) += 1;
        }
        let mean_composite = if entries.is_empty() {
            0.0
        } else {
            entries.iter().map(|e| e.composite).sum::<f64>() / entries.len() as f64
        };
        ArenaStats {
            total: entries.len(),
            mean_composite,
            rail_compliant: entries.iter().filter(|e| e.rail_compliant).count(),
            maturity_distribution,
        }
    }

    fn entry(&self, input: &ArenaInput, review: &ReviewRecord) -> ArenaEntry {
        let maturity = input
            .assessment
            .as_ref()
            .map(|a| a.level)
            .unwrap_or_default();
        let rail = rail_compliant(&input.score_cards);
        ArenaEntry {
            rank: 0,
            paper_id: input.paper.paper_id.clone(),
            title: input.paper.title.clone(),
            state: input.paper.state,
            categories: input.paper.categories.clone(),
            composite: self.composite(review, maturity),
            novelty: review.scores.novelty,
            maturity,
            category_ranks: BTreeMap::new(),
            badges: badges(maturity, review, rail),
            rail_compliant: rail,
            submitted_at: input.paper.submitted_at,
        }
    }
}

pub fn badges(maturity: MaturityLevel, review: &ReviewRecord, rail_compliant: bool) -> Vec<Badge> {
    let rules = [
        (Badge::L3Certified, maturity >= MaturityLevel::L3),
        (Badge::L4Certified, maturity >= MaturityLevel::L4),
        (Badge::L5Certified, maturity == MaturityLevel::L5),
        (Badge::RedTeamCleared, review.redteam_risk == RiskLevel::Low),
        (Badge::RailCompliant, rail_compliant),
        (Badge::HighSoundness, review.scores.soundness >= 4.0),
        (Badge::HighNovelty, review.scores.novelty >= 4.0),
    ];
    rules
        .into_iter()
        .filter_map(|(badge, earned)| earned.then_some(badge))
        .collect()
}

/// Markdown leaderboard table.
pub fn format_leaderboard(entries: &[ArenaEntry]) -> String {
    let mut out = String::from("| Rank | Paper | Composite | Level | Badges |\n|---|---|---|---|---|\n");
    for e in entries {
        let badges: Vec<&str> = e.badges.iter().map(Badge::label).collect();
        out.push_str(&format!(
            "| {} | {} | {:.2} | {} | {} |\n",
            e.rank,
            e.title,
            e.composite,
            e.maturity,
            badges.join(", ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use aixiv_state::{DimensionScores, Recommendation, RunId};
    use chrono::TimeZone;

    fn input(title: &str, state: PaperState, novelty: f64, level: MaturityLevel, day: u32) -> ArenaInput {
        let mut paper = PaperRecord::new(title, vec![], vec!["imaging".into()]);
        paper.state = state;
        paper.submitted_at = Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap();
        let review = ReviewRecord {
            paper_id: paper.paper_id.clone(),
            paper_version: 1,
            review_cycle: 1,
            run_id: RunId::from("r"),
            scores: DimensionScores {
                soundness: 4.0,
                novelty,
                clarity: 3.0,
                significance: 3.0,
                reproducibility: 3.0,
            },
            overall: 7.0,
            recommendation: Recommendation::Accept,
            attested_items: vec![],
            gate_results: BTreeMap::new(),
            redteam_risk: RiskLevel::Low,
            weaknesses: vec![],
            required_changes: vec![],
            suggested_changes: vec![],
            arena_eligible: true,
            reviewed_at: paper.submitted_at,
        };
        let assessment = MaturityAssessmentRecord {
            paper_id: paper.paper_id.clone(),
            paper_version: 1,
            review_cycle: 1,
            level,
            checklists: vec![],
            unmet: vec![],
            next_steps: vec![],
            assessed_at: paper.submitted_at,
        };
        ArenaInput {
            paper,
            review: Some(review),
            assessment: Some(assessment),
            score_cards: vec![],
        }
    }

    #[test]
    fn composite_is_weighted_sum_plus_bonus() {
        let ranker = ArenaRanker::default();
        let i = input("a", PaperState::Accepted, 4.0, MaturityLevel::L2, 1);
        let c = ranker.composite(i.review.as_ref().unwrap(), MaturityLevel::L2);
        let expected = 0.3 * 4.0 + 0.25 * 4.0 + 0.15 * 3.0 + 0.2 * 3.0 + 0.1 * 3.0 + 1.0;
        assert!((c - expected).abs() < 1e-9);
    }

    #[test]
    fn ties_break_on_novelty_then_earlier_submission() {
        let ranker = ArenaRanker::new(ArenaWeights {
            novelty: 0.0,
            ..ArenaWeights::default()
        });
        let inputs = vec![
            input("late", PaperState::Accepted, 3.0, MaturityLevel::L1, 5),
            input("novel", PaperState::Accepted, 5.0, MaturityLevel::L1, 9),
            input("early", PaperState::PublishedArena, 3.0, MaturityLevel::L1, 2),
        ];
        let titles: Vec<String> = ranker.rank(&inputs).into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["novel", "early", "late"]);
    }

    #[test]
    fn only_accepted_or_published_papers_rank() {
        let ranker = ArenaRanker::default();
        let mut unreviewed = input("none", PaperState::Accepted, 4.0, MaturityLevel::L1, 3);
        unreviewed.review = None;
        let inputs = vec![
            input("a", PaperState::Accepted, 4.0, MaturityLevel::L1, 1),
            input("r", PaperState::Revision, 5.0, MaturityLevel::L4, 1),
            unreviewed,
        ];
        let ranked = ranker.rank(&inputs);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].category_ranks.get("imaging"), Some(&1));
    }

    #[test]
    fn filter_keeps_global_rank() {
        let ranker = ArenaRanker::default();
        let inputs = vec![
            input("top", PaperState::Accepted, 4.0, MaturityLevel::L3, 1),
            input("second", PaperState::Accepted, 4.0, MaturityLevel::L1, 1),
        ];
        let board = ranker.leaderboard(
            &inputs,
            &LeaderboardFilter {
                level: Some(MaturityLevel::L1),
                ..Default::default()
            },
        );
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].rank, 2);
    }

    #[test]
    fn badges_and_stats() {
        let ranker = ArenaRanker::default();
        let inputs = vec![input("a", PaperState::Accepted, 4.5, MaturityLevel::L4, 1)];
        let ranked = ranker.rank(&inputs);
        assert_eq!(
            ranked[0].badges,
            vec![
                Badge::L3Certified,
                Badge::L4Certified,
                Badge::RedTeamCleared,
                Badge::HighSoundness,
                Badge::HighNovelty
            ]
        );
        let stats = ranker.stats(&ranked);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.maturity_distribution.get("L4"), Some(&1));
        assert_eq!(stats.maturity_distribution.get("L0"), Some(&0));
        assert_eq!(stats.rail_compliant, 0);
    }
}
