//! L0-L5 maturity checklist.
//!
//! Each level carries a reviewer-attested checklist and a quorum: the
//! number of its items that must be attested for the checklist part of the
//! level to hold. Item ids are `"L<n>.<k>"`, 1-based.

use aixiv_state::MaturityLevel;
use serde::Serialize;

use crate::stage::RubricItem;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelCriteria {
    pub level: MaturityLevel,
    pub name: &'static str,
    pub description: &'static str,
    pub checklist: &'static [&'static str],
    /// Attested items required; `0` for the baseline level
    pub quorum: usize,
}

impl LevelCriteria {
    pub fn item_id(&self, index: usize) -> String {
        format!("{}.{}", self.level, index + 1)
    }

    /// Checklist as rubric items with stable ids.
    pub fn items(&self) -> Vec<RubricItem> {
        self.checklist
            .iter()
            .enumerate()
            .map(|(i, d)| RubricItem {
                id: self.item_id(i),
                description: (*d).to_string(),
            })
            .collect()
    }

    pub fn threshold_text(&self) -> String {
        if self.quorum == 0 {
            "Any research attempt, however informal".to_string()
        } else {
            format!(
                "At least {} of {} checklist items satisfied",
                self.quorum,
                self.checklist.len()
            )
        }
    }
}

static CRITERIA: [LevelCriteria; 6] = [
    LevelCriteria {
        level: MaturityLevel::L0,
        name: "Ill-Posed",
        description: "No agreement on objectives; data messy; decisions anecdotal",
        checklist: &[
            "Problem statement exists",
            "Research question is stated",
            "Some data or observations referenced",
        ],
        quorum: 0,
    },
    LevelCriteria {
        level: MaturityLevel::L1,
        name: "Measurable",
        description: "Agreed-upon metrics; basic leaderboards; AI acts as scorekeeper",
        checklist: &[
            "Clear quantitative metrics defined",
            "Baseline comparisons provided",
            "Evaluation protocol specified",
            "Results reported with numbers (not just qualitative)",
            "Dataset or benchmark identified",
        ],
        quorum: 3,
    },
    LevelCriteria {
        level: MaturityLevel::L2,
        name: "Repeatable",
        description: "Standard operating procedures; consistent manual processes",
        checklist: &[
            "All hyperparameters specified",
            "Code availability stated or provided",
            "Data availability stated or provided",
            "Experimental setup fully described",
            "Results include error bars or confidence intervals",
            "Ablation study included",
        ],
        quorum: 4,
    },
    LevelCriteria {
        level: MaturityLevel::L3,
        name: "Automated",
        description: "Checklists become code; AI executes majority of tasks",
        checklist: &[
            "Method is end-to-end automated",
            "No manual intervention required at inference",
            "Scalability demonstrated or analyzed",
            "Multiple datasets or domains tested",
            "Comparison with automated alternatives",
            "Runtime/efficiency analysis provided",
        ],
        quorum: 4,
    },
    LevelCriteria {
        level: MaturityLevel::L4,
        name: "Industrialized",
        description: "Market buys outcomes not effort; AI permanently beats human methods",
        checklist: &[
            "Solution deployed or deployable in production",
            "Robustness to distribution shift demonstrated",
            "Failure modes characterized",
            "Cost/benefit analysis provided",
            "Comparison with commercial/industrial alternatives",
            "API or tool released for community use",
        ],
        quorum: 4,
    },
    LevelCriteria {
        level: MaturityLevel::L5,
        name: "Solved",
        description: "Compute-bound; multiple providers compete on price",
        checklist: &[
            "Problem fully characterized mathematically",
            "Optimality proven or demonstrated empirically",
            "No known failure cases remain",
            "Multiple independent implementations exist",
            "Community consensus on solution",
            "Remaining improvements are purely computational",
        ],
        quorum: 5,
    },
];

/// The published criteria, indexed by level.
pub fn maturity_criteria() -> &'static [LevelCriteria; 6] {
    &CRITERIA
}

pub fn criteria_for(level: MaturityLevel) -> &'static LevelCriteria {
    &CRITERIA[level.index()]
}

/// Checklist items of every level above `from` up to and including `to`.
pub fn gap_items(from: MaturityLevel, to: MaturityLevel) -> Vec<RubricItem> {
    CRITERIA
        .iter()
        .filter(|c| c.level > from && c.level <= to)
        .flat_map(|c| c.items())
        .collect()
}

/// Markdown listing of all levels, for display.
pub fn format_criteria() -> String {
    let mut out = String::from("# L0-L5 Maturity Criteria\n");
    for c in &CRITERIA {
        out.push_str(&format!(
            "\n## {} {}\n{}\n\nThreshold: {}\n\n",
            c.level,
            c.name,
            c.description,
            c.threshold_text()
        ));
        for item in c.items() {
            out.push_str(&format!("- [{}] {}\n", item.id, item.description));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorums_match_published_thresholds() {
        let quorums: Vec<(usize, usize)> = maturity_criteria()
            .iter()
            .map(|c| (c.quorum, c.checklist.len()))
            .collect();
        assert_eq!(quorums, vec![(0, 3), (3, 5), (4, 6), (4, 6), (4, 6), (5, 6)]);
    }

    #[test]
    fn item_ids_are_level_scoped() {
        let items = criteria_for(MaturityLevel::L2).items();
        assert_eq!(items[0].id, "L2.1");
        assert_eq!(items[5].id, "L2.6");
    }

    #[test]
    fn gap_covers_intermediate_levels_only() {
        let gap = gap_items(MaturityLevel::L1, MaturityLevel::L3);
        assert_eq!(gap.len(), 12);
        assert!(gap.iter().all(|i| i.id.starts_with("L2.") || i.id.starts_with("L3.")));
        assert!(gap_items(MaturityLevel::L3, MaturityLevel::L3).is_empty());
    }
}
