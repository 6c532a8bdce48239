//! Domain gate sets keyed by paper category.
//!
//! A gate set names the gates a reviewer must judge for papers in its
//! category. New domains register a [`DomainGateSet`] with the
//! [`DomainGateRegistry`]; the targeting engine itself never changes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use aixiv_state::{ChecklistItemResult, GateStatus};

use crate::stage::RubricItem;

pub trait DomainGateSet: Send + Sync {
    /// Category tag this set applies to
    fn category(&self) -> &str;

    fn gates(&self) -> Vec<RubricItem>;

    /// Judge reviewer-reported statuses. Only `pass` counts as met.
    fn evaluate(&self, results: &BTreeMap<String, GateStatus>) -> Vec<ChecklistItemResult> {
        self.gates()
            .into_iter()
            .map(|gate| {
                let status = results.get(&gate.id).copied();
                ChecklistItemResult {
                    met: status == Some(GateStatus::Pass),
                    detail: Some(match status {
                        Some(GateStatus::Pass) => "pass".to_string(),
                        Some(GateStatus::Partial) => "partial".to_string(),
                        Some(GateStatus::Fail) => "fail".to_string(),
                        None => "not reported".to_string(),
                    }),
                    id: format!("gate.{}", gate.id),
                    description: gate.description,
                }
            })
            .collect()
    }
}

/// Recoverability, carrier-budget and operator-mismatch gates for
/// computational-imaging submissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagingGates;

impl DomainGateSet for ImagingGates {
    fn category(&self) -> &str {
        "imaging"
    }

    fn gates(&self) -> Vec<RubricItem> {
        [
            (
                "recoverability",
                "Signal is provably or empirically recoverable from the measurements",
            ),
            (
                "carrier_budget",
                "Measurement and carrier budget is stated and respected",
            ),
            (
                "operator_mismatch",
                "Sensitivity to forward-operator mismatch is analyzed",
            ),
        ]
        .into_iter()
        .map(|(id, description)| RubricItem {
            id: id.to_string(),
            description: description.to_string(),
        })
        .collect()
    }
}

#[derive(Clone, Default)]
pub struct DomainGateRegistry {
    sets: Vec<Arc<dyn DomainGateSet>>,
}

impl std::fmt::Debug for DomainGateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sets.iter().map(|s| s.category().to_string()))
            .finish()
    }
}

impl DomainGateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in imaging gates.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ImagingGates));
        registry
    }

    pub fn register(&mut self, set: Arc<dyn DomainGateSet>) {
        self.sets.push(set);
    }

    pub fn categories(&self) -> Vec<String> {
        self.sets.iter().map(|s| s.category().to_string()).collect()
    }

    fn sets_for<'a>(&'a self, categories: &'a [String]) -> impl Iterator<Item = &'a Arc<dyn DomainGateSet>> {
        self.sets
            .iter()
            .filter(move |s| categories.iter().any(|c| c == s.category()))
    }

    /// Gates applying to a paper tagged with `categories`, first registration wins on id clashes.
    pub fn gates_for(&self, categories: &[String]) -> Vec<RubricItem> {
        let mut seen = BTreeSet::new();
        self.sets_for(categories)
            .flat_map(|s| s.gates())
            .filter(|g| seen.insert(g.id.clone()))
            .collect()
    }

    pub fn evaluate(
        &self,
        categories: &[String],
        results: &BTreeMap<String, GateStatus>,
    ) -> Vec<ChecklistItemResult> {
        let mut seen = BTreeSet::new();
        self.sets_for(categories)
            .flat_map(|s| s.evaluate(results))
            .filter(|r| seen.insert(r.id.clone()))
            .collect()
    }
}
