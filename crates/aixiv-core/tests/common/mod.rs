#![allow(dead_code)]

use std::sync::Arc;

use aixiv_core::fakes::ScriptedCompletion;
use aixiv_core::{NewPaper, Orchestrator, RailConfig};
use serde_json::{json, Value};

/// Defaults with retry backoff disabled.
pub fn fast_config() -> RailConfig {
    let mut config = RailConfig::default();
    config.retry.backoff_base_ms = 0;
    config.retry.backoff_max_ms = 0;
    config
}

pub fn orchestrator(completion: &Arc<ScriptedCompletion>) -> Orchestrator {
    orchestrator_with(completion, fast_config())
}

pub fn orchestrator_with(completion: &Arc<ScriptedCompletion>, config: RailConfig) -> Orchestrator {
    Orchestrator::builder()
        .config(config)
        .completion(completion.clone())
        .build()
        .unwrap()
}

pub fn imaging_paper(title: &str) -> NewPaper {
    NewPaper::new(title)
        .with_abstract("Adaptive measurement selection for compressed imaging.")
        .with_authors(vec!["A. Researcher".to_string()])
        .with_categories(vec!["imaging".to_string()])
        .with_section("introduction", "Sampling budgets limit MRI throughput.")
        .with_section("method", "We pick measurements from posterior variance.")
        .with_section("experiments", "fastMRI knee at 4x and 8x acceleration.")
        .with_section("conclusion", "Adaptive sampling halves the budget.")
}

pub fn review(soundness: u32, novelty: u32, recommendation: &str, attested: &[&str]) -> Value {
    json!({
        "scores": {
            "soundness": soundness, "novelty": novelty, "clarity": 4,
            "significance": 3, "reproducibility": 3
        },
        "overall": 7,
        "recommendation": recommendation,
        "weaknesses": ["noise study is thin"],
        "attested_items": attested,
        "gates": {"recoverability": "fail", "carrier_budget": "pass"},
        "summary": "scripted"
    })
}

pub fn meta(recommendation: &str) -> Value {
    json!({
        "final_recommendation": recommendation,
        "confidence": 0.8,
        "justification": "scripted",
        "required_changes": ["add a noise sweep"],
        "suggested_changes": [],
        "arena_eligible": recommendation == "accept"
    })
}

pub const L1_ITEMS: [&str; 4] = ["L1.1", "L1.2", "L1.3", "L1.4"];
pub const L1_L2_ITEMS: [&str; 8] = [
    "L1.1", "L1.2", "L1.3", "L1.4", "L2.1", "L2.2", "L2.3", "L2.4",
];
