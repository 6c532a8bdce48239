//! End-to-end lifecycle flows: review, revision, re-review and arena
//! promotion, driven by `ScriptedCompletion` over in-memory stores.

mod common;

use std::sync::Arc;

use aixiv_core::fakes::ScriptedCompletion;
use aixiv_core::{MaturityLevel, PaperState, RailError, RunKind, RunStatus, Scenario, StageKind};
use serde_json::json;

use common::*;

#[tokio::test]
async fn imaging_paper_is_sent_to_revision_with_gaps() {
    let completion = Arc::new(ScriptedCompletion::new());
    completion.set_json("review", review(4, 3, "major_revision", &L1_ITEMS));
    completion.set_json("meta_review", meta("major_revision"));
    let orch = orchestrator(&completion);

    let paper = orch.submit(imaging_paper("Adaptive Sampling")).await.unwrap();
    assert_eq!(paper.state, PaperState::Submitted);
    assert_eq!(paper.version, 1);

    let outcome = orch.request_review(&paper.paper_id).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.run.status, RunStatus::Succeeded);
    assert_eq!(outcome.paper.state, PaperState::Revision);
    assert_eq!(outcome.paper.review_cycles, 1);

    let assessment = outcome.assessment.expect("assessment recorded");
    assert_eq!(assessment.level, MaturityLevel::L1);
    assert!(assessment.unmet.iter().any(|u| u.starts_with("L2.1")));
    assert!(assessment
        .next_steps
        .iter()
        .any(|s| s.contains("L2 Repeatable")));

    // L3 gates are evaluated for the imaging category
    let l3 = &assessment.checklists[3];
    assert!(l3.items.iter().any(|i| i.id == "gate.recoverability" && !i.met));
    assert!(l3.items.iter().any(|i| i.id == "gate.carrier_budget" && i.met));

    assert_eq!(outcome.score_cards.len(), 4);
    let cards = orch.score_cards(&paper.paper_id, 1).await.unwrap();
    assert_eq!(
        cards.iter().map(|c| c.scenario).collect::<Vec<_>>(),
        Scenario::ALL.to_vec()
    );

    let decisions = orch.decisions(&paper.paper_id).await.unwrap();
    let seqs: Vec<u64> = decisions.iter().map(|d| d.seq).collect();
    assert_eq!(seqs, (1..=decisions.len() as u64).collect::<Vec<_>>());
    let transitions: Vec<String> = decisions
        .iter()
        .filter(|d| d.action_type == "state_transition")
        .map(|d| d.output_summary.clone())
        .collect();
    assert_eq!(transitions, vec!["under_review", "revision"]);
    assert_eq!(
        decisions
            .iter()
            .filter(|d| d.action_type == "scenario_scored")
            .count(),
        4
    );
    assert!(decisions.iter().any(|d| d.action_type == "maturity_assessed"));
}

#[tokio::test]
async fn revision_is_accepted_and_re_reviewed() {
    let completion = Arc::new(ScriptedCompletion::new());
    completion.set_json("review", review(4, 3, "minor_revision", &L1_ITEMS));
    completion.set_json("meta_review", meta("minor_revision"));
    completion.set_json(
        "revise",
        json!({
            "suggestions": [{
                "section": "experiments",
                "original": "4x and 8x",
                "revised": "4x, 8x and 12x",
                "priority": "high",
                "rationale": "wider sweep"
            }],
            "revised_sections": {"introduction": "Sampling budgets and noise limit MRI."}
        }),
    );
    let orch = orchestrator(&completion);
    let paper = orch.submit(imaging_paper("Adaptive Sampling")).await.unwrap();
    let pid = paper.paper_id.clone();

    orch.request_review(&pid).await.unwrap().wait().await.unwrap();
    assert_eq!(orch.paper(&pid).await.unwrap().state, PaperState::Revision);

    let (run_id, proposal) = orch.suggest_revisions(&pid).await.unwrap();
    assert_eq!(proposal.suggestions.len(), 1);
    // Proposals are not committed until accepted
    let unchanged = orch.paper(&pid).await.unwrap();
    assert_eq!(unchanged.version, 1);
    assert_eq!(unchanged.state, PaperState::Revision);

    let revised = orch.accept_revision(&pid, &run_id).await.unwrap();
    assert_eq!(revised.version, 2);
    assert_eq!(revised.state, PaperState::ReReview);
    assert_eq!(
        revised.section("introduction"),
        Some("Sampling budgets and noise limit MRI.")
    );
    assert_eq!(
        revised.section("experiments"),
        Some("fastMRI knee at 4x, 8x and 12x acceleration.")
    );

    completion.set_json("review", review(4, 4, "accept", &L1_L2_ITEMS));
    completion.set_json("meta_review", meta("accept"));
    let outcome = orch.request_review(&pid).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.paper.state, PaperState::Accepted);
    assert_eq!(outcome.paper.review_cycles, 2);
    assert_eq!(outcome.paper.version, 2);
    assert_eq!(orch.reviews(&pid).await.unwrap().len(), 2);
    assert_eq!(orch.score_cards(&pid, 2).await.unwrap().len(), 4);

    let kinds: Vec<RunKind> = orch.runs(&pid).await.unwrap().iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![RunKind::Review, RunKind::Revision, RunKind::Review]);
}

#[tokio::test]
async fn invalid_revision_fails_the_guard_and_changes_nothing() {
    let completion = Arc::new(ScriptedCompletion::new());
    completion.set_json("meta_review", meta("major_revision"));
    let orch = orchestrator(&completion);
    let paper = orch.submit(imaging_paper("Adaptive Sampling")).await.unwrap();
    orch.request_review(&paper.paper_id).await.unwrap().wait().await.unwrap();

    let mut sections = paper.sections.clone();
    sections.pop();
    let err = orch
        .submit_revision(&paper.paper_id, sections)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RailError::GuardNotMet { from: PaperState::Revision, .. }
    ));

    let current = orch.paper(&paper.paper_id).await.unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.state, PaperState::Revision);
}

#[tokio::test]
async fn transitions_outside_the_table_are_rejected() {
    let completion = Arc::new(ScriptedCompletion::new());
    let orch = orchestrator(&completion);
    let paper = orch.submit(imaging_paper("Too Early")).await.unwrap();
    let pid = paper.paper_id.clone();

    assert!(matches!(
        orch.promote_to_arena(&pid).await,
        Err(RailError::GuardNotMet { from: PaperState::Submitted, .. })
    ));
    assert!(matches!(
        orch.submit_revision(&pid, paper.sections.clone()).await,
        Err(RailError::GuardNotMet { .. })
    ));
    assert!(matches!(
        orch.start_run(&pid, RunKind::Review).await,
        Err(RailError::GuardNotMet { .. })
    ));

    assert_eq!(orch.paper(&pid).await.unwrap().state, PaperState::Submitted);
    let actions: Vec<String> = orch
        .decisions(&pid)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.action_type)
        .collect();
    assert_eq!(actions, vec!["paper_submitted"]);
    assert_eq!(completion.total_calls(), 0);
}

#[tokio::test]
async fn review_cycle_limit_forces_rejection() {
    let completion = Arc::new(ScriptedCompletion::new());
    completion.set_json("meta_review", meta("major_revision"));
    let mut config = fast_config();
    config.lifecycle.max_review_cycles = 1;
    let orch = orchestrator_with(&completion, config);

    let paper = orch.submit(imaging_paper("Endless Revisions")).await.unwrap();
    let outcome = orch
        .request_review(&paper.paper_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(outcome.paper.state, PaperState::Rejected);

    let decisions = orch.decisions(&paper.paper_id).await.unwrap();
    assert!(decisions.iter().any(|d| d.action_type == "forced_rejection"));
    // Terminal: nothing further is allowed
    assert!(matches!(
        orch.start_run(&paper.paper_id, RunKind::Writer).await,
        Err(RailError::GuardNotMet { from: PaperState::Rejected, .. })
    ));
}

#[tokio::test]
async fn writer_run_commits_a_draft_for_a_submitted_paper() {
    let completion = Arc::new(ScriptedCompletion::new());
    let orch = orchestrator(&completion);

    let handle = orch
        .draft_paper("adaptive sampling", vec!["A. Researcher".into()], vec!["imaging".into()])
        .await
        .unwrap();
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.run.status, RunStatus::Succeeded);
    assert_eq!(outcome.paper.state, PaperState::Submitted);
    assert_eq!(outcome.paper.title, "Adaptive Sampling for Sparse Recovery");
    assert_eq!(outcome.paper.sections.len(), 7);
    for stage in [StageKind::Idea, StageKind::Literature, StageKind::Method, StageKind::Compose] {
        assert!(outcome.outputs.contains_key(&stage), "missing {stage}");
    }

    // Judging stages use the strong model, drafting stages the default one
    let config = orch.config();
    assert!(completion
        .models()
        .iter()
        .all(|m| m == &config.models.default_model));

    let stored = orch.paper(&outcome.paper.paper_id).await.unwrap();
    assert_eq!(stored.sections, outcome.paper.sections);
    let actions: Vec<String> = orch
        .decisions(&stored.paper_id)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.action_type)
        .collect();
    assert_eq!(actions.first().map(String::as_str), Some("paper_submitted"));
    assert_eq!(actions.last().map(String::as_str), Some("draft_committed"));
    assert_eq!(actions.iter().filter(|a| *a == "stage_succeeded").count(), 4);
}

#[tokio::test]
async fn pipeline_stats_count_every_state() {
    let completion = Arc::new(ScriptedCompletion::new());
    let orch = orchestrator(&completion);
    orch.submit(imaging_paper("one")).await.unwrap();
    let two = orch.submit(imaging_paper("two")).await.unwrap();
    orch.request_review(&two.paper_id).await.unwrap().wait().await.unwrap();

    let stats = orch.pipeline_stats().await.unwrap();
    assert_eq!(stats.len(), 7);
    assert_eq!(stats["submitted"], 1);
    assert_eq!(stats["accepted"], 1);
    assert_eq!(stats["rejected"], 0);
}
