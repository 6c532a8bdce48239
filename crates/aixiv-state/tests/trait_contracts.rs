//! Trait contract tests for PaperStore, RunLedger, EvidenceStore and DecisionLog.
//!
//! These tests verify the behavioral contracts of the storage traits using
//! the in-memory fakes, plus the SurrealDB decision log on `mem://`.

use std::sync::Arc;

use aixiv_state::fakes::{MemoryDecisionLog, MemoryEvidenceStore, MemoryPaperStore, MemoryRunLedger};
use aixiv_state::storage_traits::*;
use aixiv_state::{DbScope, DbTarget, StorageError, SurrealDecisionLog};
use chrono::Utc;

fn paper() -> PaperRecord {
    PaperRecord::new("Sparse phase retrieval", vec!["ada".into()], vec!["imaging".into()])
}

fn decision(paper_id: &PaperId, action: &str) -> NewDecision {
    NewDecision {
        paper_id: paper_id.clone(),
        run_id: None,
        action_type: action.to_string(),
        actor: "contract".to_string(),
        model: None,
        prompt_fingerprint: Some(PromptFingerprint::of(action)),
        input_summary: "in".to_string(),
        output_summary: "out".to_string(),
        metadata: serde_json::json!({}),
    }
}

// ===========================================================================
// PaperStore
// ===========================================================================

#[tokio::test]
async fn paper_insert_then_get() {
    let store = MemoryPaperStore::new();
    let p = paper();
    store.insert_paper(p.clone()).await.unwrap();

    assert_eq!(store.get_paper(&p.paper_id).await.unwrap(), p);
}

#[tokio::test]
async fn paper_insert_twice_is_rejected() {
    let store = MemoryPaperStore::new();
    let p = paper();
    store.insert_paper(p.clone()).await.unwrap();
    let err = store.insert_paper(p).await.unwrap_err();

    assert!(matches!(err, StorageError::AlreadyExists { .. }));
}

#[tokio::test]
async fn paper_update_missing_is_not_found() {
    let store = MemoryPaperStore::new();
    let err = store.update_paper(paper()).await.unwrap_err();

    assert!(matches!(err, StorageError::NotFound { kind: "paper", .. }));
}

// ===========================================================================
// RunLedger
// ===========================================================================

#[tokio::test]
async fn second_active_run_for_same_paper_is_rejected() {
    let ledger = MemoryRunLedger::new();
    let pid = PaperId::from("p1");
    let first = ledger.open_run(&pid, 1, RunKind::Review).await.unwrap();
    let err = ledger.open_run(&pid, 1, RunKind::Writer).await.unwrap_err();

    assert_eq!(
        err,
        StorageError::ActiveRunExists {
            paper_id: "p1".into(),
            run_id: first.run_id.0.clone(),
        }
    );

    // Other papers are unaffected.
    ledger
        .open_run(&PaperId::from("p2"), 1, RunKind::Review)
        .await
        .unwrap();
}

#[tokio::test]
async fn finished_run_frees_the_paper() {
    let ledger = MemoryRunLedger::new();
    let pid = PaperId::from("p1");
    let run = ledger.open_run(&pid, 1, RunKind::Review).await.unwrap();
    ledger
        .finish_run(&run.run_id, RunStatus::Failed, Some("boom".into()))
        .await
        .unwrap();

    assert!(ledger.active_run(&pid).await.unwrap().is_none());
    ledger.open_run(&pid, 1, RunKind::Review).await.unwrap();
    assert_eq!(ledger.list_runs(&pid).await.unwrap().len(), 2);
}

#[tokio::test]
async fn terminal_run_cannot_be_finished_again() {
    let ledger = MemoryRunLedger::new();
    let run = ledger
        .open_run(&PaperId::from("p1"), 1, RunKind::Writer)
        .await
        .unwrap();
    ledger
        .finish_run(&run.run_id, RunStatus::Succeeded, None)
        .await
        .unwrap();
    let err = ledger
        .finish_run(&run.run_id, RunStatus::Cancelled, None)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

#[tokio::test]
async fn stage_attempts_are_immutable_once_terminal() {
    let ledger = MemoryRunLedger::new();
    let run = ledger
        .open_run(&PaperId::from("p1"), 1, RunKind::Writer)
        .await
        .unwrap();
    ledger
        .begin_stage(&run.run_id, 0, "idea", 1, "topic")
        .await
        .unwrap();
    ledger
        .finish_stage(
            &run.run_id,
            0,
            1,
            StageOutcome::Failed {
                error: "timeout".into(),
            },
        )
        .await
        .unwrap();

    let err = ledger
        .finish_stage(
            &run.run_id,
            0,
            1,
            StageOutcome::Succeeded {
                output: serde_json::json!({}),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ImmutableRecord { .. }));

    // A retry is a new attempt row.
    ledger
        .begin_stage(&run.run_id, 0, "idea", 2, "topic")
        .await
        .unwrap();
    let execs = ledger.stage_executions(&run.run_id).await.unwrap();
    assert_eq!(execs.len(), 2);
    assert_eq!(execs[0].status, StageStatus::Failed);
    assert_eq!(execs[1].status, StageStatus::Running);
}

#[tokio::test]
async fn stage_cannot_begin_on_finished_run() {
    let ledger = MemoryRunLedger::new();
    let run = ledger
        .open_run(&PaperId::from("p1"), 1, RunKind::Writer)
        .await
        .unwrap();
    ledger
        .finish_run(&run.run_id, RunStatus::Cancelled, None)
        .await
        .unwrap();
    let err = ledger
        .begin_stage(&run.run_id, 0, "idea", 1, "")
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

// ===========================================================================
// EvidenceStore
// ===========================================================================

#[tokio::test]
async fn score_cards_replace_per_version_and_scenario() {
    let store = MemoryEvidenceStore::new();
    let pid = PaperId::from("p1");
    let card = |scenario, score| ScoreCardRecord {
        paper_id: pid.clone(),
        paper_version: 1,
        scenario,
        score,
        detail: serde_json::json!({}),
        failure: None,
        computed_at: Utc::now(),
    };

    store
        .put_score_cards(&[card(Scenario::Noisy, Some(0.2)), card(Scenario::Ideal, Some(0.9))])
        .await
        .unwrap();
    store
        .put_score_cards(&[card(Scenario::Noisy, Some(0.6))])
        .await
        .unwrap();

    let cards = store.score_cards(&pid, 1).await.unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].scenario, Scenario::Ideal);
    assert_eq!(cards[1].score, Some(0.6));
    assert!(store.score_cards(&pid, 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn assessments_keep_history() {
    let store = MemoryEvidenceStore::new();
    let pid = PaperId::from("p1");
    for (cycle, level) in [(1, MaturityLevel::L1), (2, MaturityLevel::L2)] {
        store
            .append_assessment(MaturityAssessmentRecord {
                paper_id: pid.clone(),
                paper_version: cycle,
                review_cycle: cycle,
                level,
                checklists: vec![],
                unmet: vec![],
                next_steps: vec![],
                assessed_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    assert_eq!(store.assessments(&pid).await.unwrap().len(), 2);
    let latest = store.latest_assessment(&pid).await.unwrap().unwrap();
    assert_eq!(latest.level, MaturityLevel::L2);
}

// ===========================================================================
// DecisionLog
// ===========================================================================

async fn check_append_order(log: Arc<dyn DecisionLog>) {
    let pid = PaperId::new();
    for action in ["stage_succeeded", "stage_failed", "run_failed"] {
        log.append(decision(&pid, action)).await.unwrap();
    }
    let records = log.list_for(&pid).await.unwrap();
    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(records[2].action_type, "run_failed");
    assert!(records
        .windows(2)
        .all(|w| w[0].recorded_at <= w[1].recorded_at));
}

#[tokio::test]
async fn memory_log_preserves_append_order() {
    check_append_order(Arc::new(MemoryDecisionLog::new())).await;
}

#[tokio::test]
async fn surreal_log_preserves_append_order() {
    let log = SurrealDecisionLog::in_memory().await.unwrap();
    check_append_order(Arc::new(log)).await;
}

#[tokio::test]
async fn surreal_log_connects_into_a_custom_scope() {
    let scope = DbScope {
        namespace: "aixiv_test".into(),
        database: "audit".into(),
    };
    let log = SurrealDecisionLog::connect(&DbTarget::Memory, &scope)
        .await
        .unwrap();
    check_append_order(Arc::new(log)).await;
}

#[tokio::test]
async fn concurrent_appends_across_papers_keep_per_paper_order() {
    let log: Arc<dyn DecisionLog> = Arc::new(MemoryDecisionLog::new());
    let papers: Vec<PaperId> = (0..4).map(|_| PaperId::new()).collect();

    let mut handles = Vec::new();
    for pid in papers.clone() {
        let log = Arc::clone(&log);
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                log.append(decision(&pid, &format!("a{i}"))).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    for pid in &papers {
        let records = log.list_for(pid).await.unwrap();
        let actions: Vec<String> = records.iter().map(|r| r.action_type.clone()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("a{i}")).collect();
        assert_eq!(actions, expected);
    }
}
