//! Arena promotion and leaderboard ranking over reviewed papers.

mod common;

use std::sync::Arc;

use aixiv_core::fakes::ScriptedCompletion;
use aixiv_core::{LeaderboardFilter, MaturityLevel, PaperState, RailError};

use common::*;

#[tokio::test]
async fn promotion_requires_the_maturity_threshold() {
    let completion = Arc::new(ScriptedCompletion::new());
    completion.set_json("review", review(4, 4, "accept", &L1_ITEMS));
    completion.set_json("meta_review", meta("accept"));
    let orch = orchestrator(&completion);

    let paper = orch.submit(imaging_paper("Only Measurable")).await.unwrap();
    let outcome = orch
        .request_review(&paper.paper_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(outcome.paper.state, PaperState::Accepted);
    assert_eq!(outcome.assessment.unwrap().level, MaturityLevel::L1);

    let err = orch.promote_to_arena(&paper.paper_id).await.unwrap_err();
    assert!(matches!(
        err,
        RailError::GuardNotMet { from: PaperState::Accepted, .. }
    ));
    assert_eq!(
        orch.paper(&paper.paper_id).await.unwrap().state,
        PaperState::Accepted
    );
}

#[tokio::test]
async fn leaderboard_ranks_accepted_and_published_papers() {
    let completion = Arc::new(ScriptedCompletion::new());
    completion.set_json("meta_review", meta("accept"));
    let orch = orchestrator(&completion);

    completion.set_json("review", review(3, 3, "accept", &L1_L2_ITEMS));
    let modest = orch.submit(imaging_paper("Modest")).await.unwrap();
    orch.request_review(&modest.paper_id).await.unwrap().wait().await.unwrap();

    completion.set_json("review", review(5, 5, "accept", &L1_L2_ITEMS));
    let strong = orch.submit(imaging_paper("Strong")).await.unwrap();
    orch.request_review(&strong.paper_id).await.unwrap().wait().await.unwrap();

    // Not reviewed: never ranked
    orch.submit(imaging_paper("Pending")).await.unwrap();

    let published = orch.promote_to_arena(&strong.paper_id).await.unwrap();
    assert_eq!(published.state, PaperState::PublishedArena);
    let decisions = orch.decisions(&strong.paper_id).await.unwrap();
    assert!(decisions.iter().any(|d| d.action_type == "arena_promotion"));

    let board = orch.leaderboard(&LeaderboardFilter::default()).await.unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].paper_id, strong.paper_id);
    assert_eq!(board[0].rank, 1);
    assert_eq!(board[1].paper_id, modest.paper_id);
    assert!(board[0].composite > board[1].composite);
    assert_eq!(board[0].category_ranks.get("imaging"), Some(&1));
    assert!(board.iter().all(|e| e.maturity == MaturityLevel::L2));

    // Same records, same order
    let again = orch.leaderboard(&LeaderboardFilter::default()).await.unwrap();
    assert_eq!(board, again);

    let top = orch
        .leaderboard(&LeaderboardFilter {
            limit: Some(1),
            ..LeaderboardFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].paper_id, strong.paper_id);

    let stats = orch.arena_stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.maturity_distribution["L2"], 2);
    assert_eq!(stats.rail_compliant, 2);

    // Published is terminal
    assert!(matches!(
        orch.promote_to_arena(&strong.paper_id).await,
        Err(RailError::GuardNotMet { from: PaperState::PublishedArena, .. })
    ));
}
