mod common;

use std::sync::Arc;

use futures_util::future::join_all;
use trailwatch::gamification::{GamificationEngine, GamificationError, COMMENT_EXP, MAX_LEADERBOARD};
use trailwatch::models::NewComment;
use trailwatch::repo::{AccountRepo, CommentRepo};

#[tokio::test]
async fn concurrent_awards_are_not_lost() {
    let (repo, _dir) = common::repo().await;
    let alice = common::account(&repo, "Alice").await;
    let engine = GamificationEngine::new(Arc::new(repo.clone()));

    let awards = (0..20).map(|_| engine.award_exp(alice.id, 7));
    for result in join_all(awards).await {
        result.unwrap();
    }
    let rank = engine.rank(alice.id).await.unwrap().unwrap();
    assert_eq!(rank.exp, 140);
}

#[tokio::test]
async fn non_positive_amounts_are_rejected() {
    let (repo, _dir) = common::repo().await;
    let alice = common::account(&repo, "Alice").await;
    let engine = GamificationEngine::new(Arc::new(repo.clone()));

    assert!(matches!(engine.award_exp(alice.id, 0).await, Err(GamificationError::InvalidAmount(0))));
    assert!(matches!(engine.award_exp(alice.id, -5).await, Err(GamificationError::InvalidAmount(-5))));
    let reloaded = repo.get_account(alice.id).await.unwrap().unwrap();
    assert_eq!(reloaded.exp, 0);
}

#[tokio::test]
async fn rank_counts_strictly_greater_exp() {
    let (repo, _dir) = common::repo().await;
    let alice = common::account(&repo, "Alice").await;
    let bob = common::account(&repo, "Bob").await;
    let carol = common::account(&repo, "Carol").await;
    let engine = GamificationEngine::new(Arc::new(repo.clone()));

    engine.award_exp(alice.id, 30).await.unwrap();
    engine.award_exp(bob.id, 30).await.unwrap();
    engine.award_exp(carol.id, 10).await.unwrap();

    // tied accounts share a rank
    assert_eq!(engine.rank(alice.id).await.unwrap().unwrap().rank, 1);
    assert_eq!(engine.rank(bob.id).await.unwrap().unwrap().rank, 1);
    assert_eq!(engine.rank(carol.id).await.unwrap().unwrap().rank, 3);

    // more exp never worsens rank
    engine.award_exp(carol.id, 25).await.unwrap();
    assert_eq!(engine.rank(carol.id).await.unwrap().unwrap().rank, 1);
    assert_eq!(engine.rank(alice.id).await.unwrap().unwrap().rank, 2);

    assert!(engine.rank(carol.id + 50).await.unwrap().is_none());
}

#[tokio::test]
async fn leaderboard_orders_by_exp_then_id() {
    let (repo, _dir) = common::repo().await;
    let alice = common::account(&repo, "Alice").await;
    let bob = common::account(&repo, "Bob").await;
    let carol = common::account(&repo, "Carol").await;
    let engine = GamificationEngine::new(Arc::new(repo.clone()));

    engine.award_exp(bob.id, 50).await.unwrap();
    engine.award_exp(carol.id, 20).await.unwrap();
    engine.award_exp(alice.id, 20).await.unwrap();

    let board = engine.leaderboard(10).await.unwrap();
    let ids: Vec<_> = board.iter().map(|e| e.account.id).collect();
    assert_eq!(ids, vec![bob.id, alice.id, carol.id]);
    assert_eq!(board.iter().map(|e| e.position).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(board[0].exp, 50);

    assert_eq!(engine.leaderboard(2).await.unwrap().len(), 2);
    assert!(engine.leaderboard(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn leaderboard_limit_is_capped() {
    let (repo, _dir) = common::repo().await;
    for i in 0..(MAX_LEADERBOARD + 3) {
        common::account(&repo, &format!("user{i}")).await;
    }
    let engine = GamificationEngine::new(Arc::new(repo));
    let board = engine.leaderboard(u32::MAX).await.unwrap();
    assert_eq!(board.len(), MAX_LEADERBOARD as usize);
}

#[tokio::test]
async fn comment_rewards_author_and_owner() {
    let (repo, _dir) = common::repo().await;
    let alice = common::account(&repo, "Alice").await;
    let bob = common::account(&repo, "Bob").await;
    let report = common::report(&repo, alice.id, "glass").await;
    let engine = GamificationEngine::new(Arc::new(repo.clone()));

    let comment = repo
        .create_comment(NewComment { report_id: report.id, account_id: bob.id, content: "cleaned".into() })
        .await
        .unwrap();
    assert_eq!(engine.reward_comment(&comment, report.account_id).await, 2);

    assert_eq!(repo.get_account(alice.id).await.unwrap().unwrap().exp, COMMENT_EXP);
    assert_eq!(repo.get_account(bob.id).await.unwrap().unwrap().exp, COMMENT_EXP);
}

#[tokio::test]
async fn failed_reward_does_not_error() {
    let (repo, _dir) = common::repo().await;
    let alice = common::account(&repo, "Alice").await;
    let report = common::report(&repo, alice.id, "glass").await;
    let engine = GamificationEngine::new(Arc::new(repo.clone()));

    let comment = repo
        .create_comment(NewComment { report_id: report.id, account_id: alice.id, content: "self".into() })
        .await
        .unwrap();
    // owner id that no longer resolves: only the author's award lands
    assert_eq!(engine.reward_comment(&comment, alice.id + 99).await, 1);
    assert_eq!(repo.get_account(alice.id).await.unwrap().unwrap().exp, COMMENT_EXP);
}
