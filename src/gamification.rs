//! Experience accounting and leaderboard ranking.

use std::sync::Arc;

use tracing::warn;

use crate::models::{Comment, Id, LeaderboardEntry, Rank};
use crate::repo::{ExpRepo, Repo, RepoError};

/// Awarded to both the commenter and the report owner.
pub const COMMENT_EXP: i64 = 10;
pub const MAX_LEADERBOARD: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum GamificationError {
    #[error("experience amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct GamificationEngine {
    repo: Arc<dyn Repo>,
}

impl GamificationEngine {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    /// Adds `amount` to the account's experience as a single relative update.
    pub async fn award_exp(&self, account_id: Id, amount: i64) -> Result<(), GamificationError> {
        if amount <= 0 {
            return Err(GamificationError::InvalidAmount(amount));
        }
        self.repo.add_exp(account_id, amount).await?;
        Ok(())
    }

    /// Advisory awards for a new comment. Failures are logged and never undo
    /// the comment. Returns how many of the two awards landed.
    pub async fn reward_comment(&self, comment: &Comment, report_owner: Id) -> usize {
        let mut landed = 0;
        for account_id in [comment.account_id, report_owner] {
            match self.award_exp(account_id, COMMENT_EXP).await {
                Ok(()) => landed += 1,
                Err(e) => warn!(account_id, comment_id = comment.id, err = %e, "comment exp award failed"),
            }
        }
        landed
    }

    /// Top `limit` accounts by experience, ties broken by account id.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, GamificationError> {
        Ok(self.repo.top_by_exp(limit.min(MAX_LEADERBOARD)).await?)
    }

    /// `None` when the account does not exist.
    pub async fn rank(&self, account_id: Id) -> Result<Option<Rank>, GamificationError> {
        Ok(self.repo.rank_of(account_id).await?)
    }
}
