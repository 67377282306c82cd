//! Match result persistence and global ranking recompute

use std::future::Future;

use serde::Serialize;
use uuid::Uuid;

use super::supabase::{SupabaseClient, SupabaseError};

/// Persistence seam for finished matches. Rooms report through this trait,
/// so the tick loop never depends on a live database connection.
pub trait ResultReporter: Send + Sync + 'static {
    /// Record one player's side of a finished match
    fn record_result(
        &self,
        user_id: Uuid,
        goals_for: u32,
        goals_against: u32,
        won: bool,
    ) -> impl Future<Output = Result<(), SupabaseError>> + Send;

    /// Re-rank every user from the updated aggregates
    fn recompute_rankings(&self) -> impl Future<Output = Result<(), SupabaseError>> + Send;
}

/// Arguments for the `record_match_result` Postgres function, which
/// atomically bumps match/win/loss counters and goal tallies for one user
#[derive(Debug, Clone, Serialize)]
struct RecordResultArgs {
    p_user_id: Uuid,
    p_goals_for: u32,
    p_goals_against: u32,
    p_won: bool,
}

/// Stats store: the match server's result reporter.
/// Both operations are idempotent-safe on the database side and best-effort
/// from the caller's point of view.
#[derive(Clone)]
pub struct StatsStore {
    client: SupabaseClient,
}

impl StatsStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

impl ResultReporter for StatsStore {
    async fn record_result(
        &self,
        user_id: Uuid,
        goals_for: u32,
        goals_against: u32,
        won: bool,
    ) -> Result<(), SupabaseError> {
        let args = RecordResultArgs {
            p_user_id: user_id,
            p_goals_for: goals_for,
            p_goals_against: goals_against,
            p_won: won,
        };
        self.client.rpc("record_match_result", &args).await
    }

    /// Re-rank every user by (has-played desc, wins desc, goal differential
    /// desc, id asc) and store the resulting position
    async fn recompute_rankings(&self) -> Result<(), SupabaseError> {
        self.client.rpc("recompute_rankings", &serde_json::json!({})).await
    }
}
