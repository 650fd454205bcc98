use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::{Role, WorkerStatus};

/// Durable record of a single agent, keyed by `agent_id` with
/// last-writer-wins semantics. The state blob is opaque to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStateRow {
    pub agent_id: String,
    pub role: Role,
    pub state: Vec<u8>,
    pub status: WorkerStatus,
    pub awakened_at: Option<DateTime<Utc>>,
    pub asleep_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence boundary for worker tools and agent state.
///
/// `search_posts` uses similarity matching in the Postgres implementation;
/// the in-memory store falls back to substring matching.
#[async_trait]
pub trait Storage: Send + Sync {
    // Content storage backing the persist tools.
    async fn save_post(&self, content: &str) -> Result<()>;
    async fn search_posts(&self, query: &str) -> Result<Vec<String>>;

    // Agent state rows.
    async fn save_agent_state(
        &self,
        agent_id: &str,
        state: &[u8],
        status: WorkerStatus,
        role: Role,
        awakened_at: Option<DateTime<Utc>>,
        asleep_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn get_agent_state(&self, agent_id: &str) -> Result<Vec<u8>>;
    async fn search_agents_by_status(&self, status: WorkerStatus) -> Result<Vec<AgentStateRow>>;

    async fn close(&self) -> Result<()>;
}
