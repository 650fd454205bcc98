use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::traits::{AgentStateRow, Storage};
use crate::worker::{Role, WorkerStatus};

/// In-memory store used by tests and the CLI playground. Post search is a
/// plain substring match.
pub struct InMemoryStorage {
    posts: RwLock<Vec<String>>,
    agents: RwLock<HashMap<String, AgentStateRow>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            posts: RwLock::new(Vec::new()),
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a row directly, bypassing the timestamp bookkeeping. Used to
    /// stage dormant agents in tests.
    pub fn seed_agent_row(&self, row: AgentStateRow) {
        let mut agents = self.agents.write().unwrap();
        agents.insert(row.agent_id.clone(), row);
    }

    pub fn get_agent_row(&self, agent_id: &str) -> Option<AgentStateRow> {
        let agents = self.agents.read().unwrap();
        agents.get(agent_id).cloned()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_post(&self, content: &str) -> Result<()> {
        let mut posts = self.posts.write().unwrap();
        posts.push(content.to_string());
        Ok(())
    }

    async fn search_posts(&self, query: &str) -> Result<Vec<String>> {
        let posts = self.posts.read().unwrap();
        Ok(posts
            .iter()
            .filter(|p| p.contains(query))
            .cloned()
            .collect())
    }

    async fn save_agent_state(
        &self,
        agent_id: &str,
        state: &[u8],
        status: WorkerStatus,
        role: Role,
        awakened_at: Option<DateTime<Utc>>,
        asleep_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        let now = Utc::now();
        let created_at = agents
            .get(agent_id)
            .map(|row| row.created_at)
            .unwrap_or(now);
        agents.insert(
            agent_id.to_string(),
            AgentStateRow {
                agent_id: agent_id.to_string(),
                role,
                state: state.to_vec(),
                status,
                awakened_at,
                asleep_at,
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get_agent_state(&self, agent_id: &str) -> Result<Vec<u8>> {
        let agents = self.agents.read().unwrap();
        agents
            .get(agent_id)
            .map(|row| row.state.clone())
            .ok_or_else(|| anyhow!("agent state not found: {}", agent_id))
    }

    async fn search_agents_by_status(&self, status: WorkerStatus) -> Result<Vec<AgentStateRow>> {
        let agents = self.agents.read().unwrap();
        Ok(agents
            .values()
            .filter(|row| row.status == status)
            .cloned()
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
