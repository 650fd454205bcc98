use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::storage::traits::{AgentStateRow, Storage};
use crate::worker::{Role, WorkerStatus};

/// Similarity cutoff for pg_trgm post search.
const SEARCH_SIMILARITY_THRESHOLD: f32 = 0.3;

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables and the pg_trgm extension if they are missing.
    /// Schema migration tooling proper lives outside this crate.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BIGSERIAL PRIMARY KEY,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_states (
                agent_id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                state BYTEA NOT NULL,
                status TEXT NOT NULL,
                awakened_at TIMESTAMPTZ,
                asleep_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_agent_state(row: &sqlx::postgres::PgRow) -> Result<AgentStateRow> {
        let role_str: String = row.get("role");
        let status_str: String = row.get("status");
        Ok(AgentStateRow {
            agent_id: row.get("agent_id"),
            role: Role::from_str(&role_str)?,
            state: row.get("state"),
            status: WorkerStatus::from_str(&status_str)?,
            awakened_at: row.get("awakened_at"),
            asleep_at: row.get("asleep_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn save_post(&self, content: &str) -> Result<()> {
        sqlx::query("INSERT INTO posts (content) VALUES ($1)")
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_posts(&self, query: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT content
            FROM posts
            WHERE similarity(content, $1) > $2
            ORDER BY similarity(content, $1) DESC
            "#,
        )
        .bind(query)
        .bind(SEARCH_SIMILARITY_THRESHOLD)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("content")).collect())
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
        sqlx::query(
            r#"
            INSERT INTO agent_states (agent_id, role, state, status, awakened_at, asleep_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (agent_id) DO UPDATE
            SET role = $2, state = $3, status = $4, awakened_at = $5, asleep_at = $6, updated_at = NOW()
            "#,
        )
        .bind(agent_id)
        .bind(role.as_str())
        .bind(state)
        .bind(status.as_str())
        .bind(awakened_at)
        .bind(asleep_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent_state(&self, agent_id: &str) -> Result<Vec<u8>> {
        let row = sqlx::query("SELECT state FROM agent_states WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("state"))
    }

    async fn search_agents_by_status(&self, status: WorkerStatus) -> Result<Vec<AgentStateRow>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id, role, state, status, awakened_at, asleep_at, created_at, updated_at
            FROM agent_states
            WHERE status = $1
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_agent_state).collect()
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
