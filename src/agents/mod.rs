//! Agent abstraction over workers.
//!
//! An agent is the control plane's unit of tracking: a role, an id, a task,
//! and a worker that does the actual chatting. [`BaseAgent`] is the concrete
//! implementation; the [`AgentFactory`] seam lets tests substitute their own.

pub mod base;
pub mod factory;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::worker::{Role, WorkerCallbacks, WorkerCommand, WorkerStatus};

pub use base::BaseAgent;
pub use factory::{AgentFactory, RealAgentFactory};

/// What an agent hands back when its task reaches a terminal response.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub id: String,
    pub role: Role,
    pub message: String,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> String;
    fn role(&self) -> Role;
    fn status(&self) -> WorkerStatus;

    /// Runs the agent's task from scratch. Returns `None` when the worker
    /// stopped without a terminal response (slept or terminated externally).
    async fn start_task(
        &self,
        cancel: &CancellationToken,
        callbacks: WorkerCallbacks,
    ) -> Result<Option<AgentResponse>>;

    /// Restores a persisted agent and continues its task, optionally with an
    /// additional user prompt.
    async fn resume_task(
        &self,
        cancel: &CancellationToken,
        agent_id: &str,
        new_prompt: Option<&str>,
        callbacks: WorkerCallbacks,
    ) -> Result<Option<AgentResponse>>;

    async fn send_command(&self, command: WorkerCommand) -> Result<()>;
    async fn persist_state(&self) -> Result<()>;
    fn close(&self);
}
