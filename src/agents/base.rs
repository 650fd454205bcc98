use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Agent, AgentResponse};
use crate::providers::ChatProvider;
use crate::pubsub::PubSub;
use crate::storage::Storage;
use crate::worker::{Role, Worker, WorkerCallbacks, WorkerCommand, WorkerConfig, WorkerStatus};

/// The one concrete agent. Publishers and consumers differ only in role;
/// everything behavioral lives in the task prompt and the worker.
pub struct BaseAgent {
    worker: Arc<Worker>,
    task: String,
}

impl BaseAgent {
    pub fn new(
        role: Role,
        task: impl Into<String>,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ChatProvider>,
        pubsub: Arc<dyn PubSub>,
        config: WorkerConfig,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            worker: Arc::new(Worker::new(id, role, storage, provider, pubsub, config)),
            task: task.into(),
        }
    }

    pub fn publisher(
        task: impl Into<String>,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ChatProvider>,
        pubsub: Arc<dyn PubSub>,
        config: WorkerConfig,
    ) -> Self {
        Self::new(Role::Publisher, task, storage, provider, pubsub, config)
    }

    pub fn consumer(
        task: impl Into<String>,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ChatProvider>,
        pubsub: Arc<dyn PubSub>,
        config: WorkerConfig,
    ) -> Self {
        Self::new(Role::Consumer, task, storage, provider, pubsub, config)
    }

    fn response(&self, message: String) -> Option<AgentResponse> {
        if message.is_empty() {
            return None;
        }
        Some(AgentResponse {
            id: self.id(),
            role: self.role(),
            message,
        })
    }
}

#[async_trait]
impl Agent for BaseAgent {
    fn id(&self) -> String {
        self.worker.id()
    }

    fn role(&self) -> Role {
        self.worker.role()
    }

    fn status(&self) -> WorkerStatus {
        self.worker.get_status()
    }

    async fn start_task(
        &self,
        cancel: &CancellationToken,
        callbacks: WorkerCallbacks,
    ) -> Result<Option<AgentResponse>> {
        log::info!("agent {} ({}): starting task", self.id(), self.role());
        let message = self.worker.chat(cancel, &self.task, callbacks).await?;
        log::info!("agent {} ({}): task finished", self.id(), self.role());
        Ok(self.response(message))
    }

    async fn resume_task(
        &self,
        cancel: &CancellationToken,
        agent_id: &str,
        new_prompt: Option<&str>,
        callbacks: WorkerCallbacks,
    ) -> Result<Option<AgentResponse>> {
        log::info!("agent {agent_id}: resuming task");
        self.worker.restore_state(agent_id).await?;
        let message = self.worker.resume_chat(cancel, new_prompt, callbacks).await?;
        Ok(self.response(message))
    }

    async fn send_command(&self, command: WorkerCommand) -> Result<()> {
        self.worker.send_command(command).await
    }

    async fn persist_state(&self) -> Result<()> {
        self.worker.persist_state().await
    }

    fn close(&self) {
        self.worker.close();
    }
}
