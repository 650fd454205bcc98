use std::sync::Arc;

use crate::providers::ChatProvider;
use crate::pubsub::PubSub;
use crate::storage::Storage;
use crate::worker::{Role, WorkerConfig};

use super::{Agent, BaseAgent};

/// Seam for constructing agents, so the control plane can be exercised with
/// doubles in tests.
pub trait AgentFactory: Send + Sync {
    fn create_agent(
        &self,
        role: Role,
        task: &str,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ChatProvider>,
        pubsub: Arc<dyn PubSub>,
        config: WorkerConfig,
    ) -> Arc<dyn Agent>;
}

pub struct RealAgentFactory;

impl AgentFactory for RealAgentFactory {
    fn create_agent(
        &self,
        role: Role,
        task: &str,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ChatProvider>,
        pubsub: Arc<dyn PubSub>,
        config: WorkerConfig,
    ) -> Arc<dyn Agent> {
        Arc::new(BaseAgent::new(role, task, storage, provider, pubsub, config))
    }
}
