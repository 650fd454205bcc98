use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::agents::Agent;
use crate::worker::WorkerStatus;

/// One tracked agent. `status` is an advisory snapshot taken at the last
/// tracker write; the agent itself is the authority.
#[derive(Clone)]
pub struct AgentTracking {
    pub agent_id: String,
    pub agent: Arc<dyn Agent>,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
}

/// Implementations must be safe to share across the controller loop and the
/// kickoff path.
pub trait AgentTracker: Send + Sync {
    fn add_tracking(&self, agent_id: &str, tracking: AgentTracking);
    fn get_tracking(&self, agent_id: &str) -> Option<AgentTracking>;
    fn update_tracking(&self, agent_id: &str, tracking: AgentTracking);
    fn remove_tracking(&self, agent_id: &str);
    fn all_trackings(&self) -> Vec<AgentTracking>;
}

#[derive(Default)]
pub struct MemoryAgentTracker {
    trackings: RwLock<HashMap<String, AgentTracking>>,
}

impl MemoryAgentTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentTracker for MemoryAgentTracker {
    fn add_tracking(&self, agent_id: &str, tracking: AgentTracking) {
        self.trackings
            .write()
            .unwrap()
            .insert(agent_id.to_string(), tracking);
    }

    fn get_tracking(&self, agent_id: &str) -> Option<AgentTracking> {
        self.trackings.read().unwrap().get(agent_id).cloned()
    }

    fn update_tracking(&self, agent_id: &str, tracking: AgentTracking) {
        self.trackings
            .write()
            .unwrap()
            .insert(agent_id.to_string(), tracking);
    }

    fn remove_tracking(&self, agent_id: &str) {
        self.trackings.write().unwrap().remove(agent_id);
    }

    fn all_trackings(&self) -> Vec<AgentTracking> {
        self.trackings.read().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::BaseAgent;
    use crate::providers::mock::MockChatProvider;
    use crate::pubsub::InMemoryPubSub;
    use crate::storage::InMemoryStorage;
    use crate::worker::{Role, WorkerConfig};

    fn tracking(agent_id: &str) -> AgentTracking {
        let agent = BaseAgent::new(
            Role::Consumer,
            "task",
            Arc::new(InMemoryStorage::new()),
            Arc::new(MockChatProvider::idling()),
            Arc::new(InMemoryPubSub::new()),
            WorkerConfig::default(),
        );
        AgentTracking {
            agent_id: agent_id.to_string(),
            agent: Arc::new(agent),
            status: WorkerStatus::Running,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn add_get_update_remove() {
        let tracker = MemoryAgentTracker::new();
        tracker.add_tracking("a1", tracking("a1"));

        let got = tracker.get_tracking("a1").unwrap();
        assert_eq!(got.agent_id, "a1");
        assert_eq!(got.status, WorkerStatus::Running);

        let mut updated = got.clone();
        updated.status = WorkerStatus::Asleep;
        tracker.update_tracking("a1", updated);
        assert_eq!(
            tracker.get_tracking("a1").unwrap().status,
            WorkerStatus::Asleep
        );

        tracker.remove_tracking("a1");
        assert!(tracker.get_tracking("a1").is_none());
        assert!(tracker.all_trackings().is_empty());
    }

    #[test]
    fn all_trackings_lists_every_agent() {
        let tracker = MemoryAgentTracker::new();
        tracker.add_tracking("a1", tracking("a1"));
        tracker.add_tracking("a2", tracking("a2"));
        let mut ids: Vec<String> = tracker
            .all_trackings()
            .into_iter()
            .map(|t| t.agent_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a1", "a2"]);
    }
}
