//! Final-response fan-out over the pub/sub backbone.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Worker;

/// Broadcast topic every worker publishes its final response to, in addition
/// to its per-agent topic.
pub const AGENT_RESPONSE_GENERAL_TOPIC: &str = "agent_response";

/// Upper bound for a single publish before we give up and log.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-agent response topic: `<agent_id>_response`.
pub fn agent_response_topic(agent_id: &str) -> String {
    format!("{agent_id}_response")
}

/// Payload published when a worker reaches its terminal response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponseNotification {
    pub agent_id: String,
    pub response: String,
}

impl Worker {
    /// Publishes the final response to the per-agent topic and the general
    /// topic. Publish failures are logged and swallowed: the response still
    /// reaches the caller through the chat return value.
    pub(crate) async fn publish_final_response(&self, response: &str) {
        let agent_id = self.id();
        let notification = WorkerResponseNotification {
            agent_id: agent_id.clone(),
            response: response.to_string(),
        };
        let payload = match serde_json::to_string(&notification) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("worker {agent_id}: failed to encode final response: {err}");
                return;
            }
        };

        for topic in [agent_response_topic(&agent_id), AGENT_RESPONSE_GENERAL_TOPIC.to_string()] {
            if let Err(err) = self.pubsub.publish(&topic, &payload, PUBLISH_TIMEOUT).await {
                log::error!("worker {agent_id}: failed to publish response to {topic}: {err}");
            }
        }
    }
}
