use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Invoked for every message delivered on a subscribed topic.
pub type OnMessageCallback = Arc<dyn Fn(String) -> Result<()> + Send + Sync>;

/// At-least-once topic publish plus topic subscribe. The core publishes
/// terminal responses to `<agent_id>_response` and the general fan-out
/// topic; consumers outside the control plane subscribe.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str, timeout: Duration) -> Result<()>;

    /// The subscription stays active until `unsubscribe` or `close`.
    async fn subscribe(&self, topic: &str, callback: OnMessageCallback) -> Result<()>;

    async fn unsubscribe(&self, topic: &str);

    /// Cancels every subscription and releases the transport.
    async fn close(&self) -> Result<()>;
}
