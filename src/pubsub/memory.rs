use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::pubsub::traits::{OnMessageCallback, PubSub};

const TOPIC_CAPACITY: usize = 1024;

/// In-process broker backed by per-topic broadcast channels. Matches the
/// external-broker contract closely enough that tests and the CLI run
/// without any infrastructure.
pub struct InMemoryPubSub {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, topic: &str, payload: &str, _timeout: Duration) -> Result<()> {
        let sender = self.sender_for(topic);
        // A send error only means nobody is subscribed right now.
        let _ = sender.send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: OnMessageCallback) -> Result<()> {
        let mut receiver = self.sender_for(topic).subscribe();
        let token = CancellationToken::new();

        {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            if let Some(previous) = subscriptions.insert(topic.to_string(), token.clone()) {
                previous.cancel();
            }
        }

        let topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        log::info!("pubsub: subscription to {} canceled", topic);
                        return;
                    }
                    message = receiver.recv() => match message {
                        Ok(payload) => {
                            if let Err(err) = callback(payload) {
                                log::error!("pubsub: callback error on {}: {}", topic, err);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("pubsub: subscriber lagged on {}, skipped {}", topic, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if let Some(token) = subscriptions.remove(topic) {
            token.cancel();
        }
    }

    async fn close(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        for (_, token) in subscriptions.drain() {
            token.cancel();
        }
        Ok(())
    }
}
