//! Reanimation of dormant agents.
//!
//! The scheduler scans persisted agent rows for workers that have slept past
//! the dormancy threshold and hands each discovery to a callback, exactly
//! once per sleep. Waking the agent back up is the callback's business.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;
use crate::storage::{AgentStateRow, Storage};
use crate::worker::WorkerStatus;

const CONTROL_CHANNEL_SIZE: usize = 10;
const SEND_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    /// How long an agent must have been asleep before it is woken.
    pub dormancy_threshold: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            dormancy_threshold: Duration::from_secs(10),
        }
    }
}

pub type OnAgentFound = Arc<dyn Fn(String, AgentStateRow) + Send + Sync>;

pub struct Scheduler {
    config: SchedulerConfig,
    storage: Arc<dyn Storage>,
    callback: RwLock<Option<OnAgentFound>>,
    control_tx: mpsc::Sender<String>,
    control_rx: tokio::sync::Mutex<Option<mpsc::Receiver<String>>>,
    /// `agent_id -> asleep_at` of the last dispatched discovery. A row is
    /// re-dispatched only when it goes to sleep again.
    dispatched: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, storage: Arc<dyn Storage>) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        Self {
            config,
            storage,
            callback: RwLock::new(None),
            control_tx,
            control_rx: tokio::sync::Mutex::new(Some(control_rx)),
            dispatched: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_callback(&self, callback: OnAgentFound) {
        let mut slot = self.callback.write().unwrap();
        if slot.is_some() {
            log::warn!("scheduler: overriding existing callback");
        }
        *slot = Some(callback);
    }

    pub async fn send_command(&self, command: &str) -> Result<()> {
        match self
            .control_tx
            .send_timeout(command.to_string(), SEND_COMMAND_TIMEOUT)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(ControlError::TimedOut.into()),
            Err(SendTimeoutError::Closed(_)) => Err(ControlError::ChannelClosed.into()),
        }
    }

    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        log::info!("scheduler: started");
        let mut control_rx = self
            .control_rx
            .lock()
            .await
            .take()
            .ok_or(ControlError::ChannelClosed)?;
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("scheduler: cancelled");
                    return Err(ControlError::Canceled.into());
                }
                command = control_rx.recv() => match command.as_deref() {
                    None => return Err(ControlError::ChannelClosed.into()),
                    Some("stop") => {
                        log::info!("scheduler: stopping");
                        return Ok(());
                    }
                    Some(other) => log::warn!("scheduler: unknown command {other}"),
                },
                _ = ticker.tick() => self.search_agents().await?,
            }
        }
    }

    async fn search_agents(&self) -> Result<()> {
        let rows = self
            .storage
            .search_agents_by_status(WorkerStatus::Asleep)
            .await?;
        {
            // Keep the ledger bounded by the asleep set: once a row wakes up
            // (or sleeps again with a new timestamp) its old entry is stale.
            let mut dispatched = self.dispatched.lock().unwrap();
            dispatched.retain(|agent_id, asleep_at| {
                rows.iter()
                    .any(|row| row.agent_id == *agent_id && row.asleep_at == Some(*asleep_at))
            });
        }
        let callback = self.callback.read().unwrap().clone();
        let deadline = Utc::now();
        for row in rows {
            let Some(asleep_at) = row.asleep_at else {
                continue;
            };
            let dormant_for = deadline.signed_duration_since(asleep_at);
            if dormant_for.to_std().map_or(true, |elapsed| {
                elapsed < self.config.dormancy_threshold
            }) {
                continue;
            }
            {
                let mut dispatched = self.dispatched.lock().unwrap();
                if dispatched.get(&row.agent_id) == Some(&asleep_at) {
                    continue;
                }
                dispatched.insert(row.agent_id.clone(), asleep_at);
            }
            let Some(callback) = callback.as_ref() else {
                log::warn!("scheduler: no callback set, skipping agent {}", row.agent_id);
                continue;
            };
            log::info!("scheduler: waking agent {}", row.agent_id);
            callback(row.agent_id.clone(), row);
        }
        Ok(())
    }
}
