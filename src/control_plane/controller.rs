//! Fleet lifetime enforcement.
//!
//! The controller owns the tracker: it scans on an interval, evicts agents
//! that have gone asleep or terminated, and puts long-running agents to sleep
//! once their lifetime is up. After a stop command it keeps scanning until the
//! tracker drains, so shutdown waits for every agent to park its state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;
use crate::worker::{WorkerCommand, WorkerStatus};

use super::tracker::{AgentTracker, AgentTracking};
use crate::agents::Agent;

const CONTROL_CHANNEL_SIZE: usize = 10;
const SEND_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct AgentControllerConfig {
    pub scan_interval: Duration,
    pub agent_life_time: Duration,
    pub max_resp_ch_size: usize,
}

impl Default for AgentControllerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            agent_life_time: Duration::from_secs(5 * 60),
            max_resp_ch_size: 65536,
        }
    }
}

pub struct AgentController {
    config: AgentControllerConfig,
    tracker: Arc<dyn AgentTracker>,
    control_tx: mpsc::Sender<String>,
    control_rx: tokio::sync::Mutex<Option<mpsc::Receiver<String>>>,
    stop_requested: AtomicBool,
}

impl AgentController {
    pub fn new(config: AgentControllerConfig, tracker: Arc<dyn AgentTracker>) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        Self {
            config,
            tracker,
            control_tx,
            control_rx: tokio::sync::Mutex::new(Some(control_rx)),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &AgentControllerConfig {
        &self.config
    }

    /// Adds an agent to the tracker and returns its id. The status snapshot
    /// starts as running; scans refresh it from the agent.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<String> {
        let agent_id = agent.id();
        log::info!("controller: registering agent {agent_id}");
        self.tracker.add_tracking(
            &agent_id,
            AgentTracking {
                agent_id: agent_id.clone(),
                agent,
                status: WorkerStatus::Running,
                created_at: Utc::now(),
            },
        );
        Ok(agent_id)
    }

    /// Advisory status from the tracker snapshot.
    pub fn get_agent_status(&self, agent_id: &str) -> Result<WorkerStatus> {
        self.tracker
            .get_tracking(agent_id)
            .map(|tracking| tracking.status)
            .ok_or_else(|| anyhow::anyhow!("agent {agent_id} is not tracked"))
    }

    /// Queues a command for the scan loop, waiting up to three seconds for
    /// channel capacity.
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

    /// Runs the scan loop until cancellation or a completed stop drain.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        log::info!("controller: started");
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
                    log::info!("controller: cancelled");
                    return Err(ControlError::Canceled.into());
                }
                command = control_rx.recv() => match command.as_deref() {
                    None => return Err(ControlError::ChannelClosed.into()),
                    Some("stop") => {
                        log::info!("controller: stop requested, draining agents");
                        self.stop_requested.store(true, Ordering::SeqCst);
                    }
                    Some(other) => {
                        log::error!("controller: unknown command {other}");
                        return Err(ControlError::UnknownCommand(other.to_string()).into());
                    }
                },
                _ = ticker.tick() => {
                    if self.scan_agents().await {
                        log::info!("controller: all agents drained, stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One scan cycle. Returns true once a requested stop has fully drained
    /// the tracker.
    async fn scan_agents(&self) -> bool {
        let stopping = self.stop_requested.load(Ordering::SeqCst);
        let now = Utc::now();
        for tracking in self.tracker.all_trackings() {
            let tracked_for = now
                .signed_duration_since(tracking.created_at)
                .to_std()
                .unwrap_or_default();
            let status = tracking.agent.status();
            match status {
                WorkerStatus::Asleep | WorkerStatus::Terminated => {
                    // A just-registered agent reads as terminated until its
                    // loop starts; give it one scan interval before evicting.
                    if tracked_for < self.config.scan_interval {
                        continue;
                    }
                    log::info!(
                        "controller: agent {} is {status}, removing tracking",
                        tracking.agent_id
                    );
                    tracking.agent.close();
                    self.tracker.remove_tracking(&tracking.agent_id);
                }
                WorkerStatus::Running | WorkerStatus::Paused => {
                    if stopping || tracked_for > self.config.agent_life_time {
                        self.put_agent_to_sleep(&tracking).await;
                    }
                }
            }
        }
        stopping && self.tracker.all_trackings().is_empty()
    }

    /// Sends sleep and marks the snapshot asleep, keeping the original
    /// `created_at`. The snapshot is not refreshed from the agent here: a
    /// live read races the worker's own transition. Send failures are
    /// logged; the next scan retries.
    async fn put_agent_to_sleep(&self, tracking: &AgentTracking) {
        log::info!("controller: putting agent {} to sleep", tracking.agent_id);
        if let Err(err) = tracking.agent.send_command(WorkerCommand::Sleep).await {
            log::error!(
                "controller: failed to send sleep to agent {}: {err}",
                tracking.agent_id
            );
            return;
        }
        let mut updated = tracking.clone();
        updated.status = WorkerStatus::Asleep;
        self.tracker.update_tracking(&tracking.agent_id, updated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, BaseAgent};
    use crate::control_plane::tracker::MemoryAgentTracker;
    use crate::providers::mock::MockChatProvider;
    use crate::pubsub::InMemoryPubSub;
    use crate::storage::InMemoryStorage;
    use crate::worker::{Role, WorkerCallbacks, WorkerConfig};

    fn fast_controller(
        agent_life_time: Duration,
    ) -> (AgentController, Arc<MemoryAgentTracker>) {
        let tracker = Arc::new(MemoryAgentTracker::new());
        let controller = AgentController::new(
            AgentControllerConfig {
                scan_interval: Duration::from_millis(10),
                agent_life_time,
                max_resp_ch_size: 16,
            },
            tracker.clone(),
        );
        (controller, tracker)
    }

    fn idling_agent() -> Arc<BaseAgent> {
        Arc::new(BaseAgent::new(
            Role::Consumer,
            "keep busy",
            Arc::new(InMemoryStorage::new()),
            Arc::new(MockChatProvider::idling()),
            Arc::new(InMemoryPubSub::new()),
            WorkerConfig {
                tick_interval: Duration::from_millis(10),
                command_buffer: 10,
            },
        ))
    }

    #[tokio::test]
    async fn register_and_query_status() {
        let (controller, _tracker) = fast_controller(Duration::from_secs(300));
        let agent = idling_agent();
        let agent_id = controller.register_agent(agent).unwrap();
        assert_eq!(
            controller.get_agent_status(&agent_id).unwrap(),
            WorkerStatus::Running
        );
        assert!(controller.get_agent_status("missing").is_err());
    }

    #[tokio::test]
    async fn unknown_command_stops_the_loop_with_error() {
        let (controller, _tracker) = fast_controller(Duration::from_secs(300));
        let controller = Arc::new(controller);
        let cancel = CancellationToken::new();

        let loop_controller = controller.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move { loop_controller.start(&loop_cancel).await });

        controller.send_command("reboot").await.unwrap();
        let err = handle.await.unwrap().unwrap_err();
        match err.downcast_ref::<ControlError>() {
            Some(ControlError::UnknownCommand(cmd)) => assert_eq!(cmd, "reboot"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_agent_is_put_to_sleep_and_evicted() {
        let (controller, tracker) = fast_controller(Duration::from_millis(20));
        let controller = Arc::new(controller);
        let agent = idling_agent();
        let cancel = CancellationToken::new();

        let task_agent = agent.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = task_agent.start_task(&task_cancel, WorkerCallbacks::new()).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.register_agent(agent.clone()).unwrap();
        // Predate the tracking so the lifetime check fires immediately.
        let mut tracking = tracker.get_tracking(&agent.id()).unwrap();
        tracking.created_at = Utc::now() - chrono::Duration::seconds(10);
        tracker.update_tracking(&agent.id(), tracking);

        let loop_controller = controller.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move { loop_controller.start(&loop_cancel).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(agent.status(), WorkerStatus::Asleep);
        assert!(tracker.get_tracking(&agent.id()).is_none());

        cancel.cancel();
        let _ = handle.await.unwrap();
    }

    #[tokio::test]
    async fn sleep_dispatch_marks_snapshot_asleep_without_polling_the_worker() {
        let (controller, tracker) = fast_controller(Duration::from_secs(300));
        let agent = idling_agent();
        let cancel = CancellationToken::new();

        let task_agent = agent.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = task_agent.start_task(&task_cancel, WorkerCallbacks::new()).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let agent_id = controller.register_agent(agent.clone()).unwrap();
        let tracking = tracker.get_tracking(&agent_id).unwrap();
        let created_at = tracking.created_at;

        controller.put_agent_to_sleep(&tracking).await;

        // The snapshot flips as part of the dispatch itself, whether or not
        // the worker has processed the command yet.
        let updated = tracker.get_tracking(&agent_id).unwrap();
        assert_eq!(updated.status, WorkerStatus::Asleep);
        assert_eq!(updated.created_at, created_at);
        assert_eq!(
            controller.get_agent_status(&agent_id).unwrap(),
            WorkerStatus::Asleep
        );

        cancel.cancel();
    }

    #[tokio::test]
    async fn young_agent_stays_running_across_scans() {
        let (controller, tracker) = fast_controller(Duration::from_secs(300));
        let controller = Arc::new(controller);
        let storage = Arc::new(InMemoryStorage::new());
        let agent = Arc::new(BaseAgent::new(
            Role::Consumer,
            "keep busy",
            storage.clone(),
            Arc::new(MockChatProvider::idling()),
            Arc::new(InMemoryPubSub::new()),
            WorkerConfig {
                tick_interval: Duration::from_millis(10),
                command_buffer: 10,
            },
        ));
        let cancel = CancellationToken::new();

        let task_agent = agent.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = task_agent.start_task(&task_cancel, WorkerCallbacks::new()).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let agent_id = controller.register_agent(agent.clone()).unwrap();

        let loop_controller = controller.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move { loop_controller.start(&loop_cancel).await });

        // Well over a dozen scans while the agent is inside its lifetime and
        // no stop has been requested.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(agent.status(), WorkerStatus::Running);
        assert!(tracker.get_tracking(&agent_id).is_some());
        let row = storage.get_agent_row(&agent_id).unwrap();
        assert_eq!(row.status, WorkerStatus::Running);
        assert!(row.asleep_at.is_none());

        cancel.cancel();
        let _ = handle.await.unwrap();
    }

    #[tokio::test]
    async fn stop_drains_running_agents_and_returns_ok() {
        let (controller, tracker) = fast_controller(Duration::from_secs(300));
        let controller = Arc::new(controller);
        let cancel = CancellationToken::new();

        let agents: Vec<Arc<BaseAgent>> = (0..3).map(|_| idling_agent()).collect();
        for agent in &agents {
            let task_agent = agent.clone();
            let task_cancel = cancel.clone();
            tokio::spawn(async move {
                let _ = task_agent.start_task(&task_cancel, WorkerCallbacks::new()).await;
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        for agent in &agents {
            controller.register_agent(agent.clone()).unwrap();
        }

        let loop_controller = controller.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move { loop_controller.start(&loop_cancel).await });

        controller.send_command("stop").await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("controller should drain")
            .unwrap()
            .unwrap();

        for agent in &agents {
            assert_eq!(agent.status(), WorkerStatus::Asleep);
        }
        assert!(tracker.all_trackings().is_empty());
    }
}
