//! Composition root for the control plane.
//!
//! The facade owns the controller and the scheduler, wires the scheduler's
//! discoveries into a resume path, and bridges terminal agent responses to
//! caller-supplied callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentFactory};
use crate::error::ControlError;
use crate::providers::ChatProvider;
use crate::pubsub::PubSub;
use crate::storage::{AgentStateRow, Storage};
use crate::worker::{Role, WorkerCallbacks, WorkerConfig};

use super::controller::AgentController;
use super::scheduler::Scheduler;

const SEND_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPlaneEvent {
    AgentFinalResponse,
}

/// Invoked with `(agent_id, response)` when an agent reports.
pub type OnAgentFinalResponse = Arc<dyn Fn(String, String) + Send + Sync>;

pub type ControlPlaneCallbacks = HashMap<ControlPlaneEvent, OnAgentFinalResponse>;

pub struct ControlPlane {
    factory: Arc<dyn AgentFactory>,
    storage: Arc<dyn Storage>,
    provider: Arc<dyn ChatProvider>,
    pubsub: Arc<dyn PubSub>,
    controller: Arc<AgentController>,
    scheduler: Arc<Scheduler>,
    callbacks: ControlPlaneCallbacks,
    worker_callbacks: WorkerCallbacks,
    worker_config: WorkerConfig,
    control_tx: mpsc::Sender<String>,
    control_rx: tokio::sync::Mutex<Option<mpsc::Receiver<String>>>,
    // The stop command is handled once; later commands are dropped.
    stop_cmd_sent: AtomicBool,
}

impl ControlPlane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<dyn AgentFactory>,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ChatProvider>,
        pubsub: Arc<dyn PubSub>,
        controller: Arc<AgentController>,
        scheduler: Arc<Scheduler>,
        callbacks: ControlPlaneCallbacks,
        worker_callbacks: WorkerCallbacks,
        worker_config: WorkerConfig,
    ) -> Self {
        // The facade channel absorbs command bursts; its capacity comes from
        // the controller config.
        let capacity = controller.config().max_resp_ch_size.max(1);
        let (control_tx, control_rx) = mpsc::channel(capacity);
        Self {
            factory,
            storage,
            provider,
            pubsub,
            controller,
            scheduler,
            callbacks,
            worker_callbacks,
            worker_config,
            control_tx,
            control_rx: tokio::sync::Mutex::new(Some(control_rx)),
            stop_cmd_sent: AtomicBool::new(false),
        }
    }

    /// Runs the plane until cancellation or a stop command. On stop, forwards
    /// stop to the controller and the scheduler, then waits for both to
    /// finish; the controller only finishes once every agent has drained.
    pub async fn start(self: Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        log::info!("control plane: starting");
        let mut control_rx = self
            .control_rx
            .lock()
            .await
            .take()
            .ok_or(ControlError::ChannelClosed)?;

        let plane = self.clone();
        let resume_cancel = cancel.clone();
        self.scheduler.set_callback(Arc::new(move |agent_id, row| {
            let plane = plane.clone();
            let cancel = resume_cancel.clone();
            tokio::spawn(async move {
                if let Err(err) = plane.resume_agent(&cancel, &agent_id, row, None).await {
                    log::error!("control plane: failed to resume agent {agent_id}: {err}");
                }
            });
        }));

        let controller = self.controller.clone();
        let controller_cancel = cancel.clone();
        let controller_handle = tokio::spawn(async move {
            if let Err(err) = controller.start(&controller_cancel).await {
                log::error!("control plane: controller exited with error: {err}");
            }
        });
        let scheduler = self.scheduler.clone();
        let scheduler_cancel = cancel.clone();
        let scheduler_handle = tokio::spawn(async move {
            if let Err(err) = scheduler.start(&scheduler_cancel).await {
                log::error!("control plane: scheduler exited with error: {err}");
            }
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("control plane: cancelled");
                    return Err(ControlError::Canceled.into());
                }
                command = control_rx.recv() => match command.as_deref() {
                    None => return Err(ControlError::ChannelClosed.into()),
                    Some("stop") => {
                        log::info!("control plane: stopping");
                        self.stop_cmd_sent.store(true, Ordering::SeqCst);
                        if let Err(err) = self.controller.send_command("stop").await {
                            log::error!("control plane: failed to stop controller: {err}");
                        }
                        if let Err(err) = self.scheduler.send_command("stop").await {
                            log::error!("control plane: failed to stop scheduler: {err}");
                        }
                        break;
                    }
                    Some(other) => log::warn!("control plane: unknown command {other}"),
                },
            }
        }

        // The controller only returns once all agents are asleep or gone.
        let _ = controller_handle.await;
        let _ = scheduler_handle.await;
        log::info!("control plane: stopped");
        Ok(())
    }

    /// Creates an agent for the task, registers it, and starts it in the
    /// background. Returns the agent id. An invalid role fails before any
    /// side effect.
    pub fn kickoff_task(
        &self,
        cancel: &CancellationToken,
        task: &str,
        role: &str,
    ) -> Result<String> {
        let role: Role = role.parse()?;
        log::info!("control plane: kicking off {role} task");
        let agent = self.new_agent(role, task)?;
        let agent_id = agent.id();

        let worker_callbacks = self.worker_callbacks.clone();
        let hook = self.final_response_hook();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match agent.start_task(&cancel, worker_callbacks).await {
                Ok(Some(response)) => fire_final_response(&hook, response.id, response.message),
                Ok(None) => log::info!("control plane: agent stopped without a final response"),
                Err(err) => log::error!("control plane: agent task failed: {err}"),
            }
        });
        Ok(agent_id)
    }

    /// Queues a command for the facade loop. Ignored once stop was handled.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        if self.stop_cmd_sent.load(Ordering::SeqCst) {
            log::warn!("control plane: stop already sent, ignoring {command}");
            return Ok(());
        }
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

    fn new_agent(&self, role: Role, task: &str) -> Result<Arc<dyn Agent>> {
        let agent = self.factory.create_agent(
            role,
            task,
            self.storage.clone(),
            self.provider.clone(),
            self.pubsub.clone(),
            self.worker_config.clone(),
        );
        self.controller.register_agent(agent.clone())?;
        Ok(agent)
    }

    async fn resume_agent(
        &self,
        cancel: &CancellationToken,
        agent_id: &str,
        row: AgentStateRow,
        new_prompt: Option<String>,
    ) -> Result<()> {
        log::info!("control plane: resuming agent {agent_id}");
        let agent = self.new_agent(row.role, "")?;
        let worker_callbacks = self.worker_callbacks.clone();
        let hook = self.final_response_hook();
        let cancel = cancel.clone();
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            let result = agent
                .resume_task(&cancel, &agent_id, new_prompt.as_deref(), worker_callbacks)
                .await;
            match result {
                Ok(Some(response)) => fire_final_response(&hook, response.id, response.message),
                Ok(None) => log::info!("control plane: resumed agent {agent_id} went back to sleep"),
                Err(err) => log::error!("control plane: resumed agent {agent_id} failed: {err}"),
            }
        });
        Ok(())
    }

    fn final_response_hook(&self) -> Option<OnAgentFinalResponse> {
        self.callbacks
            .get(&ControlPlaneEvent::AgentFinalResponse)
            .cloned()
    }
}

fn fire_final_response(hook: &Option<OnAgentFinalResponse>, agent_id: String, message: String) {
    log::info!("control plane: agent {agent_id} final response");
    match hook {
        Some(callback) => callback(agent_id, message),
        None => log::error!("control plane: no final response callback set"),
    }
}
