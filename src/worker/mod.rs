//! Long-lived tool-use worker driving a single agent's chat loop.
//!
//! A worker owns the conversation transcript and a state machine, and runs a
//! ticker-driven loop: on each tick it takes one model turn, executes any tool
//! calls, and finishes when the model calls the `report` tool. External
//! commands (pause, resume, sleep, terminate) arrive over a bounded channel
//! and are applied between turns, never mid-turn.

pub mod notification;
pub mod prompt;
pub mod state_machine;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;
use crate::providers::{ChatMessage, ChatProvider};
use crate::pubsub::PubSub;
use crate::storage::Storage;
use crate::tools::{ToolRegistry, REPORT_TOOL_NAME};

pub use state_machine::{Role, StateMachine, Transition, WorkerCommand, WorkerStatus};

/// Lifecycle events a caller can hook into. Each fires after the
/// corresponding transition has been applied (and, for sleep/terminate,
/// after the state has been persisted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerEvent {
    OnPause,
    OnResume,
    OnSleep,
    OnTerminate,
}

/// Callback invoked with the worker id and the status just entered.
pub type CommandCallback = Arc<dyn Fn(String, WorkerStatus) + Send + Sync>;

pub type WorkerCallbacks = HashMap<WorkerEvent, CommandCallback>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between model turns.
    pub tick_interval: Duration,
    /// Capacity of the command channel.
    pub command_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            command_buffer: 10,
        }
    }
}

/// The persistable part of a worker: identity plus transcript. Serialized
/// as JSON into the agent state row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkerState {
    id: String,
    role: Role,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

pub struct Worker {
    state: RwLock<WorkerState>,
    fsm: StateMachine,
    callbacks: RwLock<WorkerCallbacks>,
    provider: Arc<dyn ChatProvider>,
    storage: Arc<dyn Storage>,
    pubsub: Arc<dyn PubSub>,
    tools: ToolRegistry,
    cmd_tx: Mutex<Option<mpsc::Sender<WorkerCommand>>>,
    cmd_rx: tokio::sync::Mutex<Option<mpsc::Receiver<WorkerCommand>>>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        role: Role,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ChatProvider>,
        pubsub: Arc<dyn PubSub>,
        config: WorkerConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        Self {
            state: RwLock::new(WorkerState {
                id: id.into(),
                role,
                messages: Vec::new(),
            }),
            fsm: StateMachine::new(),
            callbacks: RwLock::new(WorkerCallbacks::new()),
            tools: ToolRegistry::new(storage.clone()),
            provider,
            storage,
            pubsub,
            cmd_tx: Mutex::new(Some(cmd_tx)),
            cmd_rx: tokio::sync::Mutex::new(Some(cmd_rx)),
            config,
        }
    }

    pub fn id(&self) -> String {
        self.state.read().unwrap().id.clone()
    }

    pub fn role(&self) -> Role {
        self.state.read().unwrap().role
    }

    /// Current status; a worker whose loop never started reads as terminated.
    pub fn get_status(&self) -> WorkerStatus {
        self.fsm.current()
    }

    /// Runs the task to completion: seeds the transcript with the system
    /// prompt and the task prompt, marks the worker running, and drives the
    /// ticker loop until a terminal response or a terminal command.
    ///
    /// Returns the final response on `report`, an empty string when the
    /// worker was put to sleep or terminated externally, or an error when
    /// the token was cancelled or the command channel was torn down.
    pub async fn chat(
        &self,
        cancel: &CancellationToken,
        task_prompt: &str,
        callbacks: WorkerCallbacks,
    ) -> Result<String> {
        *self.callbacks.write().unwrap() = callbacks;
        self.fsm.start();
        {
            let mut state = self.state.write().unwrap();
            state.messages = vec![
                ChatMessage::system(prompt::SYSTEM_PROMPT),
                ChatMessage::user(task_prompt),
            ];
        }
        if let Err(err) = self.persist_state().await {
            log::error!("worker {}: failed to persist initial state: {err}", self.id());
        }
        self.run_with_flow_control(cancel).await
    }

    /// Continues a previously restored transcript. An optional new prompt is
    /// appended as a user message before the loop resumes.
    pub async fn resume_chat(
        &self,
        cancel: &CancellationToken,
        new_prompt: Option<&str>,
        callbacks: WorkerCallbacks,
    ) -> Result<String> {
        *self.callbacks.write().unwrap() = callbacks;
        self.fsm.start();
        if let Some(new_prompt) = new_prompt {
            self.append_message(ChatMessage::user(new_prompt));
        }
        if let Err(err) = self.persist_state().await {
            log::error!("worker {}: failed to persist resumed state: {err}", self.id());
        }
        self.run_with_flow_control(cancel).await
    }

    async fn run_with_flow_control(&self, cancel: &CancellationToken) -> Result<String> {
        let mut cmd_rx = self
            .cmd_rx
            .lock()
            .await
            .take()
            .ok_or(ControlError::ChannelClosed)?;
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("worker {}: cancelled", self.id());
                    return Err(ControlError::Canceled.into());
                }
                command = cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Closure after sleep/terminate is a normal shutdown.
                    None if self.get_status().is_terminal() => return Ok(String::new()),
                    None => return Err(ControlError::ChannelClosed.into()),
                },
                _ = ticker.tick() => match self.get_status() {
                    WorkerStatus::Running => {
                        if let Some(response) = self.run_turn().await {
                            self.finish(&response).await;
                            return Ok(response);
                        }
                    }
                    WorkerStatus::Paused => {}
                    WorkerStatus::Asleep | WorkerStatus::Terminated => {
                        return Ok(String::new());
                    }
                },
            }
        }
    }

    /// One model turn: snapshot the transcript, ask the provider, record the
    /// assistant message, then execute tool calls in order. Returns the final
    /// response once the model calls `report`.
    async fn run_turn(&self) -> Option<String> {
        let snapshot = self.state.read().unwrap().messages.clone();
        let response = match self.provider.chat(&snapshot).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("worker {}: chat provider error: {err}", self.id());
                return None;
            }
        };

        self.append_message(ChatMessage::assistant(
            response.content.clone(),
            response.tool_calls.first().cloned(),
        ));

        let mut final_response = None;
        for call in &response.tool_calls {
            let result = self.tools.dispatch(call).await;
            self.append_message(ChatMessage::tool(&result, call.clone()));
            if call.function_name == REPORT_TOOL_NAME {
                final_response = Some(result);
                break;
            }
        }
        final_response
    }

    /// Publishes the terminal response, then terminates and persists. The
    /// publish deliberately precedes the terminated persist so subscribers
    /// observe the response before the row goes terminal.
    async fn finish(&self, response: &str) {
        self.publish_final_response(response).await;
        match self.fsm.transition(WorkerCommand::Terminate) {
            Ok(transition) => {
                log::info!(
                    "worker {}: task complete, {} -> {}",
                    self.id(),
                    transition.from,
                    transition.to
                );
                if let Err(err) = self.persist_state().await {
                    log::error!("worker {}: failed to persist terminal state: {err}", self.id());
                }
                self.fire_callback(WorkerEvent::OnTerminate, WorkerStatus::Terminated);
            }
            Err(err) => log::error!("worker {}: terminal transition failed: {err}", self.id()),
        }
    }

    async fn handle_command(&self, command: WorkerCommand) {
        let transition = match self.fsm.transition(command) {
            Ok(transition) => transition,
            Err(err) => {
                log::error!("worker {}: rejected {command}: {err}", self.id());
                return;
            }
        };
        log::info!(
            "worker {}: {command} applied, {} -> {}",
            self.id(),
            transition.from,
            transition.to
        );
        if transition.from == transition.to {
            // Self-loop (asleep -> asleep): nothing to persist or announce.
            return;
        }
        match transition.to {
            WorkerStatus::Paused => self.fire_callback(WorkerEvent::OnPause, WorkerStatus::Paused),
            WorkerStatus::Running => {
                self.fire_callback(WorkerEvent::OnResume, WorkerStatus::Running)
            }
            WorkerStatus::Asleep => {
                if let Err(err) = self.persist_state().await {
                    log::error!("worker {}: failed to persist asleep state: {err}", self.id());
                }
                self.fire_callback(WorkerEvent::OnSleep, WorkerStatus::Asleep);
            }
            WorkerStatus::Terminated => {
                if let Err(err) = self.persist_state().await {
                    log::error!("worker {}: failed to persist terminated state: {err}", self.id());
                }
                self.fire_callback(WorkerEvent::OnTerminate, WorkerStatus::Terminated);
            }
        }
    }

    fn fire_callback(&self, event: WorkerEvent, status: WorkerStatus) {
        let callback = self.callbacks.read().unwrap().get(&event).cloned();
        if let Some(callback) = callback {
            callback(self.id(), status);
        }
    }

    /// Queues a command for the loop. A no-op for terminal workers; otherwise
    /// waits up to three tick intervals for channel capacity before giving up
    /// with [`ControlError::TimedOut`].
    pub async fn send_command(&self, command: WorkerCommand) -> Result<()> {
        if self.get_status().is_terminal() {
            log::warn!(
                "worker {}: ignoring {command}, worker is {}",
                self.id(),
                self.get_status()
            );
            return Ok(());
        }
        let sender = self.cmd_tx.lock().unwrap().clone();
        let Some(sender) = sender else {
            return Err(ControlError::ChannelClosed.into());
        };
        let window = self.config.tick_interval * 3;
        match sender.send_timeout(command, window).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(ControlError::TimedOut.into()),
            Err(SendTimeoutError::Closed(_)) => Err(ControlError::ChannelClosed.into()),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let state = self.state.read().unwrap();
        Ok(serde_json::to_vec(&*state)?)
    }

    /// Replaces identity, role, and transcript with the deserialized blob.
    pub fn deserialize(&self, blob: &[u8]) -> Result<()> {
        let restored: WorkerState = serde_json::from_slice(blob)?;
        *self.state.write().unwrap() = restored;
        Ok(())
    }

    /// Writes the current state to storage with status-derived timestamps:
    /// running stamps `awakened_at`, asleep stamps `asleep_at`, anything else
    /// clears both.
    pub async fn persist_state(&self) -> Result<()> {
        let (id, role, blob) = {
            let state = self.state.read().unwrap();
            (state.id.clone(), state.role, serde_json::to_vec(&*state)?)
        };
        let status = self.get_status();
        let (awakened_at, asleep_at) = match status {
            WorkerStatus::Running => (Some(Utc::now()), None),
            WorkerStatus::Asleep => (None, Some(Utc::now())),
            _ => (None, None),
        };
        self.storage
            .save_agent_state(&id, &blob, status, role, awakened_at, asleep_at)
            .await
    }

    /// Loads a persisted agent into this worker, then writes the row back
    /// with timestamps refreshed for the current status.
    pub async fn restore_state(&self, agent_id: &str) -> Result<()> {
        let blob = self.storage.get_agent_state(agent_id).await?;
        self.deserialize(&blob)?;
        self.persist_state().await
    }

    fn append_message(&self, message: ChatMessage) {
        self.state.write().unwrap().messages.push(message);
    }

    /// Drops the command sender so a blocked loop sees the channel close.
    pub fn close(&self) {
        self.cmd_tx.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{tool_call, MockChatProvider};
    use crate::providers::ChatResponse;
    use crate::pubsub::InMemoryPubSub;
    use crate::storage::InMemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            tick_interval: Duration::from_millis(10),
            command_buffer: 10,
        }
    }

    fn build_worker(provider: MockChatProvider, config: WorkerConfig) -> (Worker, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let worker = Worker::new(
            "w1",
            Role::Consumer,
            storage.clone(),
            Arc::new(provider),
            Arc::new(InMemoryPubSub::new()),
            config,
        );
        (worker, storage)
    }

    #[tokio::test]
    async fn chat_runs_until_report() {
        let provider = MockChatProvider::new(vec![
            ChatResponse {
                content: None,
                tool_calls: vec![tool_call(
                    "search_content",
                    serde_json::json!({"query": "rock"}),
                )],
            },
            ChatResponse {
                content: None,
                tool_calls: vec![tool_call(
                    "report",
                    serde_json::json!({"content": "No rock found"}),
                )],
            },
        ]);
        let (worker, storage) = build_worker(provider, fast_config());

        let cancel = CancellationToken::new();
        let response = worker
            .chat(&cancel, "find rock music", WorkerCallbacks::new())
            .await
            .unwrap();

        assert_eq!(response, "No rock found");
        assert_eq!(worker.get_status(), WorkerStatus::Terminated);

        let row = storage.get_agent_row("w1").unwrap();
        assert_eq!(row.status, WorkerStatus::Terminated);
        assert!(row.awakened_at.is_none());
        assert!(row.asleep_at.is_none());
    }

    #[tokio::test]
    async fn terminate_fires_callback_and_persists() {
        let provider = MockChatProvider::reporting("done");
        let (worker, _storage) = build_worker(provider, fast_config());

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let mut callbacks = WorkerCallbacks::new();
        callbacks.insert(
            WorkerEvent::OnTerminate,
            Arc::new(move |id, status| {
                assert_eq!(id, "w1");
                assert_eq!(status, WorkerStatus::Terminated);
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let cancel = CancellationToken::new();
        worker.chat(&cancel, "anything", callbacks).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sleep_command_stops_loop_and_stamps_asleep_at() {
        let provider = MockChatProvider::idling();
        let (worker, storage) = build_worker(provider, fast_config());
        let worker = Arc::new(worker);

        let cancel = CancellationToken::new();
        let loop_worker = worker.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop_worker
                .chat(&loop_cancel, "keep busy", WorkerCallbacks::new())
                .await
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        worker.send_command(WorkerCommand::Sleep).await.unwrap();

        let response = handle.await.unwrap().unwrap();
        assert_eq!(response, "");
        assert_eq!(worker.get_status(), WorkerStatus::Asleep);

        let row = storage.get_agent_row("w1").unwrap();
        assert_eq!(row.status, WorkerStatus::Asleep);
        assert!(row.asleep_at.is_some());
        assert!(row.awakened_at.is_none());
    }

    #[tokio::test]
    async fn pause_freezes_model_turns() {
        let provider = MockChatProvider::idling();
        let counter = provider.call_counter();
        let (worker, _storage) = build_worker(provider, fast_config());
        let worker = Arc::new(worker);

        let cancel = CancellationToken::new();
        let loop_worker = worker.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop_worker
                .chat(&loop_cancel, "keep busy", WorkerCallbacks::new())
                .await
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        worker.send_command(WorkerCommand::Pause).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(worker.get_status(), WorkerStatus::Paused);

        let frozen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), frozen);

        worker.send_command(WorkerCommand::Resume).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(counter.load(Ordering::SeqCst) > frozen);

        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControlError>(),
            Some(ControlError::Canceled)
        ));
    }

    #[tokio::test]
    async fn send_command_is_noop_before_start() {
        let provider = MockChatProvider::idling();
        let (worker, _storage) = build_worker(provider, fast_config());

        // Never started: status reads terminated, command is dropped.
        assert_eq!(worker.get_status(), WorkerStatus::Terminated);
        worker.send_command(WorkerCommand::Pause).await.unwrap();
    }

    #[tokio::test]
    async fn send_command_times_out_when_loop_is_stalled() {
        let provider = MockChatProvider::idling();
        let config = WorkerConfig {
            tick_interval: Duration::from_millis(10),
            command_buffer: 1,
        };
        let (worker, _storage) = build_worker(provider, config);

        // Start the machine without draining the channel.
        worker.fsm.start();
        worker.send_command(WorkerCommand::Pause).await.unwrap();
        let err = worker.send_command(WorkerCommand::Pause).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControlError>(),
            Some(ControlError::TimedOut)
        ));
    }

    #[tokio::test]
    async fn state_round_trips_through_serialization() {
        let provider = MockChatProvider::idling();
        let (worker, _storage) = build_worker(provider, fast_config());
        worker.append_message(ChatMessage::user("remember me"));

        let blob = worker.serialize().unwrap();

        let (other, _storage) = build_worker(MockChatProvider::idling(), fast_config());
        other.deserialize(&blob).unwrap();
        assert_eq!(other.id(), "w1");
        assert_eq!(other.role(), Role::Consumer);
        let messages = other.state.read().unwrap().messages.clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("remember me"));
    }

    #[tokio::test]
    async fn restore_state_refreshes_persisted_row() {
        let storage = Arc::new(InMemoryStorage::new());
        let seeded = Worker::new(
            "w2",
            Role::Publisher,
            storage.clone(),
            Arc::new(MockChatProvider::idling()),
            Arc::new(InMemoryPubSub::new()),
            fast_config(),
        );
        seeded.append_message(ChatMessage::user("Jazz in the Rain"));
        seeded.fsm.start();
        seeded.fsm.transition(WorkerCommand::Sleep).unwrap();
        seeded.persist_state().await.unwrap();

        let fresh = Worker::new(
            "ignored",
            Role::Consumer,
            storage.clone(),
            Arc::new(MockChatProvider::idling()),
            Arc::new(InMemoryPubSub::new()),
            fast_config(),
        );
        fresh.restore_state("w2").await.unwrap();

        assert_eq!(fresh.id(), "w2");
        assert_eq!(fresh.role(), Role::Publisher);
        let messages = fresh.state.read().unwrap().messages.clone();
        assert_eq!(messages[0].content.as_deref(), Some("Jazz in the Rain"));
    }
}
