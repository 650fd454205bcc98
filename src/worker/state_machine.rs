use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Task semantics exposed to the model via the initial prompt. The worker
/// machinery itself is role-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Publisher => "publisher",
            Role::Consumer => "consumer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publisher" => Ok(Role::Publisher),
            "consumer" => Ok(Role::Consumer),
            other => Err(ControlError::InvalidRole(other.to_string())),
        }
    }
}

/// Flow-control commands accepted by a worker's command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    Pause,
    Resume,
    Sleep,
    Terminate,
}

impl WorkerCommand {
    pub fn as_str(&self) -> &str {
        match self {
            WorkerCommand::Pause => "pause",
            WorkerCommand::Resume => "resume",
            WorkerCommand::Sleep => "sleep",
            WorkerCommand::Terminate => "terminate",
        }
    }
}

impl std::fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Paused,
    Asleep,
    Terminated,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &str {
        match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Asleep => "asleep",
            WorkerStatus::Terminated => "terminated",
        }
    }

    /// Terminal with respect to command ingress; commands are dropped here.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Asleep | WorkerStatus::Terminated)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(WorkerStatus::Running),
            "paused" => Ok(WorkerStatus::Paused),
            "asleep" => Ok(WorkerStatus::Asleep),
            "terminated" => Ok(WorkerStatus::Terminated),
            other => Err(anyhow!("unknown worker status: {}", other)),
        }
    }
}

/// Outcome of a successful transition. `from == to` marks the asleep
/// self-loop, which callers debounce so `on_sleep` fires once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: WorkerStatus,
    pub to: WorkerStatus,
}

/// The worker FSM. Initialized to `Running` on each `chat`/`resume_chat`;
/// an uninitialized machine reads as `Terminated`.
pub struct StateMachine {
    current: Mutex<Option<WorkerStatus>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        *self.current.lock().unwrap() = Some(WorkerStatus::Running);
    }

    pub fn current(&self) -> WorkerStatus {
        self.current
            .lock()
            .unwrap()
            .unwrap_or(WorkerStatus::Terminated)
    }

    pub fn transition(&self, command: WorkerCommand) -> Result<Transition> {
        let mut guard = self.current.lock().unwrap();
        let from = guard.unwrap_or(WorkerStatus::Terminated);

        let to = match (from, command) {
            (WorkerStatus::Running, WorkerCommand::Pause) => WorkerStatus::Paused,
            (WorkerStatus::Paused, WorkerCommand::Resume) => WorkerStatus::Running,
            (
                WorkerStatus::Running | WorkerStatus::Paused | WorkerStatus::Asleep,
                WorkerCommand::Sleep,
            ) => WorkerStatus::Asleep,
            (WorkerStatus::Running | WorkerStatus::Paused, WorkerCommand::Terminate) => {
                WorkerStatus::Terminated
            }
            _ => {
                return Err(anyhow!(
                    "invalid transition from {:?} on {:?}",
                    from,
                    command
                ));
            }
        };

        *guard = Some(to);
        Ok(Transition { from, to })
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
