//! Fleet orchestration: tracking, lifetime enforcement, reanimation, and the
//! facade that wires it all together.

pub mod controller;
pub mod plane;
pub mod scheduler;
pub mod tracker;

pub use controller::{AgentController, AgentControllerConfig};
pub use plane::{ControlPlane, ControlPlaneCallbacks, ControlPlaneEvent, OnAgentFinalResponse};
pub use scheduler::{OnAgentFound, Scheduler, SchedulerConfig};
pub use tracker::{AgentTracker, AgentTracking, MemoryAgentTracker};
