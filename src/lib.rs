pub mod agents;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod providers;
pub mod pubsub;
pub mod storage;
pub mod tools;
pub mod worker;

pub use config::Config;
pub use error::ControlError;
