use thiserror::Error;

/// Typed failures surfaced by the control plane and workers.
///
/// Transient faults (provider errors, publish or persist failures) are not
/// represented here; loops log them and retry on the next tick. These
/// variants are the ones callers can act on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("invalid agent role: {0}")]
    InvalidRole(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("sending command timed out")]
    TimedOut,

    #[error("operation canceled")]
    Canceled,

    #[error("control channel closed")]
    ChannelClosed,
}
