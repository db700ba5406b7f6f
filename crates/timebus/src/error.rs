//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur while constructing a scheduler.
///
/// Once a scheduler is running, scheduling and cancellation are infallible.
#[derive(Debug, Error)]
pub enum TimerBusError {
    /// Invalid scheduler configuration.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// The process-wide scheduler was already started.
    #[error("the global timer bus is already initialized")]
    GlobalInitialized,

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
