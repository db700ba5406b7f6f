//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::TimerBusError;
use crate::cache::DEFAULT_CACHE_CAPACITY;

/// Default number of due tasks extracted per loop iteration.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default name of the worker thread.
pub const DEFAULT_THREAD_NAME: &str = "timebus-loop";

/// What the worker does when a task action panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Log the panic and keep servicing other tasks.
    #[default]
    Isolate,
    /// Log the panic and stop the worker thread. No further tasks fire.
    FailStop,
}

/// Configuration for a [`TimerBus`](crate::TimerBus).
///
/// # Examples
///
/// ```rust
/// use timebus::{FaultPolicy, TimerBusConfig};
///
/// let config = TimerBusConfig::default()
///     .with_cache_capacity(64)
///     .with_fault_policy(FaultPolicy::FailStop);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerBusConfig {
    /// Maximum number of retired task records kept for reuse.
    pub cache_capacity: usize,

    /// Maximum number of due tasks extracted per loop iteration.
    pub batch_size: usize,

    /// Name given to the worker thread.
    pub thread_name: String,

    /// Handling of panics raised by task actions.
    pub fault_policy: FaultPolicy,
}

impl Default for TimerBusConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            fault_policy: FaultPolicy::default(),
        }
    }
}

impl TimerBusConfig {
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    /// Check the configuration for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), TimerBusError> {
        if self.batch_size == 0 {
            return Err(TimerBusError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(TimerBusError::InvalidConfig(
                "thread_name cannot be empty".to_string(),
            ));
        }
        if self.thread_name.contains('\0') {
            return Err(TimerBusError::InvalidConfig(
                "thread_name cannot contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }
}
