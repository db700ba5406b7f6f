//! Stream adapters over timebus schedules.
//!
//! Two flavours are provided:
//! - [`ScheduleFlow`] / [`ScheduleStream`]: cold. Every stream owns its own
//!   registration, created on first poll and canceled on drop.
//! - [`SharedSchedule`] / [`SharedStream`]: one registration shared by all
//!   current subscribers, started by the first and canceled when the last
//!   one is dropped. Late subscribers can receive the most recent event.
//!
//! Events are produced on the scheduler's worker thread and handed over
//! through bounded tokio channels, so the streams can be consumed on any
//! runtime. A consumer that falls behind loses firings rather than
//! buffering them without limit.

mod shared;
mod stream;

use std::sync::Arc;

use timebus::TimeUnit;

pub use shared::{DEFAULT_SHARED_CAPACITY, SharedSchedule, SharedStream};
pub use stream::{
    DEFAULT_STREAM_CAPACITY, ScheduleFlow, ScheduleStream, schedule_stream,
    schedule_stream_with_capacity,
};

/// What to register with the scheduler when a stream starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub name: Arc<str>,
    pub period: Option<u64>,
    pub delay: u64,
    pub unit: TimeUnit,
}

impl ScheduleRequest {
    pub fn new(name: impl Into<Arc<str>>, period: Option<u64>, delay: u64, unit: TimeUnit) -> Self {
        Self {
            name: name.into(),
            period,
            delay,
            unit,
        }
    }

    /// A single firing after `delay`.
    pub fn once(name: impl Into<Arc<str>>, delay: u64, unit: TimeUnit) -> Self {
        Self::new(name, None, delay, unit)
    }

    /// Fire after `delay`, then every `period`.
    pub fn repeating(name: impl Into<Arc<str>>, period: u64, delay: u64, unit: TimeUnit) -> Self {
        Self::new(name, Some(period), delay, unit)
    }
}
