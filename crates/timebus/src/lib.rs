//! Single-thread in-process timer scheduler.
//!
//! This crate provides a scheduler that:
//! - Runs every one-shot and periodic task on exactly one worker thread
//! - Parks the worker until the next deadline instead of polling
//! - Recycles retired task records through a bounded cache
//! - Lets callbacks schedule new tasks without deadlocking the queue
//!
//! ```no_run
//! use timebus::{TimeUnit, TimerBus};
//!
//! let bus = TimerBus::builder().build()?;
//! let call = bus.schedule_repeating("banner", 3, 1, TimeUnit::Seconds, |name: &str, key| {
//!     println!("{name} fired as {key}");
//! });
//! call.cancel();
//! bus.exit();
//! # Ok::<(), timebus::TimerBusError>(())
//! ```

mod bus;
mod cache;
mod config;
mod error;
mod key;
mod logger;
mod queue;
mod task;
mod timer_loop;
mod types;

pub use bus::{TimerBus, TimerBusBuilder, TimerCall};
pub use cache::TaskCache;
pub use config::{FaultPolicy, TimerBusConfig};
pub use error::TimerBusError;
pub use key::KeyGenerator;
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use queue::{Batch, BatchHandler, DeadlineQueue};
pub use task::{Task, TaskAction, TaskState};
pub use timer_loop::{LoopState, TimerLoop};
pub use types::{TaskInfo, TaskKey, TimeUnit};
