//! Task records and their cancellation cell.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::{TaskKey, TimeUnit};

/// Callback invoked when a task fires.
///
/// Actions run on the scheduler's worker thread. A slow action delays every
/// task that becomes due after it.
pub trait TaskAction: Send + Sync + 'static {
    fn execute(&self, name: &str, key: TaskKey);
}

impl<F> TaskAction for F
where
    F: Fn(&str, TaskKey) + Send + Sync + 'static,
{
    fn execute(&self, name: &str, key: TaskKey) {
        self(name, key)
    }
}

const SCHEDULED: u8 = 0;
const CANCELED: u8 = 1;
const FINISHED: u8 = 2;

/// Cancellation cell shared by a [`TimerCall`](crate::TimerCall) and every
/// occurrence of the registration it controls.
///
/// Status only moves out of `Scheduled`, by compare-and-swap, so the
/// canceling thread and the worker agree on a single winner.
#[derive(Debug)]
pub struct TaskState {
    status: AtomicU8,
    /// Key of the occurrence currently queued (or in flight).
    current: AtomicU64,
}

impl TaskState {
    pub fn new(key: TaskKey) -> Self {
        Self {
            status: AtomicU8::new(SCHEDULED),
            current: AtomicU64::new(key.get()),
        }
    }

    /// Mark the registration canceled. Returns `false` if it was already
    /// canceled or has finished.
    pub fn cancel(&self) -> bool {
        self.transition(CANCELED)
    }

    /// Mark a one-shot registration as fired. Returns `false` if a cancel won.
    pub fn finish(&self) -> bool {
        self.transition(FINISHED)
    }

    pub fn is_canceled(&self) -> bool {
        self.status.load(Ordering::Acquire) == CANCELED
    }

    pub fn is_finished(&self) -> bool {
        self.status.load(Ordering::Acquire) == FINISHED
    }

    /// Key of the occurrence this registration currently owns.
    pub fn current_key(&self) -> TaskKey {
        TaskKey::new(self.current.load(Ordering::Acquire))
    }

    pub(crate) fn track(&self, key: TaskKey) {
        self.current.store(key.get(), Ordering::Release);
    }

    fn transition(&self, to: u8) -> bool {
        self.status
            .compare_exchange(SCHEDULED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One scheduled occurrence.
///
/// A record is owned by exactly one place at a time: the queue, the cache, or
/// the worker thread while it is being dispatched.
pub struct Task {
    name: Arc<str>,
    key: TaskKey,
    period: Option<u64>,
    delay: u64,
    unit: TimeUnit,
    action: Option<Arc<dyn TaskAction>>,
    run_time: Instant,
    state: Option<Arc<TaskState>>,
}

impl Task {
    pub(crate) fn new(
        key: TaskKey,
        name: Arc<str>,
        period: Option<u64>,
        delay: u64,
        unit: TimeUnit,
        action: Arc<dyn TaskAction>,
        state: Arc<TaskState>,
    ) -> Self {
        Self {
            name,
            key,
            period,
            delay,
            unit,
            action: Some(action),
            run_time: Instant::now(),
            state: Some(state),
        }
    }

    /// Overwrite every field except the key, reusing this record for a new
    /// occurrence.
    pub(crate) fn reinit(
        &mut self,
        name: Arc<str>,
        period: Option<u64>,
        delay: u64,
        unit: TimeUnit,
        action: Arc<dyn TaskAction>,
        state: Arc<TaskState>,
    ) {
        self.name = name;
        self.period = period;
        self.delay = delay;
        self.unit = unit;
        self.action = Some(action);
        self.state = Some(state);
    }

    /// Set the deadline to `now + delay`.
    pub(crate) fn init(&mut self) {
        self.run_time = deadline_after(Instant::now(), self.unit.to_duration(self.delay));
    }

    /// Drop the callback and the cancellation cell before the record is cached.
    pub(crate) fn retire(&mut self) {
        self.action = None;
        self.state = None;
    }

    pub(crate) fn set_run_time(&mut self, run_time: Instant) {
        self.run_time = run_time;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn key(&self) -> TaskKey {
        self.key
    }

    /// Period in [`Self::unit`], or `None` for a one-shot task.
    pub fn period(&self) -> Option<u64> {
        self.period
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Absolute deadline of this occurrence.
    pub fn run_time(&self) -> Instant {
        self.run_time
    }

    pub fn is_periodic(&self) -> bool {
        self.period.is_some()
    }

    /// Period as a [`Duration`], if the task repeats.
    pub fn period_duration(&self) -> Option<Duration> {
        self.period.map(|p| self.unit.to_duration(p))
    }

    pub fn action(&self) -> Option<&Arc<dyn TaskAction>> {
        self.action.as_ref()
    }

    pub fn state(&self) -> Option<&Arc<TaskState>> {
        self.state.as_ref()
    }

    /// Whether the registration this record belongs to has been canceled.
    /// Cached records are never canceled.
    pub fn is_canceled(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_canceled())
    }

    /// Whether this record is an occurrence of the registration behind `state`.
    pub fn belongs_to(&self, state: &Arc<TaskState>) -> bool {
        self.state.as_ref().is_some_and(|s| Arc::ptr_eq(s, state))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("period", &self.period)
            .field("delay", &self.delay)
            .field("unit", &self.unit)
            .field("has_action", &self.action.is_some())
            .field("run_time", &self.run_time)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// `base + offset`, clamped instead of panicking when the sum is not representable.
pub(crate) fn deadline_after(base: Instant, offset: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);
    base.checked_add(offset)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}
