//! Process-facing entry point.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{debug, instrument};

use crate::{
    FaultPolicy, LoopState, Logger, TaskAction, TaskCache, TaskKey, TaskState, TimeUnit,
    TimerBusConfig, TimerBusError, TimerLoop, TracingLogger,
};

static GLOBAL: OnceLock<TimerBus> = OnceLock::new();

/// An in-process timer: one worker thread serving every registered task.
///
/// Intended as one instance per process (see [`TimerBus::global`]), but
/// independent instances can be built for tests or isolated subsystems.
/// Dropping an owned instance stops its worker.
pub struct TimerBus {
    timer: Arc<TimerLoop>,
}

impl TimerBus {
    /// Create and start a scheduler with the default logger.
    pub fn new(config: TimerBusConfig) -> Result<Self, TimerBusError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> TimerBusBuilder {
        TimerBusBuilder::default()
    }

    /// The process-wide instance. Started on first use with the default
    /// configuration unless [`TimerBusBuilder::install_global`] ran first.
    /// It is only stopped by an explicit [`TimerBus::exit`].
    pub fn global() -> &'static TimerBus {
        GLOBAL.get_or_init(|| {
            let config = TimerBusConfig::default();
            let timer = Arc::new(TimerLoop::new(
                Arc::new(TaskCache::new(config.cache_capacity)),
                Arc::new(TracingLogger),
                &config,
            ));
            if let Err(e) = timer.start() {
                timer.logger().error(&format!("global timer bus unavailable: {e}"));
            }
            TimerBus { timer }
        })
    }

    /// Schedule `action` to run after `delay`, then every `period` if given.
    ///
    /// A period of zero would re-fire continuously; it is logged and the task
    /// is scheduled once instead.
    pub fn schedule<F>(
        &self,
        name: impl Into<Arc<str>>,
        period: Option<u64>,
        delay: u64,
        unit: TimeUnit,
        action: F,
    ) -> TimerCall
    where
        F: Fn(&str, TaskKey) + Send + Sync + 'static,
    {
        self.schedule_action(name, period, delay, unit, Arc::new(action))
    }

    /// Like [`Self::schedule`], for an existing [`TaskAction`] implementation.
    #[instrument(level = "debug", skip_all, fields(task = tracing::field::Empty, ?period, delay))]
    pub fn schedule_action(
        &self,
        name: impl Into<Arc<str>>,
        period: Option<u64>,
        delay: u64,
        unit: TimeUnit,
        action: Arc<dyn TaskAction>,
    ) -> TimerCall {
        let name: Arc<str> = name.into();
        tracing::Span::current().record("task", &*name);

        let period = match period {
            Some(0) => {
                self.timer.logger().error(&format!(
                    "task {name} has a zero period, scheduling it once"
                ));
                None
            }
            period => period,
        };

        let task = self.timer.cache().obtain(name, period, delay, unit, action);
        debug!(
            key = %task.key(),
            delay = %format_args!("{delay}{}", unit.suffix()),
            "task scheduled"
        );
        let call = TimerCall::new(
            task.shared_name(),
            task.state()
                .cloned()
                .unwrap_or_else(|| Arc::new(TaskState::new(task.key()))),
            Arc::clone(&self.timer),
        );
        self.timer.add(task);
        call
    }

    /// Schedule a one-shot task.
    pub fn schedule_once<F>(
        &self,
        name: impl Into<Arc<str>>,
        delay: u64,
        unit: TimeUnit,
        action: F,
    ) -> TimerCall
    where
        F: Fn(&str, TaskKey) + Send + Sync + 'static,
    {
        self.schedule(name, None, delay, unit, action)
    }

    /// Schedule a task that first fires after `delay` and then every `period`.
    pub fn schedule_repeating<F>(
        &self,
        name: impl Into<Arc<str>>,
        period: u64,
        delay: u64,
        unit: TimeUnit,
        action: F,
    ) -> TimerCall
    where
        F: Fn(&str, TaskKey) + Send + Sync + 'static,
    {
        self.schedule(name, Some(period), delay, unit, action)
    }

    /// Stop the scheduler. Pending tasks are dropped and later schedules are
    /// ignored; there is no restart.
    ///
    /// Waits for the worker to finish unless called from a task action.
    pub fn exit(&self) {
        self.timer.exit();
        self.timer.join();
    }

    pub fn state(&self) -> LoopState {
        self.timer.state()
    }

    /// Number of queued occurrences.
    pub fn pending(&self) -> usize {
        self.timer.pending()
    }

    /// Number of retired records available for reuse.
    pub fn cached(&self) -> usize {
        self.timer.cache().len()
    }
}

impl Drop for TimerBus {
    fn drop(&mut self) {
        self.exit();
    }
}

impl fmt::Debug for TimerBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerBus")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Builder for [`TimerBus`].
#[derive(Default)]
pub struct TimerBusBuilder {
    config: TimerBusConfig,
    logger: Option<Arc<dyn Logger>>,
}

impl TimerBusBuilder {
    pub fn config(mut self, config: TimerBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`TracingLogger`] sink.
    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn shared_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.config.fault_policy = policy;
        self
    }

    /// Validate the configuration and start the worker thread.
    pub fn build(self) -> Result<TimerBus, TimerBusError> {
        self.config.validate()?;
        let logger = self.logger.unwrap_or_else(|| Arc::new(TracingLogger));
        let timer = Arc::new(TimerLoop::new(
            Arc::new(TaskCache::new(self.config.cache_capacity)),
            logger,
            &self.config,
        ));
        timer.start()?;
        Ok(TimerBus { timer })
    }

    /// Build the scheduler and make it the one returned by
    /// [`TimerBus::global`], e.g. to give it a custom logger.
    ///
    /// Fails with [`TimerBusError::GlobalInitialized`] once the global
    /// instance exists, whether installed or started by first use.
    pub fn install_global(self) -> Result<&'static TimerBus, TimerBusError> {
        if GLOBAL.get().is_some() {
            return Err(TimerBusError::GlobalInitialized);
        }
        let bus = self.build()?;
        // Losing a race drops the fresh instance, which stops its worker
        GLOBAL.set(bus).map_err(|_| TimerBusError::GlobalInitialized)?;
        GLOBAL.get().ok_or(TimerBusError::GlobalInitialized)
    }
}

/// Handle to one registration. Canceling covers every future occurrence of a
/// periodic task.
#[derive(Clone)]
pub struct TimerCall {
    name: Arc<str>,
    state: Arc<TaskState>,
    timer: Arc<TimerLoop>,
}

impl TimerCall {
    fn new(name: Arc<str>, state: Arc<TaskState>, timer: Arc<TimerLoop>) -> Self {
        Self { name, state, timer }
    }

    /// Cancel the registration. An occurrence already firing completes, but
    /// nothing fires afterwards.
    ///
    /// Returns `true` if this call canceled it; `false` if it was already
    /// canceled or a one-shot task has already fired.
    pub fn cancel(&self) -> bool {
        if !self.state.cancel() {
            return false;
        }
        self.timer.cancel(&self.state);
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the occurrence currently scheduled.
    pub fn key(&self) -> TaskKey {
        self.state.current_key()
    }

    pub fn is_canceled(&self) -> bool {
        self.state.is_canceled()
    }

    /// Whether a one-shot task has fired.
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

impl fmt::Debug for TimerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerCall")
            .field("name", &self.name)
            .field("key", &self.key())
            .field("canceled", &self.is_canceled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::NoopLogger;

    fn bus() -> TimerBus {
        TimerBus::builder()
            .logger(NoopLogger)
            .cache_capacity(4)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = TimerBus::builder().batch_size(0).build();
        assert!(matches!(result, Err(TimerBusError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_starts_worker() {
        let bus = TimerBus::new(TimerBusConfig::default()).unwrap();
        assert_eq!(bus.state(), LoopState::Running);
        bus.exit();
        assert_eq!(bus.state(), LoopState::Stopped);
    }

    #[test]
    fn test_call_reports_name_and_key() {
        let bus = bus();
        let call = bus.schedule_once("label", 60, TimeUnit::Seconds, |_: &str, _| {});
        assert_eq!(call.name(), "label");
        assert!(call.key().get() >= crate::key::FIRST_KEY);
        assert_eq!(bus.pending(), 1);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let bus = bus();
        let call = bus.schedule_once("c", 60, TimeUnit::Seconds, |_: &str, _| {});
        assert!(call.cancel());
        assert!(!call.cancel());
        assert!(call.is_canceled());
        assert_eq!(bus.pending(), 0);
        assert_eq!(bus.cached(), 1);
    }

    #[test]
    fn test_one_shot_marks_finished() {
        let bus = bus();
        let (tx, rx) = mpsc::sync_channel(4);
        let call = bus.schedule_once("f", 0, TimeUnit::Milliseconds, move |_: &str, key| {
            let _ = tx.send(key);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), call.key());
        assert!(call.is_finished());
        // Canceling after firing is a silent no-op
        assert!(!call.cancel());
    }

    #[test]
    fn test_zero_period_runs_once() {
        let bus = bus();
        let (tx, rx) = mpsc::sync_channel(16);
        bus.schedule("zero", Some(0), 0, TimeUnit::Milliseconds, move |_: &str, _| {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_schedule_after_exit_is_noop() {
        let bus = bus();
        bus.exit();
        let (tx, rx) = mpsc::sync_channel(4);
        let call = bus.schedule_once("late", 0, TimeUnit::Milliseconds, move |_: &str, _| {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(bus.pending(), 0);
        // The handle still behaves
        assert!(call.cancel());
    }

    #[test]
    fn test_callback_can_schedule_more_work() {
        let bus = Arc::new(bus());
        let (tx, rx) = mpsc::sync_channel(4);
        let inner_bus = Arc::downgrade(&bus);
        bus.schedule_once("outer", 0, TimeUnit::Milliseconds, move |_: &str, _| {
            let tx = tx.clone();
            if let Some(bus) = inner_bus.upgrade() {
                bus.schedule_once("inner", 10, TimeUnit::Milliseconds, move |name: &str, _| {
                    let _ = tx.send(name.to_string());
                });
            }
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "inner");
    }

    #[test]
    fn test_global_is_shared() {
        let a = TimerBus::global() as *const TimerBus;
        let b = TimerBus::global() as *const TimerBus;
        assert_eq!(a, b);
        assert_eq!(TimerBus::global().state(), LoopState::Running);
    }

    #[test]
    fn test_install_global_after_first_use_fails() {
        let global = TimerBus::global() as *const TimerBus;
        let result = TimerBus::builder().logger(NoopLogger).install_global();
        assert!(matches!(result, Err(TimerBusError::GlobalInitialized)));
        assert_eq!(TimerBus::global() as *const TimerBus, global);
        assert_eq!(TimerBus::global().state(), LoopState::Running);
    }

    #[test]
    fn test_install_global_rejects_invalid_config() {
        let result = TimerBus::builder().batch_size(0).install_global();
        assert!(matches!(
            result,
            Err(TimerBusError::InvalidConfig(_) | TimerBusError::GlobalInitialized)
        ));
    }

    #[test]
    fn test_huge_cache_capacity_builds() {
        let bus = TimerBus::builder()
            .logger(NoopLogger)
            .cache_capacity(usize::MAX)
            .build()
            .unwrap();
        assert_eq!(bus.state(), LoopState::Running);
    }
}
