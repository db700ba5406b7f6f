//! The single worker thread and its run loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cache::TaskTemplate;
use crate::queue::BatchHandler;
use crate::task::deadline_after;
use crate::{
    DeadlineQueue, FaultPolicy, Logger, Task, TaskAction, TaskCache, TaskKey, TaskState,
    TimerBusConfig, TimerBusError,
};

/// Lifecycle of a [`TimerLoop`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Unstarted = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl LoopState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LoopState::Unstarted,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }

    /// Whether new tasks are still accepted.
    pub fn accepts_tasks(self) -> bool {
        matches!(self, LoopState::Unstarted | LoopState::Running)
    }
}

/// Owns the worker thread: sleeps until the next deadline, fires due tasks,
/// and re-enqueues periodic ones.
pub struct TimerLoop {
    cache: Arc<TaskCache>,
    queue: DeadlineQueue,
    logger: Arc<dyn Logger>,
    batch_size: usize,
    fault_policy: FaultPolicy,
    thread_name: String,
    state: AtomicU8,
    /// Published by the worker itself before its first queue inspection.
    worker: OnceLock<Thread>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerLoop {
    pub fn new(cache: Arc<TaskCache>, logger: Arc<dyn Logger>, config: &TimerBusConfig) -> Self {
        Self {
            cache,
            queue: DeadlineQueue::new(),
            logger,
            batch_size: config.batch_size,
            fault_policy: config.fault_policy,
            thread_name: config.thread_name.clone(),
            state: AtomicU8::new(LoopState::Unstarted as u8),
            worker: OnceLock::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the worker thread. Calling this more than once has no effect.
    pub fn start(self: &Arc<Self>) -> Result<(), TimerBusError> {
        if !self.transition(LoopState::Unstarted, LoopState::Running) {
            return Ok(());
        }

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                // Publish before the first look at the queue so an add racing
                // startup either lands before that look or sees the handle.
                let _ = this.worker.set(thread::current());
                this.logger.info("timer loop started");
                this.run();
            });

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.store(LoopState::Stopped as u8, Ordering::Release);
                Err(TimerBusError::Spawn(e))
            }
        }
    }

    /// Queue a task and wake the worker. Ignored once exit has been requested.
    pub fn add(&self, task: Task) {
        if !self.state().accepts_tasks() {
            trace!(key = %task.key(), "timer loop not accepting tasks, dropping");
            return;
        }
        self.queue.add(task);
        self.unpark();
    }

    /// Remove the queued occurrence of the registration behind `state`, if
    /// any, and wake the worker so it re-reads the head deadline.
    ///
    /// Does nothing to an occurrence that is already firing.
    pub fn cancel(&self, state: &Arc<TaskState>) {
        let key = state.current_key();
        let removed = self
            .queue
            .remove_where(|task| task.key() == key && task.belongs_to(state));
        if let Some(task) = removed {
            trace!(key = %key, "removed canceled task from queue");
            self.cache.add(task);
        }
        self.unpark();
    }

    /// Request shutdown. The worker clears the queue on its next iteration and
    /// exits; nothing fires after it observes the request.
    pub fn exit(&self) {
        if self.transition(LoopState::Unstarted, LoopState::Stopped) {
            self.queue.clear();
            self.logger.info("timer loop exited before start");
            return;
        }
        if self.transition(LoopState::Running, LoopState::Stopping) {
            self.logger.info("timer loop exit requested");
            // Without the worker's handle the unpark below is lost
            while self.worker.get().is_none() && self.state() != LoopState::Stopped {
                thread::yield_now();
            }
        }
        self.unpark();
    }

    /// Wait for the worker thread to finish. Returns immediately when called
    /// from the worker itself or when no worker was spawned.
    pub fn join(&self) {
        if self
            .worker
            .get()
            .is_some_and(|worker| worker.id() == thread::current().id())
        {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                self.logger.error("timer loop thread panicked");
            }
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of queued occurrences.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn cache(&self) -> &Arc<TaskCache> {
        &self.cache
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    fn run(&self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            while self.state() == LoopState::Running {
                self.turn();
            }
        }));

        self.queue.clear();
        if let Err(payload) = outcome {
            self.logger.error(&format!(
                "timer loop terminated: {}",
                panic_message(payload.as_ref())
            ));
        }
        self.state.store(LoopState::Stopped as u8, Ordering::Release);
        self.logger.info("timer loop stopped");
    }

    fn turn(&self) {
        let mut pass = Pass {
            timer: self,
            now: Instant::now(),
        };
        self.queue.execute_batch(self.batch_size, &mut pass);
    }

    /// Fire one extracted task. Its record is retired before the action runs;
    /// a periodic task's next occurrence is queued before the action runs.
    fn dispatch(&self, task: Task, now: Instant) {
        if self.state() != LoopState::Running {
            self.cache.add(task);
            return;
        }
        if task.is_canceled() {
            trace!(key = %task.key(), "skipping canceled task");
            self.cache.add(task);
            return;
        }
        let (Some(action), Some(state)) = (task.action().cloned(), task.state().cloned()) else {
            self.cache.add(task);
            return;
        };

        let name = task.shared_name();
        let key = task.key();
        let next = task
            .period_duration()
            .map(|period| (TaskTemplate::of(&task), period));
        self.cache.add(task);

        match next {
            Some((template, period)) => {
                let mut next = self.cache.obtain_next(
                    &template,
                    Arc::clone(&action),
                    Arc::clone(&state),
                );
                next.set_run_time(deadline_after(now, period));
                self.add(next);
                // A cancel that ran before the add found nothing to remove
                if state.is_canceled() {
                    self.cancel(&state);
                }
            }
            None => {
                if !state.finish() {
                    trace!(key = %key, "one-shot task canceled before firing");
                    return;
                }
            }
        }

        trace!(key = %key, task = %name, "firing task");
        self.invoke(action.as_ref(), &name, key);
    }

    fn invoke(&self, action: &dyn TaskAction, name: &str, key: TaskKey) {
        match self.fault_policy {
            FaultPolicy::FailStop => action.execute(name, key),
            FaultPolicy::Isolate => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| action.execute(name, key)));
                if let Err(payload) = result {
                    self.logger.error(&format!(
                        "task {name} ({key}) panicked: {}",
                        panic_message(payload.as_ref())
                    ));
                }
            }
        }
    }

    fn unpark(&self) {
        if let Some(worker) = self.worker.get() {
            worker.unpark();
        }
    }

    fn transition(&self, from: LoopState, to: LoopState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One loop iteration, judged against a single `now` snapshot.
struct Pass<'a> {
    timer: &'a TimerLoop,
    now: Instant,
}

impl BatchHandler for Pass<'_> {
    fn on_empty(&mut self) {
        // An unpark issued after the queue was inspected leaves a permit, so
        // this park returns immediately instead of missing the new task.
        thread::yield_now();
        trace!("queue empty, parking");
        thread::park();
    }

    fn is_header_due(&mut self, head: &Task) -> bool {
        head.run_time() <= self.now
    }

    fn on_header_not_due(&mut self, key: TaskKey, run_time: Instant) {
        thread::yield_now();
        let wait = run_time.saturating_duration_since(self.now);
        debug!(key = %key, wait_ms = wait.as_millis() as u64, "parking until next deadline");
        thread::park_timeout(wait);
        trace!(
            key = %key,
            slept_ms = self.now.elapsed().as_millis() as u64,
            "worker woke"
        );
    }

    fn is_item_due(&mut self, task: &Task) -> bool {
        task.run_time() <= self.now
    }

    fn on_item_fire(&mut self, task: Task) {
        self.timer.dispatch(task, self.now);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
