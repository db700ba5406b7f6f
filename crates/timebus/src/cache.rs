//! Bounded pool of retired task records.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::task::{Task, TaskAction, TaskState};
use crate::{KeyGenerator, TimeUnit};

/// Default pool capacity used by the scheduler.
pub const DEFAULT_CACHE_CAPACITY: usize = 20;

/// Fields carried from one occurrence of a periodic task to the next.
#[derive(Debug, Clone)]
pub(crate) struct TaskTemplate {
    pub name: Arc<str>,
    pub period: Option<u64>,
    pub delay: u64,
    pub unit: TimeUnit,
}

impl TaskTemplate {
    pub fn of(task: &Task) -> Self {
        Self {
            name: task.shared_name(),
            period: task.period(),
            delay: task.delay(),
            unit: task.unit(),
        }
    }
}

/// Recycles retired [`Task`] records so rescheduling does not allocate.
///
/// Best effort: records retired while the pool is full are dropped.
#[derive(Debug)]
pub struct TaskCache {
    max_size: usize,
    pool: Mutex<VecDeque<Task>>,
    keys: KeyGenerator,
}

impl TaskCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            pool: Mutex::new(VecDeque::new()),
            keys: KeyGenerator::new(),
        }
    }

    /// Obtain a record for a new registration, recycled if one is available.
    ///
    /// The returned task owns a fresh cancellation cell and its deadline is
    /// `now + delay`.
    pub fn obtain(
        &self,
        name: impl Into<Arc<str>>,
        period: Option<u64>,
        delay: u64,
        unit: TimeUnit,
        action: Arc<dyn TaskAction>,
    ) -> Task {
        let template = TaskTemplate {
            name: name.into(),
            period,
            delay,
            unit,
        };
        let mut task = self.take(&template, action, None);
        task.init();
        task
    }

    /// Obtain the record for the next occurrence of a periodic registration.
    ///
    /// The caller sets the deadline.
    pub(crate) fn obtain_next(
        &self,
        template: &TaskTemplate,
        action: Arc<dyn TaskAction>,
        state: Arc<TaskState>,
    ) -> Task {
        let task = self.take(template, action, Some(state));
        if let Some(state) = task.state() {
            state.track(task.key());
        }
        task
    }

    /// Retire a record: clear its callback and cancellation, then keep it for
    /// reuse unless the pool is full or already holds a record with this key.
    pub fn add(&self, mut task: Task) {
        task.retire();

        let mut pool = self.pool.lock();
        if pool.len() >= self.max_size {
            trace!(key = %task.key(), "task cache full, dropping record");
            return;
        }
        if pool.iter().any(|cached| cached.key() == task.key()) {
            trace!(key = %task.key(), "record already cached");
            return;
        }
        pool.push_back(task);
    }

    /// Number of records currently available for reuse.
    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    fn take(
        &self,
        template: &TaskTemplate,
        action: Arc<dyn TaskAction>,
        state: Option<Arc<TaskState>>,
    ) -> Task {
        let recycled = self.pool.lock().pop_front();
        match recycled {
            Some(mut task) => {
                let state = state.unwrap_or_else(|| Arc::new(TaskState::new(task.key())));
                task.reinit(
                    Arc::clone(&template.name),
                    template.period,
                    template.delay,
                    template.unit,
                    action,
                    state,
                );
                task
            }
            None => {
                let key = self.keys.generate();
                let state = state.unwrap_or_else(|| Arc::new(TaskState::new(key)));
                Task::new(
                    key,
                    Arc::clone(&template.name),
                    template.period,
                    template.delay,
                    template.unit,
                    action,
                    state,
                )
            }
        }
    }
}

impl Default for TaskCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use proptest::prelude::*;

    use super::*;
    use crate::TaskKey;

    fn noop() -> Arc<dyn TaskAction> {
        Arc::new(|_: &str, _: TaskKey| {})
    }

    #[test]
    fn test_obtain_allocates_fresh_keys_when_empty() {
        let cache = TaskCache::new(4);
        let a = cache.obtain("a", None, 0, TimeUnit::Seconds, noop());
        let b = cache.obtain("b", None, 0, TimeUnit::Seconds, noop());
        assert!(a.key() < b.key());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_obtain_sets_deadline() {
        let cache = TaskCache::new(4);
        let before = Instant::now();
        let task = cache.obtain("a", None, 2, TimeUnit::Seconds, noop());
        assert!(task.run_time() >= before + Duration::from_secs(2));
        assert_eq!(task.state().unwrap().current_key(), task.key());
    }

    #[test]
    fn test_recycled_record_gets_new_fields() {
        let cache = TaskCache::new(4);
        let first = cache.obtain("first", Some(5), 1, TimeUnit::Seconds, noop());
        let key = first.key();
        cache.add(first);
        assert_eq!(cache.len(), 1);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let second = cache.obtain(
            "second",
            None,
            7,
            TimeUnit::Milliseconds,
            Arc::new(move |_: &str, _: TaskKey| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // Object identity is kept, logical fields are replaced
        assert_eq!(second.key(), key);
        assert_eq!(second.name(), "second");
        assert_eq!(second.period(), None);
        assert_eq!(second.delay(), 7);
        assert_eq!(second.unit(), TimeUnit::Milliseconds);
        assert!(!second.is_canceled());

        second.action().unwrap().execute(second.name(), second.key());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_add_clears_callback_and_cancellation() {
        let cache = TaskCache::new(4);
        let task = cache.obtain("a", None, 0, TimeUnit::Seconds, noop());
        let state = Arc::clone(task.state().unwrap());
        state.cancel();
        cache.add(task);

        let pool = cache.pool.lock();
        let cached = pool.front().unwrap();
        assert!(cached.action().is_none());
        assert!(!cached.is_canceled());
        assert!(cached.state().is_none());
    }

    #[test]
    fn test_recycled_record_does_not_inherit_cancellation() {
        let cache = TaskCache::new(4);
        let task = cache.obtain("a", None, 0, TimeUnit::Seconds, noop());
        task.state().unwrap().cancel();
        cache.add(task);

        let reused = cache.obtain("b", None, 0, TimeUnit::Seconds, noop());
        assert!(!reused.is_canceled());
    }

    #[test]
    fn test_add_respects_capacity() {
        let cache = TaskCache::new(2);
        let tasks: Vec<_> = (0..5)
            .map(|_| cache.obtain("a", None, 0, TimeUnit::Seconds, noop()))
            .collect();
        for task in tasks {
            cache.add(task);
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_unbounded_capacity_does_not_preallocate() {
        let cache = TaskCache::new(usize::MAX);
        assert_eq!(cache.capacity(), usize::MAX);
        let task = cache.obtain("a", None, 0, TimeUnit::Seconds, noop());
        cache.add(task);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_add_rejects_duplicate_key() {
        let cache = TaskCache::new(4);
        let key = TaskKey::new(500);
        let make = || {
            Task::new(
                key,
                Arc::from("dup"),
                None,
                0,
                TimeUnit::Seconds,
                noop(),
                Arc::new(TaskState::new(key)),
            )
        };
        cache.add(make());
        cache.add(make());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_obtain_next_shares_registration() {
        let cache = TaskCache::new(4);
        let first = cache.obtain("tick", Some(1), 0, TimeUnit::Seconds, noop());
        let state = Arc::clone(first.state().unwrap());
        let template = TaskTemplate::of(&first);
        let action = Arc::clone(first.action().unwrap());

        cache.add(first);
        let next = cache.obtain_next(&template, action, Arc::clone(&state));

        assert!(next.belongs_to(&state));
        assert_eq!(next.name(), "tick");
        assert_eq!(next.period(), Some(1));
        assert_eq!(state.current_key(), next.key());
    }

    #[test]
    fn test_obtain_next_allocates_when_pool_empty() {
        let cache = TaskCache::new(0);
        let first = cache.obtain("tick", Some(1), 0, TimeUnit::Seconds, noop());
        let state = Arc::clone(first.state().unwrap());
        let template = TaskTemplate::of(&first);
        let first_key = first.key();
        cache.add(first);

        let next = cache.obtain_next(&template, noop(), Arc::clone(&state));
        assert_ne!(next.key(), first_key);
        assert_eq!(state.current_key(), next.key());
    }

    #[test]
    fn test_concurrent_retirements_never_exceed_capacity() {
        let cache = Arc::new(TaskCache::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let tasks: Vec<_> = (0..16)
                        .map(|_| cache.obtain("x", None, 0, TimeUnit::Seconds, noop()))
                        .collect();
                    for task in tasks {
                        cache.add(task);
                        assert!(cache.len() <= 8);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
    }

    proptest! {
        // The pool never holds more than its capacity, whatever the mix of
        // obtains and retirements.
        #[test]
        fn pool_bounded(capacity in 0usize..6, ops in prop::collection::vec(any::<bool>(), 0..64)) {
            let cache = TaskCache::new(capacity);
            let mut live = Vec::new();
            for obtain in ops {
                if obtain || live.is_empty() {
                    live.push(cache.obtain("p", None, 0, TimeUnit::Seconds, noop()));
                } else if let Some(task) = live.pop() {
                    cache.add(task);
                }
                prop_assert!(cache.len() <= capacity);
            }
        }
    }
}
