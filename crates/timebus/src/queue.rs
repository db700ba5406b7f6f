//! Deadline-ordered task queue.
//!
//! Batch extraction is split in two phases. [`DeadlineQueue::take_batch`]
//! decides under the queue lock and returns owned records;
//! [`DeadlineQueue::execute_batch`] then acts on them with the lock released,
//! so a firing task can add its next occurrence to the same queue.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use crate::{Task, TaskKey};

/// Outcome of the guarded phase of a batch extraction.
#[derive(Debug)]
pub enum Batch {
    /// The queue holds no tasks.
    Empty,
    /// The head task is not due yet.
    NotDue { key: TaskKey, run_time: Instant },
    /// Due tasks popped from the head, in queue order.
    Ready(Vec<Task>),
}

/// Callbacks driving [`DeadlineQueue::execute_batch`].
///
/// `is_header_due` and `is_item_due` run while the queue lock is held and must
/// not touch the queue. The remaining methods run after it is released.
pub trait BatchHandler {
    /// The queue was empty.
    fn on_empty(&mut self);

    /// Whether the head task is due.
    fn is_header_due(&mut self, head: &Task) -> bool;

    /// The head task is not due; `run_time` is its deadline.
    fn on_header_not_due(&mut self, key: TaskKey, run_time: Instant);

    /// Whether the next head entry should join the batch.
    fn is_item_due(&mut self, task: &Task) -> bool;

    /// Handle one extracted task.
    fn on_item_fire(&mut self, task: Task);
}

/// Thread-safe queue of pending tasks, sorted ascending by deadline.
///
/// Tasks with equal deadlines keep their insertion order.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `task` before the first entry with a strictly later deadline.
    pub fn add(&self, task: Task) {
        let mut tasks = self.tasks.lock();
        let at = tasks.partition_point(|queued| queued.run_time() <= task.run_time());
        tasks.insert(at, task);
    }

    /// Remove the task with `key`. `None` means it already fired or was removed.
    pub fn remove(&self, key: TaskKey) -> Option<Task> {
        self.remove_where(|task| task.key() == key)
    }

    /// Remove the first task matching `predicate`.
    pub fn remove_where(&self, predicate: impl Fn(&Task) -> bool) -> Option<Task> {
        let mut tasks = self.tasks.lock();
        let index = tasks.iter().position(predicate)?;
        tasks.remove(index)
    }

    /// Guarded phase: inspect the head and pop up to `max` consecutive due
    /// tasks. Always extracts at least one task when the head is due.
    pub fn take_batch<H: BatchHandler + ?Sized>(&self, max: usize, handler: &mut H) -> Batch {
        let mut tasks = self.tasks.lock();

        let Some(head) = tasks.front() else {
            return Batch::Empty;
        };
        if !handler.is_header_due(head) {
            return Batch::NotDue {
                key: head.key(),
                run_time: head.run_time(),
            };
        }

        let max = max.max(1);
        let mut batch = Vec::with_capacity(max.min(tasks.len()));
        while batch.len() < max {
            if !tasks.front().is_some_and(|task| handler.is_item_due(task)) {
                break;
            }
            if let Some(task) = tasks.pop_front() {
                batch.push(task);
            }
        }
        Batch::Ready(batch)
    }

    /// Run [`Self::take_batch`], then dispatch the outcome with the lock released.
    pub fn execute_batch<H: BatchHandler + ?Sized>(&self, max: usize, handler: &mut H) {
        match self.take_batch(max, handler) {
            Batch::Empty => handler.on_empty(),
            Batch::NotDue { key, run_time } => handler.on_header_not_due(key, run_time),
            Batch::Ready(batch) => {
                for task in batch {
                    handler.on_item_fire(task);
                }
            }
        }
    }

    /// Key and deadline of the head task.
    pub fn peek_deadline(&self) -> Option<(TaskKey, Instant)> {
        self.tasks
            .lock()
            .front()
            .map(|task| (task.key(), task.run_time()))
    }

    /// Drop every queued task. Actions are dropped after the lock is released.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.tasks.lock());
        drop(drained);
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<TaskKey> {
        self.tasks.lock().iter().map(Task::key).collect()
    }
}
