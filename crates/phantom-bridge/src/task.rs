//! Legacy task handles and the table that tracks them
//!
//! Plugins written for the single-threaded scheduler identify tasks by a
//! numeric id and cancel them by id. Every scheduled job gets an entry here
//! until it completes or is cancelled. Entries carry a generation token and
//! are only ever removed with compare-and-remove on it, so completion and
//! cancellation can race without one removing the other's entry.

use crate::scheduler::ScheduledTask;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// First id handed out, above any id the legacy scheduler would use
pub const FIRST_TASK_ID: u64 = 1_000_000;

/// Numeric task id
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }

    /// The id as the 32-bit integer legacy callers see
    pub fn legacy(self) -> i32 {
        self.0 as i32
    }

    /// Id from a legacy 32-bit value
    pub fn from_legacy(id: i32) -> Self {
        TaskId(u64::from(id as u32))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct TaskEntry<T> {
    generation: u64,
    sync: bool,
    task: OnceCell<T>,
    cancelled: AtomicBool,
}

impl<T: ScheduledTask> TaskEntry<T> {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.get() {
            task.cancel();
        }
    }
}

/// Concurrent table of live tasks
pub struct TaskTable<T> {
    next_id: AtomicU64,
    next_generation: AtomicU64,
    entries: DashMap<TaskId, Arc<TaskEntry<T>>>,
}

impl<T: ScheduledTask> TaskTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(FIRST_TASK_ID),
            next_generation: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    /// Reserve an id and register an entry for a task about to be
    /// submitted. The returned handle is attached to the scheduler's task
    /// with [`TaskHandle::attach`].
    pub fn reserve(self: &Arc<Self>, sync: bool) -> TaskHandle<T> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(TaskEntry {
            generation,
            sync,
            task: OnceCell::new(),
            cancelled: AtomicBool::new(false),
        });
        self.entries.insert(id, Arc::clone(&entry));
        TaskHandle {
            id,
            entry,
            table: Arc::clone(self),
        }
    }

    /// Remove a finished task's entry. Returns false if it was already
    /// removed (cancelled, or the id now names another task).
    pub fn complete(&self, id: TaskId, generation: u64) -> bool {
        self.entries
            .remove_if(&id, |_, entry| entry.generation == generation)
            .is_some()
    }

    fn cancel_generation(&self, id: TaskId, generation: u64) -> bool {
        match self
            .entries
            .remove_if(&id, |_, entry| entry.generation == generation)
        {
            Some((_, entry)) => {
                entry.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel whatever task is registered under `id`
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                entry.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered task and return how many there were
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TaskId> = self.entries.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ScheduledTask> Default for TaskTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Legacy task handle handed back to plugin code
pub struct TaskHandle<T: ScheduledTask> {
    id: TaskId,
    entry: Arc<TaskEntry<T>>,
    table: Arc<TaskTable<T>>,
}

impl<T: ScheduledTask> TaskHandle<T> {
    /// Task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Generation token of the entry
    pub fn generation(&self) -> u64 {
        self.entry.generation
    }

    /// Whether the task runs on a synchronous tier
    pub fn is_sync(&self) -> bool {
        self.entry.sync
    }

    /// Bind the scheduler's task. If the handle was cancelled before the
    /// task existed, the task is cancelled right away.
    pub fn attach(&self, task: T) {
        if self.entry.task.set(task).is_ok() && self.entry.cancelled.load(Ordering::SeqCst) {
            if let Some(task) = self.entry.task.get() {
                task.cancel();
            }
        }
    }

    /// Cancel this task. Only this handle's entry is removed; returns false
    /// if it had already completed or been cancelled.
    pub fn cancel(&self) -> bool {
        self.table.cancel_generation(self.id, self.entry.generation)
    }

    /// Whether this task was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.entry.cancelled.load(Ordering::SeqCst)
            || self.entry.task.get().is_some_and(|t| t.is_cancelled())
    }
}

impl<T: ScheduledTask> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            entry: Arc::clone(&self.entry),
            table: Arc::clone(&self.table),
        }
    }
}

impl<T: ScheduledTask> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("sync", &self.entry.sync)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualTask;

    fn table() -> Arc<TaskTable<ManualTask>> {
        Arc::new(TaskTable::new())
    }

    #[test]
    fn test_ids_start_high_and_increase() {
        let table = table();
        let a = table.reserve(true);
        let b = table.reserve(false);
        assert_eq!(a.id().as_u64(), FIRST_TASK_ID);
        assert_eq!(b.id().as_u64(), FIRST_TASK_ID + 1);
        assert_eq!(a.id().legacy(), 1_000_000);
        assert_eq!(TaskId::from_legacy(a.id().legacy()), a.id());
        assert!(a.is_sync());
        assert!(!b.is_sync());
    }

    #[test]
    fn test_cancel_only_affects_own_task() {
        let table = table();
        let a = table.reserve(true);
        let b = table.reserve(true);
        a.attach(ManualTask::default());
        b.attach(ManualTask::default());
        assert!(a.cancel());
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(table.contains(b.id()));
        assert!(!table.contains(a.id()));
    }

    #[test]
    fn test_cancel_completion_race_has_one_winner() {
        let table = table();
        let handle = table.reserve(true);
        handle.attach(ManualTask::default());
        assert!(table.complete(handle.id(), handle.generation()));
        assert!(!handle.cancel());
        assert!(!table.complete(handle.id(), handle.generation()));
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let table = table();
        let handle = table.reserve(true);
        assert!(!table.complete(handle.id(), handle.generation() + 1));
        assert!(table.contains(handle.id()));
    }

    #[test]
    fn test_cancel_before_attach() {
        let table = table();
        let handle = table.reserve(true);
        assert!(handle.cancel());
        let task = ManualTask::default();
        handle.attach(task.clone());
        assert!(task.is_cancelled());
    }

    #[test]
    fn test_cancel_all() {
        let table = table();
        let handles: Vec<_> = (0..4).map(|_| table.reserve(true)).collect();
        for handle in &handles {
            handle.attach(ManualTask::default());
        }
        assert_eq!(table.cancel_all(), 4);
        assert!(table.is_empty());
        assert!(handles.iter().all(|h| h.is_cancelled()));
    }
}
