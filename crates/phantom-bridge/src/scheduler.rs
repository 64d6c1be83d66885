//! Client interface to the platform's region scheduler

use crate::tier::Tier;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Work submitted to a scheduler. One-shot jobs are called once; repeating
/// jobs are called once per period until cancelled.
pub type Job = Box<dyn FnMut() + Send + 'static>;

/// Milliseconds in one server tick
pub const MILLIS_PER_TICK: u64 = 50;

/// Where a job runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lane {
    /// On the thread owning a tier, measured in ticks
    Sync(Tier),
    /// On the async pool, measured in milliseconds
    Async,
}

/// When a job runs. Units are ticks on [`Lane::Sync`] and milliseconds on
/// [`Lane::Async`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Timing {
    /// As soon as possible
    Now,
    /// Once, after a delay
    Delayed(u64),
    /// Repeatedly, first after `delay` and then every `period`
    FixedRate {
        /// Initial delay
        delay: u64,
        /// Interval between runs
        period: u64,
    },
}

/// A task accepted by the platform scheduler
pub trait ScheduledTask: Send + Sync + 'static {
    /// Stop the task; cancelling twice is a no-op
    fn cancel(&self);

    /// Whether the task was cancelled
    fn is_cancelled(&self) -> bool;
}

/// The platform scheduler the bridge is a client of
pub trait RegionScheduler: Send + Sync + 'static {
    /// Handle type returned for accepted jobs
    type Task: ScheduledTask;

    /// Whether the calling thread currently owns `tier`, so that work for
    /// it may run inline
    fn owns(&self, tier: &Tier) -> bool;

    /// Accept a job
    fn submit(&self, lane: Lane, timing: Timing, job: Job) -> Self::Task;
}

/// Task handle of [`ManualScheduler`]
#[derive(Debug, Clone, Default)]
pub struct ManualTask {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask for ManualTask {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct Pending {
    due: u64,
    seq: u64,
    period: Option<u64>,
    job: Job,
    task: ManualTask,
}

#[derive(Default)]
struct ManualState {
    now: u64,
    seq: u64,
    pending: Vec<Pending>,
}

/// Deterministic scheduler driven by explicit [`tick`](Self::tick) calls
///
/// The thread inside `tick` owns every tier, like a single main thread.
/// Async jobs run on the ticking thread too, rounded up to whole ticks.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
    owner: Mutex<Option<ThreadId>>,
}

impl ManualScheduler {
    /// Create an idle scheduler at tick 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks elapsed so far
    pub fn current_tick(&self) -> u64 {
        self.state.lock().now
    }

    /// Jobs waiting to run, cancelled ones excluded
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .pending
            .iter()
            .filter(|p| !p.task.is_cancelled())
            .count()
    }

    /// Advance one tick and run every job that became due, in submission
    /// order. Returns how many jobs ran.
    pub fn tick(&self) -> usize {
        let (now, mut due) = {
            let mut state = self.state.lock();
            state.now += 1;
            let now = state.now;
            let pending = std::mem::take(&mut state.pending);
            let (due, waiting): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|p| p.due <= now);
            state.pending = waiting;
            (now, due)
        };
        due.sort_by_key(|p| (p.due, p.seq));

        *self.owner.lock() = Some(thread::current().id());
        let mut ran = 0;
        let mut again = Vec::new();
        for mut pending in due {
            if pending.task.is_cancelled() {
                continue;
            }
            (pending.job)();
            ran += 1;
            if let Some(period) = pending.period {
                if !pending.task.is_cancelled() {
                    pending.due = now + period;
                    again.push(pending);
                }
            }
        }
        *self.owner.lock() = None;

        if !again.is_empty() {
            self.state.lock().pending.extend(again);
        }
        ran
    }

    fn ticks(lane: &Lane, amount: u64) -> u64 {
        match lane {
            Lane::Sync(_) => amount,
            Lane::Async => amount.div_ceil(MILLIS_PER_TICK),
        }
    }
}

impl RegionScheduler for ManualScheduler {
    type Task = ManualTask;

    fn owns(&self, _tier: &Tier) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    fn submit(&self, lane: Lane, timing: Timing, job: Job) -> ManualTask {
        let task = ManualTask::default();
        let mut state = self.state.lock();
        let (delay, period) = match timing {
            Timing::Now => (0, None),
            Timing::Delayed(delay) => (Self::ticks(&lane, delay), None),
            Timing::FixedRate { delay, period } => (
                Self::ticks(&lane, delay),
                Some(Self::ticks(&lane, period).max(1)),
            ),
        };
        state.seq += 1;
        let pending = Pending {
            due: state.now + delay,
            seq: state.seq,
            period,
            job,
            task: task.clone(),
        };
        state.pending.push(pending);
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_delayed_job_waits() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.submit(Lane::Sync(Tier::Global), Timing::Delayed(3), counter_job(&count));
        scheduler.tick();
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_fixed_rate_until_cancelled() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let task = scheduler.submit(
            Lane::Sync(Tier::Global),
            Timing::FixedRate { delay: 1, period: 2 },
            counter_job(&count),
        );
        for _ in 0..5 {
            scheduler.tick();
        }
        // ticks 1, 3, 5
        assert_eq!(count.load(Ordering::SeqCst), 3);
        task.cancel();
        scheduler.tick();
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_async_millis_round_up() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.submit(Lane::Async, Timing::Delayed(60), counter_job(&count));
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_owner_only_inside_tick() {
        let scheduler = Arc::new(ManualScheduler::new());
        assert!(!scheduler.owns(&Tier::Global));
        let seen = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&scheduler);
        let flag = Arc::clone(&seen);
        scheduler.submit(
            Lane::Sync(Tier::Global),
            Timing::Now,
            Box::new(move || flag.store(inner.owns(&Tier::Global), Ordering::SeqCst)),
        );
        scheduler.tick();
        assert!(seen.load(Ordering::SeqCst));
    }
}
