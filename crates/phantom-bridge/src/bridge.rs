//! The bridge instance rewritten plugins call into
//!
//! A [`Bridge`] is constructed once per plugin, initialized from the
//! plugin's enable hook and torn down from its disable hook. Between the
//! two it translates single-threaded calls onto the region scheduler:
//!
//! - `post` runs work on the tier owning a context, inline when the caller
//!   already owns it
//! - `fetch` does the same but waits for the result, bounded by
//!   `api_timeout`
//! - the `run_task*` family reproduces the legacy scheduler on top of the
//!   region scheduler and hands out legacy numeric task ids

use crate::error::BridgeError;
use crate::generator::{ChunkGenerator, DelegatingGenerator};
use crate::mirror::{Mirror, ServerView, Snapshot};
use crate::scheduler::{Job, Lane, RegionScheduler, ScheduledTask, Timing, MILLIS_PER_TICK};
use crate::task::{TaskHandle, TaskId, TaskTable};
use crate::tier::{Context, Tier};
use crate::world::WorldWorker;
use crossbeam::channel::{self, RecvTimeoutError};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Duration;

/// Runtime settings baked into the bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bound on every synchronous cross-thread call
    pub api_timeout: Duration,
    /// Post every event call instead of waiting for it
    pub fire_and_forget: bool,
    /// Event names posted instead of awaited when `fire_and_forget` is off
    pub fire_and_forget_events: FxHashSet<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_millis(100),
            fire_and_forget: false,
            fire_and_forget_events: FxHashSet::default(),
        }
    }
}

/// Marks a one-shot task complete when its body returns or unwinds
struct Completion<'a, T: ScheduledTask> {
    table: &'a TaskTable<T>,
    id: TaskId,
    generation: u64,
}

impl<T: ScheduledTask> Drop for Completion<'_, T> {
    fn drop(&mut self) {
        self.table.complete(self.id, self.generation);
    }
}

/// Compatibility bridge for one plugin
pub struct Bridge<S: RegionScheduler> {
    scheduler: Arc<S>,
    server: Arc<dyn ServerView>,
    config: BridgeConfig,
    tasks: Arc<TaskTable<S::Task>>,
    mirror: Arc<Mirror>,
    plugin: OnceCell<String>,
    mirror_task: Mutex<Option<S::Task>>,
    world: Mutex<Option<WorldWorker>>,
}

impl<S: RegionScheduler> Bridge<S> {
    /// Create a bridge over `scheduler`, reading server state from `server`
    pub fn new(
        scheduler: Arc<S>,
        server: Arc<dyn ServerView>,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        Ok(Self {
            scheduler,
            server,
            config,
            tasks: Arc::new(TaskTable::new()),
            mirror: Arc::new(Mirror::new()),
            plugin: OnceCell::new(),
            mirror_task: Mutex::new(None),
            world: Mutex::new(Some(WorldWorker::start()?)),
        })
    }

    /// Settings in effect
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ===== Lifecycle =====

    /// Bind the bridge to `plugin` and start the snapshot mirror. Only the
    /// first call has any effect; returns whether this call initialized.
    pub fn init(&self, plugin: &str) -> bool {
        if self.plugin.set(plugin.to_string()).is_err() {
            tracing::debug!(plugin, "bridge already initialized");
            return false;
        }
        let mirror = Arc::clone(&self.mirror);
        let server = Arc::clone(&self.server);
        let task = self.scheduler.submit(
            Lane::Sync(Tier::Global),
            Timing::FixedRate {
                delay: 1,
                period: 1,
            },
            Box::new(move || mirror.refresh(server.as_ref())),
        );
        *self.mirror_task.lock() = Some(task);
        tracing::info!(plugin, "bridge initialized");
        true
    }

    /// Plugin the bridge was initialized for
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.get().map(String::as_str)
    }

    /// Cancel every task, stop the mirror and the world worker. Returns how
    /// many plugin tasks were cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.tasks.cancel_all();
        if let Some(task) = self.mirror_task.lock().take() {
            task.cancel();
        }
        if let Some(mut worker) = self.world.lock().take() {
            worker.stop();
        }
        tracing::info!(cancelled, plugin = self.plugin().unwrap_or(""), "bridge shut down");
        cancelled
    }

    // ===== Context-affine calls =====

    /// Run `f` on the tier owning `context`
    pub fn post<F>(&self, context: &Context, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let tier = context.tier();
        if self.scheduler.owns(&tier) {
            f();
            return;
        }
        let mut f = Some(f);
        self.scheduler.submit(
            Lane::Sync(tier),
            Timing::Now,
            Box::new(move || {
                if let Some(f) = f.take() {
                    f();
                }
            }),
        );
    }

    /// Run `f` on the tier owning `context` and wait for its result
    pub fn fetch<T, F>(&self, context: &Context, f: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let tier = context.tier();
        if self.scheduler.owns(&tier) {
            return Ok(f());
        }
        let (reply, result) = channel::bounded(1);
        let mut f = Some(f);
        let task = self.scheduler.submit(
            Lane::Sync(tier.clone()),
            Timing::Now,
            Box::new(move || {
                if let Some(f) = f.take() {
                    let _ = reply.send(f());
                }
            }),
        );
        match result.recv_timeout(self.config.api_timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                task.cancel();
                let waited_ms = self.config.api_timeout.as_millis() as u64;
                tracing::warn!(%tier, waited_ms, "synchronous call timed out");
                Err(BridgeError::Timeout { waited_ms })
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Dropped),
        }
    }

    /// Fire an event: posted to the global tier when configured as
    /// fire-and-forget, otherwise awaited there
    pub fn call_event<F>(&self, event: &str, fire: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.config.fire_and_forget || self.config.fire_and_forget_events.contains(event) {
            self.post(&Context::Global, fire);
            Ok(())
        } else {
            self.fetch(&Context::Global, fire)
        }
    }

    // ===== Snapshot reads =====

    /// Latest player/world snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.mirror.current()
    }

    // ===== Legacy scheduler =====

    /// Submit a one-shot job and track it in the task table
    fn schedule_once<F>(&self, lane: Lane, timing: Timing, f: F) -> TaskHandle<S::Task>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.tasks.reserve(matches!(lane, Lane::Sync(_)));
        let table = Arc::clone(&self.tasks);
        let (id, generation) = (handle.id(), handle.generation());
        let mut f = Some(f);
        let job: Job = Box::new(move || {
            if let Some(f) = f.take() {
                let _done = Completion {
                    table: &table,
                    id,
                    generation,
                };
                f();
            }
        });
        handle.attach(self.scheduler.submit(lane, timing, job));
        handle
    }

    /// Submit a repeating job and track it in the task table
    fn schedule_repeating<F>(&self, lane: Lane, delay: u64, period: u64, f: F) -> TaskHandle<S::Task>
    where
        F: FnMut() + Send + 'static,
    {
        let handle = self.tasks.reserve(matches!(lane, Lane::Sync(_)));
        let task = self
            .scheduler
            .submit(lane, Timing::FixedRate { delay, period }, Box::new(f));
        handle.attach(task);
        handle
    }

    fn sync_lane(context: Option<&Context>) -> Lane {
        Lane::Sync(context.map_or(Tier::Global, Context::tier))
    }

    /// Run on the next tick of the context's tier (global when absent)
    pub fn run_task<F>(&self, context: Option<&Context>, f: F) -> TaskHandle<S::Task>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_once(Self::sync_lane(context), Timing::Now, f)
    }

    /// Run after `delay` ticks, at least one
    pub fn run_task_later<F>(&self, context: Option<&Context>, f: F, delay: u64) -> TaskHandle<S::Task>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_once(Self::sync_lane(context), Timing::Delayed(delay.max(1)), f)
    }

    /// Run every `period` ticks after `delay` ticks, both at least one
    pub fn run_task_timer<F>(
        &self,
        context: Option<&Context>,
        f: F,
        delay: u64,
        period: u64,
    ) -> TaskHandle<S::Task>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_repeating(Self::sync_lane(context), delay.max(1), period.max(1), f)
    }

    /// Run on the async pool now
    pub fn run_task_asynchronously<F>(&self, f: F) -> TaskHandle<S::Task>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_once(Lane::Async, Timing::Now, f)
    }

    /// Run on the async pool after `delay` ticks' worth of milliseconds
    pub fn run_task_later_asynchronously<F>(&self, f: F, delay: u64) -> TaskHandle<S::Task>
    where
        F: FnOnce() + Send + 'static,
    {
        let millis = delay.saturating_mul(MILLIS_PER_TICK);
        self.schedule_once(Lane::Async, Timing::Delayed(millis), f)
    }

    /// Repeat on the async pool, with tick counts converted to milliseconds
    pub fn run_task_timer_asynchronously<F>(&self, f: F, delay: u64, period: u64) -> TaskHandle<S::Task>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_repeating(
            Lane::Async,
            delay.saturating_mul(MILLIS_PER_TICK),
            period.saturating_mul(MILLIS_PER_TICK),
            f,
        )
    }

    /// Run an event handler body off the region threads
    pub fn execute_async<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_once(Lane::Async, Timing::Now, f);
    }

    /// Cancel a task by its legacy id
    pub fn cancel_task(&self, id: i32) -> bool {
        self.tasks.cancel(TaskId::from_legacy(id))
    }

    /// Cancel every task the plugin scheduled
    pub fn cancel_tasks(&self) -> usize {
        self.tasks.cancel_all()
    }

    /// Tasks scheduled and not yet finished or cancelled
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    // ===== World generation =====

    /// Create a world on the dedicated world worker and wait for it
    pub fn create_world<T, F>(&self, create: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let submitter = self
            .world
            .lock()
            .as_ref()
            .and_then(WorldWorker::submitter)
            .ok_or(BridgeError::ShutDown)?;
        submitter.run(create)
    }

    /// Wrap the plugin's default world generator
    pub fn default_world_generator(
        &self,
        generator: Option<Box<dyn ChunkGenerator>>,
    ) -> Option<DelegatingGenerator> {
        DelegatingGenerator::wrap(generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{PlayerRef, WorldRef};
    use crate::scheduler::ManualScheduler;
    use crate::tier::{EntityId, Location};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoServer;

    impl ServerView for NoServer {
        fn online_players(&self) -> Vec<PlayerRef> {
            Vec::new()
        }

        fn worlds(&self) -> Vec<WorldRef> {
            Vec::new()
        }
    }

    fn bridge() -> (Arc<ManualScheduler>, Bridge<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let bridge = Bridge::new(
            Arc::clone(&scheduler),
            Arc::new(NoServer),
            BridgeConfig {
                api_timeout: Duration::from_millis(20),
                ..BridgeConfig::default()
            },
        )
        .unwrap();
        (scheduler, bridge)
    }

    #[test]
    fn test_init_is_one_shot() {
        let (scheduler, bridge) = bridge();
        assert!(bridge.init("Demo"));
        assert!(!bridge.init("Other"));
        assert_eq!(bridge.plugin(), Some("Demo"));
        // one mirror task only
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_post_waits_for_tick() {
        let (scheduler, bridge) = bridge();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bridge.post(&Context::Entity(EntityId(3)), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_one_shot_task_leaves_table() {
        let (scheduler, bridge) = bridge();
        let handle = bridge.run_task_later(None, || {}, 0);
        assert!(handle.is_sync());
        assert_eq!(bridge.pending_tasks(), 1);
        scheduler.tick();
        assert_eq!(bridge.pending_tasks(), 0);
        assert!(!handle.cancel());
    }

    #[test]
    fn test_timer_runs_until_cancelled_by_id() {
        let (scheduler, bridge) = bridge();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let location = Context::Location(Location::new("world", 10.0, 64.0, 10.0));
        let handle = bridge.run_task_timer(
            Some(&location),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
            0,
            0,
        );
        scheduler.tick();
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(bridge.cancel_task(handle.id().legacy()));
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_async_handle_is_not_sync() {
        let (scheduler, bridge) = bridge();
        let handle = bridge.run_task_later_asynchronously(|| {}, 2);
        assert!(!handle.is_sync());
        scheduler.tick();
        assert_eq!(bridge.pending_tasks(), 1);
        scheduler.tick();
        assert_eq!(bridge.pending_tasks(), 0);
    }

    #[test]
    fn test_fire_and_forget_event_does_not_wait() {
        let scheduler = Arc::new(ManualScheduler::new());
        let mut events = FxHashSet::default();
        events.insert("PlayerMoveEvent".to_string());
        let bridge = Bridge::new(
            Arc::clone(&scheduler),
            Arc::new(NoServer),
            BridgeConfig {
                api_timeout: Duration::from_millis(10),
                fire_and_forget: false,
                fire_and_forget_events: events,
            },
        )
        .unwrap();
        assert!(bridge.call_event("PlayerMoveEvent", || {}).is_ok());
        assert!(matches!(
            bridge.call_event("BlockBreakEvent", || {}),
            Err(BridgeError::Timeout { waited_ms: 10 })
        ));
    }

    #[test]
    fn test_shutdown_cancels_and_stops_world_worker() {
        let (scheduler, bridge) = bridge();
        bridge.init("Demo");
        bridge.run_task(None, || {});
        bridge.run_task_timer_asynchronously(|| {}, 1, 1);
        assert_eq!(bridge.shutdown(), 2);
        assert_eq!(scheduler.pending(), 0);
        assert!(matches!(bridge.create_world(|| ()), Err(BridgeError::ShutDown)));
    }
}
