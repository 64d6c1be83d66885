//! Phantom runtime bridge
//!
//! Runtime model of the compatibility layer that rewritten plugins call
//! into. Calls written for a single main thread are translated onto a
//! region scheduler: work is posted to the entity, region or global tier
//! that owns it, synchronous reads round-trip with a bounded wait, and
//! legacy numeric task handles are tracked in a concurrent table.
//!
//! The scheduler itself is supplied by the embedder through
//! [`RegionScheduler`]; [`ManualScheduler`] is a deterministic in-process
//! implementation driven by explicit ticks.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod error;
pub mod generator;
pub mod mirror;
pub mod scheduler;
pub mod task;
pub mod tier;
pub mod world;

pub use bridge::{Bridge, BridgeConfig};
pub use error::BridgeError;
pub use generator::{ChunkData, ChunkGenerator, DelegatingGenerator};
pub use mirror::{Mirror, PlayerRef, ServerView, Snapshot, WorldRef};
pub use scheduler::{
    Job, Lane, ManualScheduler, ManualTask, RegionScheduler, ScheduledTask, Timing, MILLIS_PER_TICK,
};
pub use task::{TaskHandle, TaskId, TaskTable, FIRST_TASK_ID};
pub use tier::{ChunkPos, Context, EntityId, Location, Tier};
pub use world::{WorldSubmitter, WorldWorker, WORLD_WORKER_NAME};
