//! Phantom plugin patcher
//!
//! Rewrites Bukkit plugin archives so they run on region-threaded servers:
//! - Call-site rules redirect thread-affine API calls to a generated bridge
//! - Method-level rules add lifecycle hooks, cancelled-event guards and
//!   async handler dispatch
//! - The bridge classes are generated per plugin and bundled into the
//!   archive under a relocated package
//!
//! [`Patcher`] drives one archive; [`chain::transform`] rewrites a single
//! class.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod archive;
pub mod bundle;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod manifest;
pub mod methods;
pub mod pool;
pub mod progress;
pub mod rules;
pub mod scan;
pub mod stats;

pub use archive::{is_folia_supported, plugin_name, Patcher};
pub use bundle::{BridgeNames, EntryPlan};
pub use chain::{transform, ClassOutcome, ClassStatus, PatchContext};
pub use config::PatcherConfig;
pub use context::{ArchiveIndex, ContextBinding};
pub use error::{ConfigError, Diagnostic, PatchError, TransformError};
pub use pool::TransformPool;
pub use progress::{NoopProgress, ProgressListener, TracingProgress};
pub use rules::{catalog, CallSiteRule, GroupSet, RuleGroup};
pub use stats::Statistics;
