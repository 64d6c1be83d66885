//! Progress reporting for archive rewrites

use crate::error::PatchError;
use crate::stats::Statistics;
use std::path::Path;
use tracing::{debug, info, warn};

/// Observer of a [`crate::Patcher`] run. Every method defaults to doing
/// nothing.
pub trait ProgressListener {
    /// The rewrite of `source` into `destination` is starting
    fn on_patch_start(&self, _source: &Path, _destination: &Path) {}

    /// Class `name` finished; `index` counts from 1 up to `total`
    fn on_class_transform(&self, _name: &str, _index: usize, _total: usize) {}

    /// Overall progress, 0 to 100
    fn on_progress_update(&self, _percent: u8, _message: &str) {}

    /// The rewrite ended, successfully or with `error`
    fn on_complete(&self, _duration_millis: u64, _stats: &Statistics, _error: Option<&PatchError>) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressListener for NoopProgress {}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressListener for TracingProgress {
    fn on_patch_start(&self, source: &Path, destination: &Path) {
        info!(source = %source.display(), destination = %destination.display(), "Patching plugin");
    }

    fn on_class_transform(&self, name: &str, index: usize, total: usize) {
        debug!(class = name, index, total, "Processed class");
    }

    fn on_progress_update(&self, percent: u8, message: &str) {
        info!(percent, "{}", message);
    }

    fn on_complete(&self, duration_millis: u64, stats: &Statistics, error: Option<&PatchError>) {
        match error {
            None => info!(
                duration_millis,
                scanned = stats.classes_scanned,
                transformed = stats.classes_transformed,
                skipped = stats.classes_skipped,
                "Patch complete"
            ),
            Some(e) => warn!(duration_millis, error = %e, "Patch failed"),
        }
    }
}
