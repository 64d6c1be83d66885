//! Patch statistics

use serde::{Deserialize, Serialize};

/// Counters for one archive rewrite
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Class entries looked at
    pub classes_scanned: usize,
    /// Classes written with at least one rewrite
    pub classes_transformed: usize,
    /// Classes written unchanged, failed ones included
    pub classes_skipped: usize,
    /// Wall-clock time of the rewrite
    pub duration_millis: u64,
    /// Fatal error, if the rewrite failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Statistics {
    /// Whether the rewrite completed
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
