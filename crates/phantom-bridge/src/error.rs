//! Bridge errors

use thiserror::Error;

/// Errors raised by bridge entry points
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A synchronous call was not answered within the configured bound
    #[error("scheduled call did not complete within {waited_ms}ms")]
    Timeout {
        /// How long the caller waited
        waited_ms: u64,
    },

    /// The scheduler discarded the call without running it (e.g. the
    /// owning entity was removed)
    #[error("scheduled call was dropped before it ran")]
    Dropped,

    /// The bridge was shut down
    #[error("bridge has been shut down")]
    ShutDown,

    /// The world worker thread could not be started
    #[error("failed to start world worker: {0}")]
    Spawn(#[from] std::io::Error),
}
