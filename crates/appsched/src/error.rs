//! Scheduler and poll policy errors.

use smol_str::SmolStr;
use thiserror::Error;

/// Errors returned by the slot pool, the scheduler and the poll policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// Slot pool or task queue capacity reached.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// Handle does not refer to a slot currently in use.
    #[error("invalid handle")]
    InvalidHandle,

    /// Malformed argument or unknown task handle.
    #[error("invalid parameter: {0}")]
    InvalidParameter(SmolStr),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),

    /// Co-processor link no longer accepts poll requests.
    #[error("poll link closed")]
    LinkClosed,

    /// Timer service failure.
    #[error("timer error: {0}")]
    Timer(SmolStr),
}

impl SchedError {
    pub(crate) fn invalid_parameter(reason: impl Into<SmolStr>) -> Self {
        Self::InvalidParameter(reason.into())
    }
}
