//! Error types surfaced by the pool's public API.

use thiserror::Error;

/// Returned by submissions after the pool has begun shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("thread pool has been shut down")]
pub struct ShutdownError;

/// Returned when pool settings fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("max_threads must be at least 1")]
    ZeroMaxThreads,
    #[error("min_threads ({min}) exceeds max_threads ({max})")]
    MinAboveMax { min: u32, max: u32 },
    #[error("thread_timeout must be positive")]
    ZeroTimeout,
    #[error("max_threads ({0}) exceeds the supported worker limit")]
    TooManyThreads(u32),
}
