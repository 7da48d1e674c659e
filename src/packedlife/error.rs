//! Error types for the PackedLife engine.
//!
//! Configuration errors are fatal and only surface from construction.
//! Concurrent-misuse errors are reported to the caller and leave the engine
//! untouched: the rejected operation becomes a no-op.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("grid dimensions must be positive, got {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("task count must be at least 1, got {0}")]
    InvalidTaskCount(usize),

    #[error("flush fraction must be finite and non-negative, got {0}")]
    InvalidFlushFraction(f64),

    /// Word indices are reported to sinks as `u32`.
    #[error("grid {width}x{height} needs more than u32::MAX packed words")]
    GridTooLarge { width: usize, height: usize },

    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(String),

    #[error("workers are already running")]
    AlreadyRunning,

    #[error("workers are stopped; call resume() first")]
    WorkersStopped,
}

impl GridError {
    /// True for errors raised while building an engine.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, GridError::AlreadyRunning | GridError::WorkersStopped)
    }
}

pub type Result<T> = std::result::Result<T, GridError>;
