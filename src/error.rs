//! Crate-wide error type.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the counting engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid construction or query parameter.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The memory budget could not be satisfied.
    #[error("allocation failed: {0}")]
    OutOfMemory(String),

    /// I/O error while spilling, merging or loading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A batch or index file did not parse back.
    #[error("corrupt batch file: {0}")]
    CorruptBatch(String),

    /// Operation called in the wrong engine state.
    #[error("invalid state: {0}")]
    State(String),
}
