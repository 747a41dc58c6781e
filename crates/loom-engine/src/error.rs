//! Error types for loom-engine

use thiserror::Error;

/// Result type alias using loom-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// The backend handle could not open a stream; the turn was aborted
    /// before any message was added to history
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An error reported by the backend mid-stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// A generic engine error
    #[error("{0}")]
    Other(String),
}
