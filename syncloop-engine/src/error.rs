//! Error types for syncloop-engine
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Recoverable playback failures (stalls, buffering, missing
//! assets) are absorbed and surfaced through events or log lines rather
//! than returned as `Err` across the looper boundary; these variants cover
//! the genuinely fallible edges (configuration, backend construction).

use thiserror::Error;

/// Main error type for syncloop-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Asset resolution errors
    #[error("Asset error: {0}")]
    Asset(String),

    /// Media backend errors (player construction, surface binding)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Playback engine errors
    #[error("Playback error: {0}")]
    Playback(String),

    /// Invalid timing parameters
    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using syncloop-engine Error
pub type Result<T> = std::result::Result<T, Error>;
