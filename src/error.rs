//! Error types for the reloader service.

/// Top-level error type for the reload manager.
#[derive(Debug, thiserror::Error)]
pub enum ReloaderError {
    /// Rule validation failure (empty pattern, bad interval, duplicate).
    #[error("rule error: {0}")]
    Rule(#[from] crate::rules::RuleError),

    /// Persisted store error (read, parse, write).
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Remote bookmark service error.
    #[error("remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    /// Incomplete or rejected login hand-off.
    #[error("auth error: {0}")]
    Auth(String),

    /// Browser platform error (tab query, reload).
    #[error("platform error: {0}")]
    Platform(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Host bridge protocol error.
    #[error("host error: {0}")]
    Host(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ReloaderError>;
