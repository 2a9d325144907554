//! Error types for the bookmark service client.

/// Failure talking to the bookmark service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// The service answered with a non-success status.
    #[error("API error {status} for {path}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase for the status.
        status_text: String,
        /// Response body, possibly empty.
        body: String,
        /// Request path relative to the base URL.
        path: String,
    },

    /// The request never produced a response (connect, TLS, timeout).
    #[error("request to {path} failed: {message}")]
    Transport { path: String, message: String },

    /// The response body was not the expected JSON.
    #[error("invalid response from {path}: {message}")]
    Decode { path: String, message: String },
}

impl RemoteError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Api { status: 429, .. } => "rate_limited",
            Self::Api { status: 401, .. } => "unauthorized",
            Self::Api { .. } => "api_error",
            Self::Transport { .. } => "transport",
            Self::Decode { .. } => "decode",
        }
    }

    /// HTTP status, for API errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Decode { .. } => None,
        }
    }
}
