//! Authenticated access to the remote bookmark service.
//!
//! [`RemoteApi`] is the seam the reconciliation engine depends on. The
//! production implementation is [`RemoteClient`], which adds rate-limit
//! backoff and OAuth token refresh on top of plain JSON requests.

pub mod client;
pub mod error;

pub use client::{RefreshedToken, RemoteClient, backoff_delay};
pub use error::RemoteError;

use async_trait::async_trait;
use serde_json::Value;

/// JSON request surface of the bookmark service.
///
/// Paths are relative to the configured base URL (e.g. `/collections`).
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Access token for the next batch of requests, refreshed when close to
    /// expiry. `None` when no usable credential is stored.
    async fn active_token(&self) -> Option<String>;

    /// `GET path`.
    async fn get(&self, path: &str, token: &str) -> Result<Value, RemoteError>;

    /// `POST path` with a JSON body.
    async fn post(&self, path: &str, body: &Value, token: &str) -> Result<Value, RemoteError>;

    /// `PUT path` with a JSON body.
    async fn put(&self, path: &str, body: &Value, token: &str) -> Result<Value, RemoteError>;

    /// `DELETE path`. An empty response body counts as success.
    async fn delete(&self, path: &str, token: &str) -> Result<Value, RemoteError>;
}
