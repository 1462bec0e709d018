//! Server source trait and fetch errors.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while listing servers.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body is not the expected JSON.
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured endpoint is not a valid URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// A directory of dedicated servers.
///
/// Records are returned raw; normalization happens in the builder so a
/// single malformed record does not fail the whole listing.
#[async_trait]
pub trait ServerSource: Send + Sync {
    /// List every server on the account.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport, authentication or decode
    /// failures.
    async fn list_servers(&self) -> Result<Vec<Value>, FetchError>;
}

/// A fixed list of records, for tests and offline use.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    servers: Vec<Value>,
}

impl StaticSource {
    #[must_use]
    pub fn new(servers: Vec<Value>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ServerSource for StaticSource {
    async fn list_servers(&self) -> Result<Vec<Value>, FetchError> {
        Ok(self.servers.clone())
    }
}
