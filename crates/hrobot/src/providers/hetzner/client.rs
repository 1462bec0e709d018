//! Hetzner Robot API client implementation.
//!
//! API Documentation: <https://robot.hetzner.com/doc/webservice/en.html>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::models::ApiErrorResponse;
use crate::providers::traits::{FetchError, ServerSource};

/// Base URL for Hetzner Robot API.
pub const API_BASE_URL: &str = "https://robot-ws.your-server.de";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Error code the API uses when the account has no servers.
const NO_SERVERS_CODE: &str = "SERVER_NOT_FOUND";

/// Read-only Hetzner Robot client.
#[derive(Clone)]
pub struct RobotApi {
    /// HTTP client.
    client: Client,
    /// API root.
    base_url: Url,
    /// Robot API username.
    username: String,
    /// Robot API password.
    password: String,
}

impl std::fmt::Debug for RobotApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotApi")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RobotApi {
    /// Create a client for the public Robot API.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, FetchError> {
        Self::with_base_url(API_BASE_URL, username, password)
    }

    /// Create a client against another endpoint, e.g. a mock server.
    ///
    /// # Errors
    /// Returns error if `base_url` does not parse or the HTTP client cannot
    /// be created.
    pub fn with_base_url(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            username: username.into(),
            password: password.into(),
        })
    }

    /// Make an authenticated GET request.
    async fn get(&self, path: &str) -> Result<Value, FetchError> {
        let url = self.base_url.join(path)?;
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Handle API response.
    async fn handle_response(response: reqwest::Response) -> Result<Value, FetchError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, "Failed to parse response");
                FetchError::Decode(e)
            })
        } else {
            Err(FetchError::Api {
                status: status.as_u16(),
                message: ApiErrorResponse::message_from(&text),
            })
        }
    }
}

#[async_trait]
impl ServerSource for RobotApi {
    async fn list_servers(&self) -> Result<Vec<Value>, FetchError> {
        let servers = match self.get("/server").await {
            Ok(Value::Array(servers)) => servers,
            Ok(_) => {
                return Err(FetchError::Api {
                    status: StatusCode::OK.as_u16(),
                    message: "expected a JSON array of servers".to_string(),
                })
            }
            Err(FetchError::Api { status, message })
                if status == StatusCode::NOT_FOUND.as_u16()
                    && message.starts_with(NO_SERVERS_CODE) =>
            {
                debug!("Account has no servers");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        info!(count = servers.len(), "Fetched servers from Robot API");
        Ok(servers)
    }
}
