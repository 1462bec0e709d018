//! Hetzner Robot API response types.

use serde::Deserialize;

// ============================================================================
// Error responses
// ============================================================================

/// Error envelope returned by the Robot API on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

/// Error details.
#[derive(Debug, Deserialize)]
pub struct ApiError {
    /// HTTP status repeated in the body.
    pub status: u16,
    /// Machine readable code, e.g. `UNAUTHORIZED`.
    pub code: String,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
}

impl ApiErrorResponse {
    /// Extract a readable message from an error body, falling back to the
    /// raw text.
    #[must_use]
    pub fn message_from(body: &str) -> String {
        match serde_json::from_str::<Self>(body) {
            Ok(resp) if resp.error.message.is_empty() => resp.error.code,
            Ok(resp) => format!("{}: {}", resp.error.code, resp.error.message),
            Err(_) => body.to_string(),
        }
    }
}
