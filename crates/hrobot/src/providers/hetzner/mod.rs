//! Hetzner Robot server source.
//!
//! Implements [`ServerSource`](super::ServerSource) on top of the Robot
//! webservice. Only `GET /server` is used; the inventory never changes
//! anything on the account.

mod client;
mod models;

pub use client::{RobotApi, API_BASE_URL};
pub use models::{ApiError, ApiErrorResponse};
