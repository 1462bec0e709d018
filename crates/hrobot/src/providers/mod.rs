//! Sources of dedicated server records.

pub mod hetzner;
mod traits;

pub use traits::{FetchError, ServerSource, StaticSource};
