//! Server list cache.
//!
//! Only the raw server list is cached. The inventory is rebuilt from it on
//! every run so rule changes take effect without refreshing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::InventoryError;
use crate::providers::ServerSource;

/// Prefix of every cache key.
pub const CACHE_KEY_PREFIX: &str = "hrobot_";

/// Errors raised by cache backends.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Reading or writing a cache file failed.
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cache entry could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value store for server lists.
pub trait InventoryCache {
    /// Cached servers for `key`, or `None` on a miss or expired entry.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<Value>>, CacheError>;

    /// Store `servers` under `key`.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn set(&mut self, key: &str, servers: &[Value]) -> Result<(), CacheError>;
}

/// Cache key for a configuration file: `hrobot_` plus the SHA-1 of its
/// path and modification time.
///
/// # Errors
/// Returns an error if the file metadata cannot be read.
pub fn cache_key(config_path: &Path) -> Result<String, CacheError> {
    let io_err = |source| CacheError::Io {
        path: config_path.to_path_buf(),
        source,
    };
    let modified = std::fs::metadata(config_path)
        .and_then(|m| m.modified())
        .map_err(io_err)?;
    let mtime: DateTime<Utc> = modified.into();

    let mut hasher = Sha1::new();
    hasher.update(config_path.to_string_lossy().as_bytes());
    hasher.update(mtime.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    Ok(format!("{CACHE_KEY_PREFIX}{}", hex::encode(hasher.finalize())))
}

/// On-disk cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    created_at: DateTime<Utc>,
    servers: Vec<Value>,
}

/// JSON files in a directory, one per key.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
    /// Lifetime in seconds; 0 never expires.
    timeout: u64,
}

impl FileCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, timeout: u64) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        if self.timeout == 0 {
            return false;
        }
        let age = Utc::now().signed_duration_since(entry.created_at);
        age.num_seconds() >= i64::try_from(self.timeout).unwrap_or(i64::MAX)
    }
}

impl InventoryCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<Vec<Value>>, CacheError> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        let entry: CacheEntry = serde_json::from_str(&content)?;

        if self.is_expired(&entry) {
            debug!(path = %path.display(), created_at = %entry.created_at, "Cache entry expired");
            return Ok(None);
        }
        Ok(Some(entry.servers))
    }

    fn set(&mut self, key: &str, servers: &[Value]) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.entry_path(key);
        let entry = CacheEntry {
            created_at: Utc::now(),
            servers: servers.to_vec(),
        };
        let content = serde_json::to_string_pretty(&entry)?;
        std::fs::write(&path, content).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), count = servers.len(), "Wrote cache entry");
        Ok(())
    }
}

/// In-process cache without expiry.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: HashMap<String, Vec<Value>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<Value>>, CacheError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, servers: &[Value]) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), servers.to_vec());
        Ok(())
    }
}

/// How the cache takes part in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Always fetch, never touch the cache.
    Disabled,
    /// Serve from the cache; fetch and store on a miss.
    Use,
    /// Fetch and overwrite the cache.
    Refresh,
}

impl CacheMode {
    /// Mode for the `cache` option and a refresh request.
    #[must_use]
    pub fn from_flags(enabled: bool, refresh: bool) -> Self {
        match (enabled, refresh) {
            (false, _) => Self::Disabled,
            (true, false) => Self::Use,
            (true, true) => Self::Refresh,
        }
    }
}

/// Load the server list, going through the cache according to `mode`.
///
/// An unreadable cache entry is treated as a miss.
///
/// # Errors
/// Returns an error if fetching fails, or if a fresh list cannot be cached.
pub async fn load_servers<S, C>(
    source: &S,
    cache: &mut C,
    key: &str,
    mode: CacheMode,
) -> Result<Vec<Value>, InventoryError>
where
    S: ServerSource + ?Sized,
    C: InventoryCache + ?Sized,
{
    if mode == CacheMode::Use {
        match cache.get(key) {
            Ok(Some(servers)) => {
                info!(count = servers.len(), "Using cached server list");
                return Ok(servers);
            }
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) => warn!(error = %e, "Failed to read cache, fetching fresh data"),
        }
    }

    let servers = source.list_servers().await?;

    if mode != CacheMode::Disabled {
        cache.set(key, &servers)?;
    }
    Ok(servers)
}
