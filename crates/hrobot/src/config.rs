//! Inventory configuration file.
//!
//! A configuration is a YAML file whose name ends in `hrobot.yml` or
//! `hrobot.yaml`:
//!
//! ```yaml
//! plugin: hrobot
//! api_user: "#ws+XXXXXXXX"
//! groups:
//!   proxy_hosts: inventory_hostname.startswith("proxy")
//! keyed_groups:
//!   - key: product | lower
//!     prefix: type
//!   - key: dc
//!     separator: ""
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::builder::BuildOptions;
use crate::rules::{
    deserialize_compose, deserialize_groups, ComposeRule, ConditionalGroupRule, KeyedGroupRule,
    RuleSet,
};

/// Value required in the `plugin` key.
pub const PLUGIN_NAME: &str = "hrobot";

/// Environment variable holding the Robot API user.
pub const USER_ENV: &str = "HETZNER_ROBOT_USER";

/// Environment variable holding the Robot API password.
pub const PASSWORD_ENV: &str = "HETZNER_ROBOT_PASSWORD";

/// Default cache lifetime in seconds.
pub const DEFAULT_CACHE_TIMEOUT: u64 = 3600;

/// Errors raised while loading or validating a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML or has the wrong shape.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The file name does not end in `hrobot.yml` or `hrobot.yaml`.
    #[error("{0} is not an hrobot configuration (name must end in hrobot.yml or hrobot.yaml)")]
    InvalidFileName(PathBuf),

    /// `plugin` is not `hrobot`.
    #[error("unsupported plugin '{0}', expected '{PLUGIN_NAME}'")]
    InvalidPlugin(String),

    /// A credential is neither configured nor in the environment.
    #[error("missing {0}")]
    MissingCredential(&'static str),

    /// Options that cannot be used together, or are otherwise invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Robot API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_timeout() -> u64 {
    DEFAULT_CACHE_TIMEOUT
}

/// Parsed configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub plugin: String,
    #[serde(default)]
    pub api_user: Option<String>,
    #[serde(default)]
    pub api_password: Option<String>,

    #[serde(default, deserialize_with = "deserialize_compose")]
    pub compose: Vec<ComposeRule>,
    #[serde(default, deserialize_with = "deserialize_groups")]
    pub groups: Vec<ConditionalGroupRule>,
    #[serde(default)]
    keyed_groups: Option<Vec<KeyedGroupRule>>,

    /// Fail on rule errors instead of skipping the rule.
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_true")]
    pub leading_separator: bool,
    #[serde(default)]
    pub fail_on_malformed: bool,

    /// Cache the server list between runs.
    #[serde(default)]
    pub cache: bool,
    /// Cache lifetime in seconds.
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout: u64,
    /// Cache directory.
    #[serde(default)]
    pub cache_connection: Option<PathBuf>,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file name is not accepted, the file cannot be
    /// read or parsed, or validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !Self::accepts_path(path) {
            return Err(ConfigError::InvalidFileName(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        debug!(
            path = %path.display(),
            compose = config.compose.len(),
            groups = config.groups.len(),
            keyed_groups = config.keyed_groups().len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    /// Returns an error if the YAML does not parse or validation fails.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether `path` has an accepted file name.
    #[must_use]
    pub fn accepts_path(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| {
                n.ends_with(&format!("{PLUGIN_NAME}.yml"))
                    || n.ends_with(&format!("{PLUGIN_NAME}.yaml"))
            })
    }

    /// Check option combinations.
    ///
    /// # Errors
    /// Returns an error describing the first invalid option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin != PLUGIN_NAME {
            return Err(ConfigError::InvalidPlugin(self.plugin.clone()));
        }
        for (i, rule) in self.keyed_groups().iter().enumerate() {
            if rule.key.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "keyed_groups[{i}] requires a 'key'"
                )));
            }
            if rule.default_value.is_some() && rule.trailing_separator.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "keyed_groups[{i}]: 'default_value' and 'trailing_separator' are mutually exclusive"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn keyed_groups(&self) -> &[KeyedGroupRule] {
        self.keyed_groups.as_deref().unwrap_or_default()
    }

    /// The configured rules.
    #[must_use]
    pub fn rules(&self) -> RuleSet {
        RuleSet {
            compose: self.compose.clone(),
            groups: self.groups.clone(),
            keyed_groups: self.keyed_groups().to_vec(),
        }
    }

    #[must_use]
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            strict: self.strict,
            leading_separator: self.leading_separator,
            fail_on_malformed: self.fail_on_malformed,
        }
    }

    /// Resolve credentials, falling back to the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingCredential`] if a value is missing.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        self.credentials_or(std::env::var(USER_ENV).ok(), std::env::var(PASSWORD_ENV).ok())
    }

    /// Resolve credentials, falling back to the given values.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingCredential`] if a value is missing.
    pub fn credentials_or(
        &self,
        user: Option<String>,
        password: Option<String>,
    ) -> Result<Credentials, ConfigError> {
        let pick = |configured: &Option<String>, fallback: Option<String>| {
            configured
                .clone()
                .or(fallback)
                .filter(|v| !v.is_empty())
        };
        Ok(Credentials {
            user: pick(&self.api_user, user)
                .ok_or(ConfigError::MissingCredential("api_user (or HETZNER_ROBOT_USER)"))?,
            password: pick(&self.api_password, password).ok_or(
                ConfigError::MissingCredential("api_password (or HETZNER_ROBOT_PASSWORD)"),
            )?,
        })
    }

    /// Directory for cached server lists.
    ///
    /// # Errors
    /// Returns an error if no directory is configured and the platform has
    /// no cache directory.
    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.cache_connection {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|d| d.join(PLUGIN_NAME))
            .ok_or_else(|| ConfigError::Invalid("no cache directory; set cache_connection".into()))
    }
}
