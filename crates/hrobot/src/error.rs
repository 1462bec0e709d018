//! Error types for inventory building.

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::providers::FetchError;

/// A raw server record could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecordError {
    /// The record is not an object or lacks the nested `server` object.
    #[error("record has no `server` object")]
    MissingServerObject,

    /// A required field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("field `{field}` is invalid: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// An expression could not be parsed or evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The expression text is not valid.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// A variable or attribute lookup did not resolve.
    #[error("'{0}' is undefined")]
    Undefined(String),

    #[error("no filter named '{0}'")]
    UnknownFilter(String),

    #[error("no test named '{0}'")]
    UnknownTest(String),

    #[error("no method named '{0}'")]
    UnknownMethod(String),

    /// An operation was applied to a value of the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// A regex pattern failed to compile.
    #[error("invalid regular expression '{pattern}': {message}")]
    Regex { pattern: String, message: String },
}

/// Fatal errors that abort an inventory run.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The Robot API could not be queried.
    #[error("failed to fetch servers: {0}")]
    Fetch(#[from] FetchError),

    /// A record was malformed and the configuration demands fail-fast.
    #[error("malformed server record #{index}: {source}")]
    MalformedRecord {
        index: usize,
        #[source]
        source: MalformedRecordError,
    },

    /// A rule failed while strict mode is enabled.
    #[error("rule '{rule}' failed for host '{host}': {source}")]
    Rule {
        rule: String,
        host: String,
        #[source]
        source: ExpressionError,
    },

    /// A rule expression does not parse while strict mode is enabled.
    #[error("rule '{rule}' is invalid: {source}")]
    InvalidRule {
        rule: String,
        #[source]
        source: ExpressionError,
    },

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The cache could not be written.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// A recoverable problem reported alongside a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    /// A record was skipped.
    #[error("skipped malformed server record #{index}: {error}")]
    MalformedRecord {
        index: usize,
        error: MalformedRecordError,
    },

    /// A later record reused a server name and replaced the earlier host.
    #[error("duplicate server name '{name}', later record wins")]
    DuplicateHost { name: String },

    /// A rule failed for one host and was skipped.
    #[error("rule '{rule}' skipped for host '{host}': {error}")]
    RuleSkipped {
        rule: String,
        host: String,
        error: ExpressionError,
    },

    /// A rule does not parse and was dropped for every host.
    #[error("rule '{rule}' ignored: {error}")]
    InvalidRule { rule: String, error: ExpressionError },
}

/// Result alias for fatal inventory errors.
pub type Result<T, E = InventoryError> = std::result::Result<T, E>;
