//! Declarative rules that shape the inventory.
//!
//! Rules are read once from configuration and never change during a build.
//! `compose` and `groups` are YAML mappings; their order in the file is the
//! order rules are applied in.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

/// Set a host variable to the value of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeRule {
    pub varname: String,
    pub expression: String,
}

/// Add hosts to `group_name` when the expression is truthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalGroupRule {
    pub group_name: String,
    pub expression: String,
}

/// Create groups named after the value of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyedGroupRule {
    /// Expression whose value names the group, e.g. `dc` or `product | lower`.
    #[serde(default)]
    pub key: String,
    /// Group name prefix.
    #[serde(default)]
    pub prefix: String,
    /// Joins prefix and value.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Used when the key is undefined or empty.
    #[serde(default)]
    pub default_value: Option<String>,
    /// Keep the separator when the value is empty. Defaults to true.
    #[serde(default)]
    pub trailing_separator: Option<bool>,
    /// Nest every produced group under this group.
    #[serde(default)]
    pub parent_group: Option<String>,
}

fn default_separator() -> String {
    "_".to_string()
}

impl KeyedGroupRule {
    /// Rule grouping by `key` with the default `_` separator.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prefix: String::new(),
            separator: default_separator(),
            default_value: None,
            trailing_separator: None,
            parent_group: None,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    #[must_use]
    pub fn with_default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_parent_group(mut self, parent: impl Into<String>) -> Self {
        self.parent_group = Some(parent.into());
        self
    }
}

/// All rules for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub compose: Vec<ComposeRule>,
    pub groups: Vec<ConditionalGroupRule>,
    pub keyed_groups: Vec<KeyedGroupRule>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn compose(mut self, varname: impl Into<String>, expression: impl Into<String>) -> Self {
        self.compose.push(ComposeRule {
            varname: varname.into(),
            expression: expression.into(),
        });
        self
    }

    #[must_use]
    pub fn group(mut self, group_name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.groups.push(ConditionalGroupRule {
            group_name: group_name.into(),
            expression: expression.into(),
        });
        self
    }

    #[must_use]
    pub fn keyed_group(mut self, rule: KeyedGroupRule) -> Self {
        self.keyed_groups.push(rule);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compose.is_empty() && self.groups.is_empty() && self.keyed_groups.is_empty()
    }
}

/// Scalar YAML values accepted as expression text.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Str(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

struct OrderedPairs;

impl<'de> Visitor<'de> for OrderedPairs {
    type Value = Vec<(String, String)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of names to expressions")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((name, expr)) = map.next_entry::<String, Scalar>()? {
            pairs.push((name, expr.into()));
        }
        Ok(pairs)
    }
}

/// Deserialize `compose:` keeping file order.
///
/// # Errors
///
/// Fails if the value is not a mapping of names to scalar expressions.
pub fn deserialize_compose<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<ComposeRule>, D::Error> {
    Ok(deserializer
        .deserialize_any(OrderedPairs)?
        .into_iter()
        .map(|(varname, expression)| ComposeRule {
            varname,
            expression,
        })
        .collect())
}

/// Deserialize `groups:` keeping file order.
///
/// # Errors
///
/// Fails if the value is not a mapping of names to scalar expressions.
pub fn deserialize_groups<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<ConditionalGroupRule>, D::Error> {
    Ok(deserializer
        .deserialize_any(OrderedPairs)?
        .into_iter()
        .map(|(group_name, expression)| ConditionalGroupRule {
            group_name,
            expression,
        })
        .collect())
}
