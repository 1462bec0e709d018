//! Sandboxed expression language used by `compose`, `groups` and
//! `keyed_groups` rules.
//!
//! The language is a small, closed subset of Jinja expressions: variable
//! and attribute lookup, literals, boolean logic, comparisons, string
//! methods such as `startswith`, regex tests (`is match`, `is search`,
//! `is regex`) and a fixed set of filters (`lower`, `default`,
//! `regex_replace`, ...). There is no way to call arbitrary code.
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use hrobot_inventory::expr::Expression;
//!
//! let mut vars = BTreeMap::new();
//! vars.insert("inventory_hostname".to_string(), "proxy01".into());
//!
//! let expr = Expression::parse(r#"inventory_hostname.startswith("proxy")"#).unwrap();
//! assert!(expr.evaluate_condition(&vars).unwrap());
//! ```

mod eval;
mod functions;
mod lexer;
mod parser;

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::ExpressionError;
use parser::Node;

pub use eval::{to_text, truthy};

/// Variables visible to an expression.
pub type Variables = BTreeMap<String, Value>;

/// A parsed expression, ready to be evaluated against many hosts.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Parse an expression.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Syntax`] if `source` is not well formed.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            source: source.to_string(),
            root: parser::parse(source)?,
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a value.
    ///
    /// # Errors
    ///
    /// Returns an error when a referenced variable is undefined or an
    /// operation fails at runtime.
    pub fn evaluate(&self, vars: &Variables) -> Result<Value, ExpressionError> {
        eval::eval(&self.root, vars)?.into_value()
    }

    /// Evaluate and reduce the result to a boolean by truthiness.
    ///
    /// # Errors
    ///
    /// Same as [`Expression::evaluate`].
    pub fn evaluate_condition(&self, vars: &Variables) -> Result<bool, ExpressionError> {
        self.evaluate(vars).map(|v| truthy(&v))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate `expression` in one step.
///
/// # Errors
///
/// Returns any parse or evaluation error.
pub fn evaluate(expression: &str, vars: &Variables) -> Result<Value, ExpressionError> {
    Expression::parse(expression)?.evaluate(vars)
}

/// Parse and evaluate `expression` as a condition in one step.
///
/// # Errors
///
/// Returns any parse or evaluation error.
pub fn evaluate_condition(expression: &str, vars: &Variables) -> Result<bool, ExpressionError> {
    Expression::parse(expression)?.evaluate_condition(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host_vars() -> Variables {
        let mut vars = Variables::new();
        vars.insert("inventory_hostname".into(), json!("web01.staging.example.com"));
        vars.insert("product".into(), json!("EX41"));
        vars.insert("dc".into(), json!("FSN1-DC4"));
        vars.insert("server_number".into(), json!(321));
        vars.insert("cancelled".into(), json!(false));
        vars.insert("status".into(), json!("ready"));
        vars.insert("ip".into(), json!(["1.2.3.4", "1.2.3.5"]));
        vars.insert(
            "subnet".into(),
            json!([{"ip": "2a01:4f8::", "mask": "64"}]),
        );
        vars
    }

    #[test]
    fn test_variable_lookup() {
        assert_eq!(evaluate("product", &host_vars()).unwrap(), json!("EX41"));
        assert_eq!(evaluate("server_number", &host_vars()).unwrap(), json!(321));
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let err = evaluate("missing", &host_vars()).unwrap_err();
        assert_eq!(err, ExpressionError::Undefined("missing".into()));

        let err = evaluate("missing | lower", &host_vars()).unwrap_err();
        assert_eq!(err, ExpressionError::Undefined("missing".into()));
    }

    #[test]
    fn test_startswith_and_endswith() {
        let vars = host_vars();
        assert!(evaluate_condition(r#"inventory_hostname.startswith("web")"#, &vars).unwrap());
        assert!(!evaluate_condition(r#"inventory_hostname.startswith("proxy")"#, &vars).unwrap());
        assert!(evaluate_condition(
            r#"inventory_hostname.endswith(["example.org", ".com"])"#,
            &vars
        )
        .unwrap());
    }

    #[test]
    fn test_regex_tests() {
        let vars = host_vars();
        assert!(evaluate_condition(
            r#"inventory_hostname is regex(".*\.staging\.example\.com")"#,
            &vars
        )
        .unwrap());
        assert!(evaluate_condition(r#"inventory_hostname is search("staging")"#, &vars).unwrap());
        assert!(!evaluate_condition(r#"inventory_hostname is match("staging")"#, &vars).unwrap());
        assert!(evaluate_condition(r#"product is match("ex", ignorecase=true)"#, &vars).unwrap());
        assert!(evaluate_condition(r#"dc is not match("NBG")"#, &vars).unwrap());
    }

    #[test]
    fn test_match_anchors_at_string_start() {
        let mut vars = host_vars();
        vars.insert("motd".into(), json!("abc\nweb01"));
        assert!(!evaluate_condition(r#"motd is match("web", multiline=true)"#, &vars).unwrap());
        assert!(!evaluate_condition(
            r#"motd is regex("web", multiline=true, match_type="match")"#,
            &vars
        )
        .unwrap());
        assert!(evaluate_condition(r#"motd is search("^web", multiline=true)"#, &vars).unwrap());
        assert!(evaluate_condition(r#"motd is match("abc$", multiline=true)"#, &vars).unwrap());
    }

    #[test]
    fn test_invalid_regex() {
        let err = evaluate_condition(r#"product is regex("(")"#, &host_vars()).unwrap_err();
        assert!(matches!(err, ExpressionError::Regex { .. }));
    }

    #[test]
    fn test_filters_chain() {
        let vars = host_vars();
        assert_eq!(evaluate("product | lower", &vars).unwrap(), json!("ex41"));
        assert_eq!(
            evaluate("dc | lower | replace('-', '_')", &vars).unwrap(),
            json!("fsn1_dc4")
        );
        assert_eq!(
            evaluate(r#"dc | regex_replace("^([A-Z]+)\d-.*$", "\1")"#, &vars).unwrap(),
            json!("FSN")
        );
        assert_eq!(evaluate("ip | first", &vars).unwrap(), json!("1.2.3.4"));
        assert_eq!(evaluate("ip | length", &vars).unwrap(), json!(2));
        assert_eq!(evaluate("ip | join(',')", &vars).unwrap(), json!("1.2.3.4,1.2.3.5"));
        assert_eq!(evaluate("'42' | int + 1", &vars).unwrap(), json!(43));
    }

    #[test]
    fn test_default_filter_handles_undefined() {
        let vars = host_vars();
        assert_eq!(evaluate("missing | default('none')", &vars).unwrap(), json!("none"));
        assert_eq!(evaluate("product | default('none')", &vars).unwrap(), json!("EX41"));
        assert_eq!(
            evaluate("'' | default('empty', true)", &vars).unwrap(),
            json!("empty")
        );
    }

    #[test]
    fn test_defined_tests() {
        let vars = host_vars();
        assert!(evaluate_condition("product is defined", &vars).unwrap());
        assert!(evaluate_condition("missing is undefined", &vars).unwrap());
        assert!(evaluate_condition("missing is not defined", &vars).unwrap());
    }

    #[test]
    fn test_boolean_composition_short_circuits() {
        let vars = host_vars();
        assert!(evaluate_condition("status == 'ready' and not cancelled", &vars).unwrap());
        // The right-hand side is never evaluated, so the undefined name is fine.
        assert!(evaluate_condition("status == 'ready' or missing", &vars).unwrap());
        assert!(!evaluate_condition("cancelled and missing", &vars).unwrap());
    }

    #[test]
    fn test_membership_and_comparison() {
        let vars = host_vars();
        assert!(evaluate_condition("'1.2.3.5' in ip", &vars).unwrap());
        assert!(evaluate_condition("'DC' in dc", &vars).unwrap());
        assert!(evaluate_condition("product not in ['AX41', 'AX52']", &vars).unwrap());
        assert!(evaluate_condition("server_number > 300", &vars).unwrap());
        assert!(evaluate_condition("server_number <= 321.0", &vars).unwrap());
    }

    #[test]
    fn test_attribute_and_index_access() {
        let vars = host_vars();
        assert_eq!(evaluate("subnet[0].mask", &vars).unwrap(), json!("64"));
        assert_eq!(evaluate("ip[-1]", &vars).unwrap(), json!("1.2.3.5"));
        assert_eq!(
            evaluate("subnet[0].gateway", &vars).unwrap_err(),
            ExpressionError::Undefined("value.gateway".into())
        );
    }

    #[test]
    fn test_concat_and_inline_if() {
        let vars = host_vars();
        assert_eq!(
            evaluate("product ~ '-' ~ server_number", &vars).unwrap(),
            json!("EX41-321")
        );
        assert_eq!(
            evaluate("'live' if status == 'ready' else 'pending'", &vars).unwrap(),
            json!("live")
        );
    }

    #[test]
    fn test_inline_if_without_else_is_falsy() {
        let vars = host_vars();
        assert_eq!(
            evaluate("'live' if status == 'pending'", &vars).unwrap(),
            json!("")
        );
        assert!(!evaluate_condition("'live' if status == 'pending'", &vars).unwrap());
        assert!(evaluate_condition("'live' if status == 'ready'", &vars).unwrap());
    }

    #[test]
    fn test_type_errors() {
        let vars = host_vars();
        assert!(matches!(
            evaluate("server_number.startswith('3')", &vars).unwrap_err(),
            ExpressionError::Type(_)
        ));
        assert!(matches!(
            evaluate("product - 1", &vars).unwrap_err(),
            ExpressionError::Type(_)
        ));
        assert_eq!(
            evaluate("product | shout", &vars).unwrap_err(),
            ExpressionError::UnknownFilter("shout".into())
        );
        assert_eq!(
            evaluate("product is shiny", &vars).unwrap_err(),
            ExpressionError::UnknownTest("shiny".into())
        );
    }

    #[test]
    fn test_display_returns_source() {
        let expr = Expression::parse("product | lower").unwrap();
        assert_eq!(expr.to_string(), "product | lower");
        assert_eq!(expr.source(), "product | lower");
    }
}
