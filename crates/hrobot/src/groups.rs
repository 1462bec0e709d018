//! Group composition from `groups` and `keyed_groups` rules.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::builder::RulePolicy;
use crate::error::{ExpressionError, InventoryError};
use crate::expr::{to_text, Expression, Variables};
use crate::inventory::Inventory;
use crate::rules::{ConditionalGroupRule, KeyedGroupRule};

/// Lower-case `name` and replace every character outside `[a-z0-9_]`
/// with `_`.
#[must_use]
pub fn sanitize_group_name(name: &str) -> String {
    name.chars()
        .flat_map(char::to_lowercase)
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A conditional group rule with its parsed condition.
#[derive(Debug, Clone)]
pub struct ConditionalGroup {
    name: String,
    condition: Expression,
}

impl ConditionalGroup {
    /// Parse the rule's condition.
    ///
    /// # Errors
    ///
    /// Returns the syntax error of the condition.
    pub fn compile(rule: &ConditionalGroupRule) -> Result<Self, ExpressionError> {
        Ok(Self {
            name: sanitize_group_name(&rule.group_name),
            condition: Expression::parse(&rule.expression)?,
        })
    }

    fn label(&self) -> String {
        format!("groups.{}", self.name)
    }
}

/// Piece of a `{{ expr }}` template.
#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Expr(Expression),
}

/// A string with embedded `{{ expr }}` placeholders, such as a
/// `parent_group` of `"{{ dc | lower }}_servers"`.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Split `source` into literal text and parsed placeholders.
    ///
    /// # Errors
    ///
    /// Returns a syntax error for an unterminated or invalid placeholder.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let body = &rest[start + 2..];
            let end = body.find("}}").ok_or_else(|| ExpressionError::Syntax {
                offset: source.len() - rest.len() + start,
                message: "unterminated '{{'".to_string(),
            })?;
            segments.push(Segment::Expr(Expression::parse(body[..end].trim())?));
            rest = &body[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    /// Substitute every placeholder.
    ///
    /// # Errors
    ///
    /// Returns the first placeholder's evaluation error.
    pub fn render(&self, vars: &Variables) -> Result<String, ExpressionError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&to_text(&expr.evaluate(vars)?)),
            }
        }
        Ok(out)
    }
}

/// A keyed group rule with its parsed key expression.
#[derive(Debug, Clone)]
pub struct KeyedGroup {
    rule: KeyedGroupRule,
    key: Expression,
    parent: Option<Template>,
}

impl KeyedGroup {
    /// Parse the rule's key expression and `parent_group` template.
    ///
    /// # Errors
    ///
    /// Returns the syntax error of the key or the parent template.
    pub fn compile(rule: &KeyedGroupRule) -> Result<Self, ExpressionError> {
        Ok(Self {
            key: Expression::parse(&rule.key)?,
            parent: rule.parent_group.as_deref().map(Template::parse).transpose()?,
            rule: rule.clone(),
        })
    }

    fn label(&self) -> String {
        format!("keyed_groups[{}]", self.rule.key)
    }

    /// Raw (unprefixed) group names for `value`.
    fn bare_names(&self, value: Option<Value>) -> Result<Vec<String>, ExpressionError> {
        let default = self.rule.default_value.as_deref();
        let empty_key = || ExpressionError::Type("key resulted in an empty value".to_string());

        let names = match value {
            None | Some(Value::Null) => vec![default.ok_or_else(empty_key)?.to_string()],
            Some(Value::String(s)) if s.is_empty() => {
                vec![default.ok_or_else(empty_key)?.to_string()]
            }
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) if s.is_empty() => {
                        default.map(str::to_string).ok_or_else(empty_key)
                    }
                    other => Ok(to_text(other)),
                })
                .collect::<Result<_, _>>()?,
            Some(Value::Object(map)) => {
                let sep = &self.rule.separator;
                map.iter()
                    .map(|(k, v)| {
                        let v = to_text(v);
                        match (v.is_empty(), default) {
                            (false, _) => format!("{k}{sep}{v}"),
                            (true, Some(d)) => format!("{k}{sep}{d}"),
                            (true, None) if self.rule.trailing_separator == Some(false) => {
                                k.clone()
                            }
                            (true, None) => format!("{k}{sep}"),
                        }
                    })
                    .collect()
            }
            Some(other) => vec![to_text(&other)],
        };
        Ok(names)
    }
}

/// Applies conditional and keyed group rules to hosts.
#[derive(Debug, Clone, Default)]
pub struct GroupComposer {
    conditional: Vec<ConditionalGroup>,
    keyed: Vec<KeyedGroup>,
    leading_separator: bool,
}

impl GroupComposer {
    /// Create a composer from parsed rules.
    #[must_use]
    pub fn new(
        conditional: Vec<ConditionalGroup>,
        keyed: Vec<KeyedGroup>,
        leading_separator: bool,
    ) -> Self {
        Self {
            conditional,
            keyed,
            leading_separator,
        }
    }

    /// Add `host` to every conditional group whose condition holds.
    ///
    /// Groups are only created once a host qualifies.
    ///
    /// # Errors
    ///
    /// Returns an error when a condition fails and the policy is strict.
    pub fn apply_conditional_groups(
        &self,
        inventory: &mut Inventory,
        host: &str,
        vars: &Variables,
        policy: &mut RulePolicy,
    ) -> Result<BTreeSet<String>, InventoryError> {
        let mut joined = BTreeSet::new();
        for group in &self.conditional {
            match group.condition.evaluate_condition(vars) {
                Ok(true) => {
                    inventory.add_host(host, &group.name);
                    joined.insert(group.name.clone());
                }
                Ok(false) => {}
                Err(e) => policy.rule_failed(&group.label(), host, e)?,
            }
        }
        Ok(joined)
    }

    /// Add `host` to the groups named by each keyed rule.
    ///
    /// # Errors
    ///
    /// Returns an error when a key fails and the policy is strict.
    pub fn apply_keyed_groups(
        &self,
        inventory: &mut Inventory,
        host: &str,
        vars: &Variables,
        policy: &mut RulePolicy,
    ) -> Result<BTreeSet<String>, InventoryError> {
        let mut joined = BTreeSet::new();
        for keyed in &self.keyed {
            let value = match keyed.key.evaluate(vars) {
                Ok(v) => Some(v),
                Err(ExpressionError::Undefined(_)) if keyed.rule.default_value.is_some() => None,
                Err(e) => {
                    policy.rule_failed(&keyed.label(), host, e)?;
                    continue;
                }
            };

            let bare_names = match keyed.bare_names(value) {
                Ok(names) => names,
                Err(e) => {
                    policy.rule_failed(&keyed.label(), host, e)?;
                    continue;
                }
            };

            let parent = match keyed.parent.as_ref().map(|t| t.render(vars)).transpose() {
                Ok(parent) => parent.map(|p| sanitize_group_name(&p)),
                Err(e) => {
                    policy.rule_failed(&keyed.label(), host, e)?;
                    continue;
                }
            };

            let prefix = &keyed.rule.prefix;
            let sep = if prefix.is_empty() && !self.leading_separator {
                ""
            } else {
                keyed.rule.separator.as_str()
            };

            for bare in bare_names {
                let name = sanitize_group_name(&format!("{prefix}{sep}{bare}"));
                if name.is_empty() {
                    policy.rule_failed(
                        &keyed.label(),
                        host,
                        ExpressionError::Type("group name is empty".to_string()),
                    )?;
                    continue;
                }
                debug!(host = %host, group = %name, "Adding host to keyed group");
                inventory.add_host(host, &name);

                if let Some(parent) = parent.as_deref().filter(|p| !p.is_empty()) {
                    inventory.add_child(parent, &name);
                }
                joined.insert(name);
            }
        }
        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostic;
    use serde_json::json;

    fn vars(name: &str) -> Variables {
        let mut vars = Variables::new();
        vars.insert("inventory_hostname".into(), json!(name));
        vars.insert("product".into(), json!("EX41"));
        vars.insert("dc".into(), json!("FSN1-DC4"));
        vars.insert("tags".into(), json!(["web", "", "Prod"]));
        vars.insert("labels".into(), json!({"env": "prod", "tier": ""}));
        vars
    }

    fn keyed(rules: &[KeyedGroupRule], leading_separator: bool) -> GroupComposer {
        let keyed = rules.iter().map(|r| KeyedGroup::compile(r).unwrap()).collect();
        GroupComposer::new(Vec::new(), keyed, leading_separator)
    }

    fn conditional(rules: &[(&str, &str)]) -> GroupComposer {
        let conditional = rules
            .iter()
            .map(|(name, expr)| {
                ConditionalGroup::compile(&ConditionalGroupRule {
                    group_name: (*name).to_string(),
                    expression: (*expr).to_string(),
                })
                .unwrap()
            })
            .collect();
        GroupComposer::new(conditional, Vec::new(), true)
    }

    #[test]
    fn test_sanitize_group_name() {
        assert_eq!(sanitize_group_name("FSN1-DC4"), "fsn1_dc4");
        assert_eq!(sanitize_group_name("type_EX41"), "type_ex41");
        assert_eq!(sanitize_group_name("a.b c/d"), "a_b_c_d");
        assert_eq!(sanitize_group_name("Straße"), "stra_e");
    }

    #[test]
    fn test_keyed_group_without_prefix_or_separator() {
        let composer = keyed(&[KeyedGroupRule::new("dc").with_separator("")], true);
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::lenient();
        let joined = composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert_eq!(joined, BTreeSet::from(["fsn1_dc4".to_string()]));
        assert!(inv.is_member("web01", "fsn1_dc4"));
    }

    #[test]
    fn test_keyed_group_with_prefix_and_filter() {
        let composer = keyed(&[KeyedGroupRule::new("product | lower").with_prefix("type")], true);
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::lenient();
        composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(inv.is_member("web01", "type_ex41"));
    }

    #[test]
    fn test_leading_separator() {
        let rules = [KeyedGroupRule::new("dc")];
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::lenient();
        keyed(&rules, true)
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(inv.is_member("web01", "_fsn1_dc4"));

        let mut inv = Inventory::new();
        keyed(&rules, false)
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(inv.is_member("web01", "fsn1_dc4"));
    }

    #[test]
    fn test_default_value_for_missing_key() {
        let composer = keyed(
            &[KeyedGroupRule::new("rack").with_prefix("rack").with_default_value("unknown")],
            true,
        );
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::strict();
        composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(inv.is_member("web01", "rack_unknown"));
    }

    #[test]
    fn test_missing_key_without_default() {
        let composer = keyed(&[KeyedGroupRule::new("rack")], true);
        let mut inv = Inventory::new();

        let mut policy = RulePolicy::lenient();
        let joined = composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(joined.is_empty());
        assert_eq!(inv.group_count(), 0);
        assert!(matches!(
            policy.into_diagnostics().as_slice(),
            [Diagnostic::RuleSkipped { host, .. }] if host == "web01"
        ));

        let mut policy = RulePolicy::strict();
        let err = composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Rule { source: ExpressionError::Undefined(_), .. }
        ));
    }

    #[test]
    fn test_list_values_make_one_group_each() {
        let composer = keyed(
            &[KeyedGroupRule::new("tags").with_prefix("tag").with_default_value("none")],
            true,
        );
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::lenient();
        let joined = composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert_eq!(
            joined,
            BTreeSet::from([
                "tag_none".to_string(),
                "tag_prod".to_string(),
                "tag_web".to_string()
            ])
        );
    }

    #[test]
    fn test_mapping_values() {
        let mut rule = KeyedGroupRule::new("labels");
        rule.trailing_separator = Some(false);
        let composer = keyed(&[rule], false);
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::lenient();
        let joined = composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert_eq!(
            joined,
            BTreeSet::from(["env_prod".to_string(), "tier".to_string()])
        );
    }

    #[test]
    fn test_parent_group() {
        let composer = keyed(
            &[KeyedGroupRule::new("product")
                .with_prefix("type")
                .with_parent_group("Products")],
            true,
        );
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::lenient();
        composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(inv.group("products").unwrap().children.contains("type_ex41"));
        assert!(!inv.is_member("web01", "products"));
    }

    #[test]
    fn test_parent_group_template() {
        let composer = keyed(
            &[KeyedGroupRule::new("product")
                .with_prefix("type")
                .with_parent_group("{{ dc | lower }}-products")],
            true,
        );
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::strict();
        composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(inv
            .group("fsn1_dc4_products")
            .unwrap()
            .children
            .contains("type_ex41"));
    }

    #[test]
    fn test_parent_group_template_failure() {
        let composer = keyed(
            &[KeyedGroupRule::new("product").with_parent_group("{{ rack }}")],
            true,
        );
        let mut inv = Inventory::new();

        let mut policy = RulePolicy::lenient();
        let joined = composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(joined.is_empty());
        assert_eq!(policy.into_diagnostics().len(), 1);

        let mut policy = RulePolicy::strict();
        assert!(composer
            .apply_keyed_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .is_err());
    }

    #[test]
    fn test_template_parse() {
        let vars = vars("web01");
        assert_eq!(Template::parse("products").unwrap().render(&vars).unwrap(), "products");
        assert_eq!(
            Template::parse("{{product}}-{{ dc }}").unwrap().render(&vars).unwrap(),
            "EX41-FSN1-DC4"
        );
        assert!(matches!(
            Template::parse("{{ product").unwrap_err(),
            ExpressionError::Syntax { .. }
        ));
    }

    #[test]
    fn test_conditional_group_membership() {
        let composer = conditional(&[("proxy_hosts", r#"inventory_hostname.startswith("proxy")"#)]);
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::lenient();

        let joined = composer
            .apply_conditional_groups(&mut inv, "proxy01", &vars("proxy01"), &mut policy)
            .unwrap();
        assert_eq!(joined, BTreeSet::from(["proxy_hosts".to_string()]));

        let joined = composer
            .apply_conditional_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(joined.is_empty());
        assert!(inv.is_member("proxy01", "proxy_hosts"));
        assert!(!inv.is_member("web01", "proxy_hosts"));
    }

    #[test]
    fn test_conditional_group_not_created_without_members() {
        let composer = conditional(&[("proxy_hosts", r#"inventory_hostname.startswith("proxy")"#)]);
        let mut inv = Inventory::new();
        let mut policy = RulePolicy::lenient();
        composer
            .apply_conditional_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(inv.group("proxy_hosts").is_none());
    }

    #[test]
    fn test_conditional_group_undefined_variable() {
        let composer = conditional(&[("broken", "missing == 1"), ("all_ex41", "product == 'EX41'")]);
        let mut inv = Inventory::new();

        let mut policy = RulePolicy::lenient();
        composer
            .apply_conditional_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .unwrap();
        assert!(inv.is_member("web01", "all_ex41"));
        assert_eq!(policy.into_diagnostics().len(), 1);

        let mut policy = RulePolicy::strict();
        assert!(composer
            .apply_conditional_groups(&mut inv, "web01", &vars("web01"), &mut policy)
            .is_err());
    }
}
