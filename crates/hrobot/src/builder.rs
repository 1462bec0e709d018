//! Inventory builder.
//!
//! A build runs in fixed phases:
//!
//! 1. create the root group
//! 2. normalize raw records into hosts and add them to the root group
//! 3. evaluate `compose` rules for every host
//! 4. apply `groups` rules, then `keyed_groups` rules
//!
//! Composed variables are computed against the host's variables as they
//! were before composition and merged afterwards, so compose rules never
//! see each other's output. Group rules see the merged variables.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Diagnostic, ExpressionError, InventoryError, Result};
use crate::expr::{Expression, Variables};
use crate::groups::{ConditionalGroup, GroupComposer, KeyedGroup};
use crate::inventory::{Inventory, ROOT_GROUP};
use crate::record::{normalize, ServerRecord};
use crate::rules::RuleSet;

/// Variable bound to the host name while rules are evaluated.
pub const HOSTNAME_VAR: &str = "inventory_hostname";

/// Options that change how failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Abort on the first rule failure instead of skipping the rule.
    pub strict: bool,
    /// Keep the keyed group separator when the prefix is empty.
    pub leading_separator: bool,
    /// Abort on the first malformed record instead of skipping it.
    pub fail_on_malformed: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            strict: false,
            leading_separator: true,
            fail_on_malformed: false,
        }
    }
}

impl BuildOptions {
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Decides whether a rule failure aborts the build or becomes a diagnostic.
#[derive(Debug, Default)]
pub struct RulePolicy {
    strict: bool,
    diagnostics: Vec<Diagnostic>,
}

impl RulePolicy {
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            diagnostics: Vec::new(),
        }
    }

    #[must_use]
    pub fn strict() -> Self {
        Self::new(true)
    }

    #[must_use]
    pub fn lenient() -> Self {
        Self::new(false)
    }

    /// Handle a rule that failed for one host.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Rule`] in strict mode.
    pub fn rule_failed(
        &mut self,
        rule: &str,
        host: &str,
        error: ExpressionError,
    ) -> Result<()> {
        if self.strict {
            return Err(InventoryError::Rule {
                rule: rule.to_string(),
                host: host.to_string(),
                source: error,
            });
        }
        warn!(rule = %rule, host = %host, error = %error, "Skipping rule for host");
        self.report(Diagnostic::RuleSkipped {
            rule: rule.to_string(),
            host: host.to_string(),
            error,
        });
        Ok(())
    }

    /// Handle a rule whose expression does not parse.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidRule`] in strict mode.
    pub fn invalid_rule(&mut self, rule: &str, error: ExpressionError) -> Result<()> {
        if self.strict {
            return Err(InventoryError::InvalidRule {
                rule: rule.to_string(),
                source: error,
            });
        }
        warn!(rule = %rule, error = %error, "Ignoring invalid rule");
        self.report(Diagnostic::InvalidRule {
            rule: rule.to_string(),
            error,
        });
        Ok(())
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    #[must_use]
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct Build {
    pub inventory: Inventory,
    /// Problems that were skipped over.
    pub diagnostics: Vec<Diagnostic>,
}

struct ComposeStep {
    varname: String,
    expression: Expression,
}

/// Builds inventories from server records and a fixed rule set.
#[derive(Debug, Clone)]
pub struct InventoryBuilder {
    rules: RuleSet,
    options: BuildOptions,
}

impl InventoryBuilder {
    #[must_use]
    pub fn new(rules: RuleSet, options: BuildOptions) -> Self {
        Self { rules, options }
    }

    /// Build from raw Robot API records.
    ///
    /// # Errors
    ///
    /// Returns an error on a malformed record when `fail_on_malformed` is
    /// set, or on any rule failure in strict mode.
    pub fn build(&self, raw: &[Value]) -> Result<Build> {
        let mut policy = RulePolicy::new(self.options.strict);
        let mut records = Vec::with_capacity(raw.len());

        for (index, record) in raw.iter().enumerate() {
            match normalize(record) {
                Ok(record) => records.push(record),
                Err(source) if self.options.fail_on_malformed => {
                    return Err(InventoryError::MalformedRecord { index, source });
                }
                Err(error) => {
                    warn!(index, error = %error, "Skipping malformed server record");
                    policy.report(Diagnostic::MalformedRecord { index, error });
                }
            }
        }

        self.assemble(records, policy)
    }

    /// Build from already normalized records.
    ///
    /// # Errors
    ///
    /// Returns an error on any rule failure in strict mode.
    pub fn build_records(&self, records: Vec<ServerRecord>) -> Result<Build> {
        self.assemble(records, RulePolicy::new(self.options.strict))
    }

    fn compile(&self, policy: &mut RulePolicy) -> Result<(Vec<ComposeStep>, GroupComposer)> {
        let mut compose = Vec::with_capacity(self.rules.compose.len());
        for rule in &self.rules.compose {
            match Expression::parse(&rule.expression) {
                Ok(expression) => compose.push(ComposeStep {
                    varname: rule.varname.clone(),
                    expression,
                }),
                Err(e) => policy.invalid_rule(&format!("compose.{}", rule.varname), e)?,
            }
        }

        let mut conditional = Vec::with_capacity(self.rules.groups.len());
        for rule in &self.rules.groups {
            match ConditionalGroup::compile(rule) {
                Ok(group) => conditional.push(group),
                Err(e) => policy.invalid_rule(&format!("groups.{}", rule.group_name), e)?,
            }
        }

        let mut keyed = Vec::with_capacity(self.rules.keyed_groups.len());
        for rule in &self.rules.keyed_groups {
            match KeyedGroup::compile(rule) {
                Ok(group) => keyed.push(group),
                Err(e) => policy.invalid_rule(&format!("keyed_groups[{}]", rule.key), e)?,
            }
        }

        let composer = GroupComposer::new(conditional, keyed, self.options.leading_separator);
        Ok((compose, composer))
    }

    fn assemble(&self, records: Vec<ServerRecord>, mut policy: RulePolicy) -> Result<Build> {
        let (compose, composer) = self.compile(&mut policy)?;
        let records = dedupe(records, &mut policy);

        let mut inventory = Inventory::new();
        inventory.add_group(ROOT_GROUP);

        for record in &records {
            inventory.add_host(&record.name, ROOT_GROUP);
            inventory.replace_variables(&record.name, record.host_vars());
        }

        for record in &records {
            let host = record.name.as_str();
            let mut vars = record.host_vars();
            let scope = evaluation_scope(host, &vars);

            let mut composed = Variables::new();
            for step in &compose {
                match step.expression.evaluate(&scope) {
                    Ok(value) => {
                        composed.insert(step.varname.clone(), value);
                    }
                    Err(e) => policy.rule_failed(&format!("compose.{}", step.varname), host, e)?,
                }
            }
            for (name, value) in composed {
                inventory.set_variable(host, &name, value.clone());
                vars.insert(name, value);
            }

            let scope = evaluation_scope(host, &vars);
            let conditional =
                composer.apply_conditional_groups(&mut inventory, host, &scope, &mut policy)?;
            let keyed = composer.apply_keyed_groups(&mut inventory, host, &scope, &mut policy)?;
            debug!(
                host = %host,
                groups = ?conditional.iter().chain(keyed.iter()).collect::<Vec<_>>(),
                "Host grouped"
            );
        }

        let diagnostics = policy.into_diagnostics();
        info!(
            hosts = inventory.host_count(),
            groups = inventory.group_count(),
            diagnostics = diagnostics.len(),
            "Inventory built"
        );
        Ok(Build {
            inventory,
            diagnostics,
        })
    }
}

/// Host variables plus the host name binding.
fn evaluation_scope(host: &str, vars: &Variables) -> Variables {
    let mut scope = vars.clone();
    scope.insert(HOSTNAME_VAR.to_string(), Value::String(host.to_string()));
    scope
}

/// Collapse records sharing a name; the later record wins.
fn dedupe(records: Vec<ServerRecord>, policy: &mut RulePolicy) -> Vec<ServerRecord> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ServerRecord> = Vec::with_capacity(records.len());
    for record in records {
        if let Some(&i) = position.get(&record.name) {
            warn!(host = %record.name, "Duplicate server name, later record wins");
            policy.report(Diagnostic::DuplicateHost {
                name: record.name.clone(),
            });
            unique[i] = record;
        } else {
            position.insert(record.name.clone(), unique.len());
            unique.push(record);
        }
    }
    unique
}

/// Build an inventory with default options apart from `strict`.
///
/// # Errors
///
/// Returns an error on any rule failure in strict mode.
pub fn build(records: &[Value], rules: &RuleSet, strict: bool) -> Result<Inventory> {
    InventoryBuilder::new(rules.clone(), BuildOptions::default().strict(strict))
        .build(records)
        .map(|b| b.inventory)
}
