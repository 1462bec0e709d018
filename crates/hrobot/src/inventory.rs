//! Inventory graph: hosts, groups and memberships.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::expr::Variables;

/// Name of the group every Hetzner host belongs to.
pub const ROOT_GROUP: &str = "hetzner";

/// A managed server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Host {
    /// Inventory host name.
    pub name: String,
    /// Host variables.
    pub vars: Variables,
}

/// A named set of hosts and child groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Group {
    /// Group name.
    pub name: String,
    /// Direct member hosts.
    pub hosts: BTreeSet<String>,
    /// Nested groups.
    pub children: BTreeSet<String>,
}

impl Group {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Hosts and groups produced by one build.
///
/// Sorted maps keep two builds from the same input structurally identical.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Inventory {
    groups: BTreeMap<String, Group>,
    hosts: BTreeMap<String, Host>,
}

impl Inventory {
    /// Create an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` if absent. Returns true when the group is new.
    pub fn add_group(&mut self, name: &str) -> bool {
        if self.groups.contains_key(name) {
            return false;
        }
        self.groups.insert(name.to_string(), Group::new(name));
        true
    }

    /// Add `host` (creating it if needed) as a member of `group` (creating
    /// it if needed). Adding an existing member is a no-op.
    pub fn add_host(&mut self, host: &str, group: &str) {
        self.hosts.entry(host.to_string()).or_insert_with(|| Host {
            name: host.to_string(),
            vars: Variables::new(),
        });
        self.add_group(group);
        if let Some(g) = self.groups.get_mut(group) {
            g.hosts.insert(host.to_string());
        }
    }

    /// Nest `child` under `parent`, creating both if needed.
    pub fn add_child(&mut self, parent: &str, child: &str) {
        if parent == child {
            return;
        }
        self.add_group(parent);
        self.add_group(child);
        if let Some(g) = self.groups.get_mut(parent) {
            g.children.insert(child.to_string());
        }
    }

    /// Set a variable on an existing host. Unknown hosts are ignored.
    pub fn set_variable(&mut self, host: &str, key: &str, value: Value) {
        if let Some(h) = self.hosts.get_mut(host) {
            h.vars.insert(key.to_string(), value);
        }
    }

    /// Replace all variables of an existing host.
    pub fn replace_variables(&mut self, host: &str, vars: Variables) {
        if let Some(h) = self.hosts.get_mut(host) {
            h.vars = vars;
        }
    }

    #[must_use]
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// All hosts, sorted by name.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// All groups, sorted by name.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Groups that list `host` as a direct member.
    #[must_use]
    pub fn groups_of(&self, host: &str) -> BTreeSet<&str> {
        self.groups
            .values()
            .filter(|g| g.hosts.contains(host))
            .map(|g| g.name.as_str())
            .collect()
    }

    /// Groups that are not a child of any other group.
    #[must_use]
    pub fn top_level_groups(&self) -> BTreeSet<&str> {
        let nested: BTreeSet<&str> = self
            .groups
            .values()
            .flat_map(|g| g.children.iter().map(String::as_str))
            .collect();
        self.groups
            .keys()
            .map(String::as_str)
            .filter(|name| !nested.contains(name))
            .collect()
    }

    /// Whether `host` is a direct member of `group`.
    #[must_use]
    pub fn is_member(&self, host: &str, group: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|g| g.hosts.contains(host))
    }

    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
