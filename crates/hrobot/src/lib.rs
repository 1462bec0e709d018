//! Ansible dynamic inventory for Hetzner dedicated servers.
//!
//! Servers are listed through the Hetzner Robot API, normalized into
//! [`ServerRecord`]s and arranged into an [`Inventory`] of hosts and groups
//! driven by declarative rules:
//!
//! - `compose` sets host variables from expressions
//! - `groups` adds hosts to a group when an expression is true
//! - `keyed_groups` derives group names from an expression's value
//!
//! # Example
//!
//! ```rust
//! use hrobot_inventory::{build, KeyedGroupRule, RuleSet};
//! use serde_json::json;
//!
//! let servers = vec![json!({"server": {
//!     "server_name": "web01", "server_ip": "1.2.3.4", "server_number": 1,
//!     "product": "EX41", "dc": "FSN1-DC4", "traffic": "unlimited",
//!     "status": "ready", "cancelled": false, "paid_until": "2030-01-01"
//! }})];
//! let rules = RuleSet::new().keyed_group(KeyedGroupRule::new("product | lower").with_prefix("type"));
//!
//! let inventory = build(&servers, &rules, true).unwrap();
//! assert!(inventory.is_member("web01", "hetzner"));
//! assert!(inventory.is_member("web01", "type_ex41"));
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod expr;
pub mod groups;
pub mod inventory;
pub mod output;
pub mod providers;
pub mod record;
pub mod rules;

pub use builder::{build, Build, BuildOptions, InventoryBuilder};
pub use cache::{load_servers, CacheMode, FileCache, InventoryCache, MemoryCache};
pub use config::Config;
pub use error::{Diagnostic, ExpressionError, InventoryError, MalformedRecordError};
pub use inventory::{Group, Host, Inventory, ROOT_GROUP};
pub use providers::hetzner::RobotApi;
pub use providers::{FetchError, ServerSource};
pub use record::{normalize, ServerRecord, ServerStatus};
pub use rules::{ComposeRule, ConditionalGroupRule, KeyedGroupRule, RuleSet};
