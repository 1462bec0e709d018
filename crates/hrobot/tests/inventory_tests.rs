//! End-to-end inventory tests: raw records and rules in, inventory out.

use std::collections::BTreeSet;

use hrobot_inventory::cache::{load_servers, CacheMode, MemoryCache};
use hrobot_inventory::output::{render_host, render_list};
use hrobot_inventory::providers::StaticSource;
use hrobot_inventory::{
    build, BuildOptions, Config, Diagnostic, ExpressionError, InventoryBuilder, InventoryError,
    KeyedGroupRule, RuleSet, ROOT_GROUP,
};
use serde_json::{json, Value};

fn server(name: &str, product: &str, dc: &str) -> Value {
    json!({
        "server": {
            "server_name": name,
            "server_ip": "1.2.3.4",
            "server_number": 1,
            "product": product,
            "dc": dc,
            "traffic": "unlimited",
            "status": "ready",
            "cancelled": false,
            "paid_until": "2030-01-01"
        }
    })
}

fn fleet() -> Vec<Value> {
    vec![
        server("web01", "EX41", "FSN1-DC4"),
        server("proxy01", "AX51", "HEL1-DC2"),
        server("db01.staging.example.com", "EX41", "NBG1-DC3"),
    ]
}

fn groups_of(inventory: &hrobot_inventory::Inventory, host: &str) -> BTreeSet<String> {
    inventory
        .groups_of(host)
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_single_record_keyed_by_product() {
    let rules = RuleSet::new().keyed_group(
        KeyedGroupRule::new("product")
            .with_prefix("type")
            .with_separator("_"),
    );
    let inventory = build(&[server("web01", "EX41", "FSN1-DC4")], &rules, false).unwrap();

    assert_eq!(
        groups_of(&inventory, "web01"),
        BTreeSet::from(["hetzner".to_string(), "type_ex41".to_string()])
    );
    assert_eq!(inventory.host("web01").unwrap().vars["product"], json!("EX41"));
}

#[test]
fn test_host_variables() {
    let inventory = build(&[server("web01", "EX41", "FSN1-DC4")], &RuleSet::new(), true).unwrap();
    let vars = &inventory.host("web01").unwrap().vars;

    assert_eq!(vars["server_ip"], json!("1.2.3.4"));
    assert_eq!(vars["server_number"], json!(1));
    assert_eq!(vars["dc"], json!("FSN1-DC4"));
    assert_eq!(vars["traffic"], json!("unlimited"));
    assert_eq!(vars["status"], json!("ready"));
    assert_eq!(vars["cancelled"], json!(false));
    assert_eq!(vars["paid_until"], json!("2030-01-01"));
}

#[test]
fn test_documented_configuration() {
    let config = Config::from_yaml(
        r#"
plugin: hrobot
groups:
  proxy_hosts: inventory_hostname.startswith("proxy")
  staging_hosts: inventory_hostname is regex(".*\.staging\.example\.com")
keyed_groups:
  - key: product | lower
    prefix: type
  - key: dc
    separator: ""
"#,
    )
    .unwrap();

    let result = InventoryBuilder::new(config.rules(), config.build_options())
        .build(&fleet())
        .unwrap();
    let inventory = result.inventory;

    assert!(result.diagnostics.is_empty());
    assert!(inventory.is_member("proxy01", "proxy_hosts"));
    assert!(!inventory.is_member("web01", "proxy_hosts"));
    assert!(inventory.is_member("db01.staging.example.com", "staging_hosts"));
    assert!(!inventory.is_member("web01", "staging_hosts"));
    assert!(inventory.is_member("web01", "type_ex41"));
    assert!(inventory.is_member("db01.staging.example.com", "type_ex41"));
    assert!(inventory.is_member("proxy01", "type_ax51"));
    assert!(inventory.is_member("web01", "fsn1_dc4"));
    assert!(inventory.is_member("proxy01", "hel1_dc2"));
}

#[test]
fn test_root_group_holds_exactly_normalized_hosts() {
    let mut raw = fleet();
    raw.push(json!({"server": {"server_name": "broken"}}));
    raw.push(json!("not an object"));

    let result = InventoryBuilder::new(RuleSet::new(), BuildOptions::default())
        .build(&raw)
        .unwrap();
    let root = result.inventory.group(ROOT_GROUP).unwrap();

    assert_eq!(
        root.hosts,
        BTreeSet::from([
            "db01.staging.example.com".to_string(),
            "proxy01".to_string(),
            "web01".to_string()
        ])
    );
    assert_eq!(result.inventory.host_count(), 3);
    assert_eq!(result.diagnostics.len(), 2);
}

#[test]
fn test_rebuild_is_identical() {
    let rules = RuleSet::new()
        .compose("ansible_host", "server_ip")
        .group("proxy_hosts", "inventory_hostname.startswith('proxy')")
        .keyed_group(KeyedGroupRule::new("dc").with_separator(""));

    let first = build(&fleet(), &rules, true).unwrap();
    let second = build(&fleet(), &rules, true).unwrap();
    assert_eq!(first, second);
    assert_eq!(render_list(&first), render_list(&second));
}

#[test]
fn test_strict_aborts_on_undefined_variable() {
    let rules = RuleSet::new().keyed_group(KeyedGroupRule::new("rack").with_prefix("rack"));

    let err = build(&fleet(), &rules, true).unwrap_err();
    assert!(matches!(
        err,
        InventoryError::Rule {
            source: ExpressionError::Undefined(_),
            ..
        }
    ));

    let inventory = build(&fleet(), &rules, false).unwrap();
    assert_eq!(inventory.host_count(), 3);
    assert!(inventory.groups().all(|g| !g.name.starts_with("rack")));
}

#[test]
fn test_conditional_groups_apply_before_keyed_groups() {
    let rules = RuleSet::new()
        .keyed_group(KeyedGroupRule::new("missing_key"))
        .group("broken", "missing_var == 1");

    let result = InventoryBuilder::new(rules.clone(), BuildOptions::default())
        .build(&[server("web01", "EX41", "FSN1-DC4")])
        .unwrap();
    let rules_hit: Vec<&str> = result
        .diagnostics
        .iter()
        .map(|d| match d {
            Diagnostic::RuleSkipped { rule, .. } => rule.as_str(),
            _ => "",
        })
        .collect();
    assert_eq!(rules_hit, ["groups.broken", "keyed_groups[missing_key]"]);

    let err = build(&[server("web01", "EX41", "FSN1-DC4")], &rules, true).unwrap_err();
    assert!(matches!(err, InventoryError::Rule { rule, .. } if rule == "groups.broken"));
}

#[test]
fn test_cancelled_string_is_coerced() {
    let mut cancelled = server("old01", "EX41", "FSN1-DC4");
    cancelled["server"]["cancelled"] = json!("yes");
    let raw = vec![server("web01", "EX41", "FSN1-DC4"), cancelled];

    let rules = RuleSet::new().group("active", "not cancelled");
    let inventory = build(&raw, &rules, true).unwrap();

    assert!(inventory.is_member("web01", "active"));
    assert!(!inventory.is_member("old01", "active"));
    assert_eq!(inventory.host("old01").unwrap().vars["cancelled"], json!(true));
}

#[test]
fn test_compose_feeds_groups() {
    let rules = RuleSet::new()
        .compose("location", "dc.split('-')[0] | lower")
        .keyed_group(KeyedGroupRule::new("location").with_prefix("loc"));
    let inventory = build(&fleet(), &rules, true).unwrap();

    assert_eq!(inventory.host("web01").unwrap().vars["location"], json!("fsn1"));
    assert!(inventory.is_member("web01", "loc_fsn1"));
    assert!(inventory.is_member("proxy01", "loc_hel1"));
}

#[test]
fn test_list_and_host_output() {
    let rules = RuleSet::new().keyed_group(KeyedGroupRule::new("product | lower").with_prefix("type"));
    let inventory = build(&[server("web01", "EX41", "FSN1-DC4")], &rules, true).unwrap();

    let doc = render_list(&inventory);
    assert_eq!(doc["hetzner"]["hosts"], json!(["web01"]));
    assert_eq!(doc["type_ex41"]["hosts"], json!(["web01"]));
    assert_eq!(doc["all"]["children"], json!(["hetzner", "type_ex41"]));
    assert_eq!(doc["_meta"]["hostvars"]["web01"]["product"], json!("EX41"));

    assert_eq!(render_host(&inventory, "web01")["dc"], json!("FSN1-DC4"));
    assert_eq!(render_host(&inventory, "nope"), json!({}));
}

#[tokio::test]
async fn test_cached_run_matches_fresh_run() {
    let config = Config::from_yaml("plugin: hrobot\ncache: true\nkeyed_groups:\n  - key: dc\n").unwrap();
    let source = StaticSource::new(fleet());
    let mut cache = MemoryCache::new();
    let builder = InventoryBuilder::new(config.rules(), config.build_options());

    let mode = CacheMode::from_flags(config.cache, false);
    let fresh = load_servers(&source, &mut cache, "hrobot_test", mode)
        .await
        .unwrap();
    let cached = load_servers(&StaticSource::default(), &mut cache, "hrobot_test", mode)
        .await
        .unwrap();

    let a = builder.build(&fresh).unwrap().inventory;
    let b = builder.build(&cached).unwrap().inventory;
    assert_eq!(a, b);
    assert!(a.is_member("web01", "_fsn1_dc4"));
}
