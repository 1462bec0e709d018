//! Ansible dynamic inventory JSON.

use serde_json::{json, Map, Value};

use crate::inventory::Inventory;

/// Render the `--list` document.
///
/// ```json
/// {
///   "_meta": {"hostvars": {"web01": {"product": "EX41"}}},
///   "all": {"children": ["hetzner", "type_ex41"]},
///   "hetzner": {"hosts": ["web01"]},
///   "type_ex41": {"hosts": ["web01"]}
/// }
/// ```
#[must_use]
pub fn render_list(inventory: &Inventory) -> Value {
    let mut doc = Map::new();

    for group in inventory.groups() {
        let mut body = Map::new();
        if !group.hosts.is_empty() {
            body.insert("hosts".into(), json!(group.hosts));
        }
        if !group.children.is_empty() {
            body.insert("children".into(), json!(group.children));
        }
        doc.insert(group.name.clone(), Value::Object(body));
    }

    let hostvars: Map<String, Value> = inventory
        .hosts()
        .map(|h| (h.name.clone(), json!(h.vars)))
        .collect();
    doc.insert("_meta".into(), json!({ "hostvars": hostvars }));
    doc.insert(
        "all".into(),
        json!({ "children": inventory.top_level_groups() }),
    );

    Value::Object(doc)
}

/// Render the `--host` document: the host's variables, or `{}`.
#[must_use]
pub fn render_host(inventory: &Inventory, name: &str) -> Value {
    inventory
        .host(name)
        .map_or_else(|| json!({}), |h| json!(h.vars))
}

/// Serialize a document for stdout.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn to_json(doc: &Value, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(doc)
    } else {
        serde_json::to_string(doc)
    }
}
