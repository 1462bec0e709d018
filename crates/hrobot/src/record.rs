//! Normalization of raw Robot API server records.
//!
//! `GET /server` returns a list of `{"server": {...}}` wrappers. Each one is
//! turned into a [`ServerRecord`]; the rest of the crate never looks at the
//! raw JSON again.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MalformedRecordError;
use crate::expr::Variables;

/// Server status as reported by the Robot API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    /// Server is provisioned and usable.
    Ready,
    /// Server is still being provisioned.
    InProcess,
    /// Any other status string, kept verbatim.
    Other(String),
}

impl ServerStatus {
    /// Parse the API status string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "ready" => Self::Ready,
            "in process" => Self::InProcess,
            other => Self::Other(other.to_string()),
        }
    }

    /// The status as the API spells it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ready => "ready",
            Self::InProcess => "in process",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subnet assigned to a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Network address.
    pub ip: String,
    /// Prefix length or netmask, as returned by the API.
    pub mask: String,
}

/// A normalized dedicated server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Server name, the inventory host name.
    pub name: String,
    /// Main IPv4 address.
    pub ip: String,
    /// Server number.
    pub id: i64,
    /// Product (plan) name, e.g. `EX41`.
    pub product: String,
    /// Data center, e.g. `FSN1-DC4`.
    pub datacenter: String,
    /// Traffic allowance, e.g. `5 TB` or `unlimited`.
    pub traffic: String,
    /// Provisioning status.
    pub status: ServerStatus,
    /// Whether the server has been cancelled.
    pub cancelled: bool,
    /// Paid-until date (`YYYY-MM-DD`).
    pub paid_until: String,
    /// IPv6 network, if assigned.
    pub ipv6_net: Option<String>,
    /// Additional single IPs.
    pub ips: Option<Vec<String>>,
    /// Additional subnets.
    pub subnets: Option<Vec<Subnet>>,
}

impl ServerRecord {
    /// Host variables set for this server, named after the API fields.
    #[must_use]
    pub fn host_vars(&self) -> Variables {
        let mut vars = Variables::new();
        vars.insert("server_ip".into(), Value::String(self.ip.clone()));
        vars.insert("server_number".into(), Value::from(self.id));
        vars.insert("product".into(), Value::String(self.product.clone()));
        vars.insert("dc".into(), Value::String(self.datacenter.clone()));
        vars.insert("traffic".into(), Value::String(self.traffic.clone()));
        vars.insert("status".into(), Value::String(self.status.to_string()));
        vars.insert("cancelled".into(), Value::Bool(self.cancelled));
        vars.insert("paid_until".into(), Value::String(self.paid_until.clone()));
        if let Some(net) = &self.ipv6_net {
            vars.insert("server_ipv6_net".into(), Value::String(net.clone()));
        }
        if let Some(ips) = &self.ips {
            vars.insert(
                "ip".into(),
                Value::Array(ips.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(subnets) = &self.subnets {
            let list = subnets
                .iter()
                .map(|s| serde_json::json!({ "ip": s.ip, "mask": s.mask }))
                .collect();
            vars.insert("subnet".into(), Value::Array(list));
        }
        vars
    }
}

/// Normalize one raw `{"server": {...}}` record.
///
/// # Errors
///
/// Returns [`MalformedRecordError`] if the `server` object or any required
/// field is missing, or a field has an unusable type.
pub fn normalize(raw: &Value) -> Result<ServerRecord, MalformedRecordError> {
    let server = raw
        .get("server")
        .and_then(Value::as_object)
        .ok_or(MalformedRecordError::MissingServerObject)?;

    Ok(ServerRecord {
        name: string_field(server, "server_name")?,
        ip: string_field(server, "server_ip")?,
        id: server_number(server)?,
        product: string_field(server, "product")?,
        datacenter: string_field(server, "dc")?,
        traffic: string_field(server, "traffic")?,
        status: ServerStatus::parse(&string_field(server, "status")?),
        cancelled: cancelled(server)?,
        paid_until: string_field(server, "paid_until")?,
        ipv6_net: optional_string(server, "server_ipv6_net")?,
        ips: optional_ips(server)?,
        subnets: optional_subnets(server)?,
    })
}

fn field<'a>(
    server: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a Value, MalformedRecordError> {
    server
        .get(name)
        .ok_or(MalformedRecordError::MissingField(name))
}

fn string_field(
    server: &Map<String, Value>,
    name: &'static str,
) -> Result<String, MalformedRecordError> {
    field(server, name)?
        .as_str()
        .map(str::to_string)
        .ok_or(MalformedRecordError::InvalidField {
            field: name,
            expected: "a string",
        })
}

fn optional_string(
    server: &Map<String, Value>,
    name: &'static str,
) -> Result<Option<String>, MalformedRecordError> {
    match server.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(MalformedRecordError::InvalidField {
            field: name,
            expected: "a string",
        }),
    }
}

fn server_number(server: &Map<String, Value>) -> Result<i64, MalformedRecordError> {
    let invalid = MalformedRecordError::InvalidField {
        field: "server_number",
        expected: "an integer",
    };
    match field(server, "server_number")? {
        Value::Number(n) => n.as_i64().ok_or(invalid),
        Value::String(s) => s.trim().parse().map_err(|_| invalid),
        _ => Err(invalid),
    }
}

/// `cancelled` is canonicalized to a bool: JSON bools pass through,
/// `null` is false, and the strings `true|yes|1` / `false|no|0|""`
/// (any case) are accepted.
fn cancelled(server: &Map<String, Value>) -> Result<bool, MalformedRecordError> {
    let invalid = MalformedRecordError::InvalidField {
        field: "cancelled",
        expected: "a boolean",
    };
    match field(server, "cancelled")? {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            _ => Err(invalid),
        },
        _ => Err(invalid),
    }
}

fn optional_ips(server: &Map<String, Value>) -> Result<Option<Vec<String>>, MalformedRecordError> {
    let invalid = MalformedRecordError::InvalidField {
        field: "ip",
        expected: "a list of strings",
    };
    match server.get("ip") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or(invalid.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid),
    }
}

fn optional_subnets(
    server: &Map<String, Value>,
) -> Result<Option<Vec<Subnet>>, MalformedRecordError> {
    let invalid = MalformedRecordError::InvalidField {
        field: "subnet",
        expected: "a list of {ip, mask} objects",
    };
    match server.get("subnet") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                let ip = item.get("ip").and_then(Value::as_str);
                let mask = item.get("mask").and_then(|m| match m {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
                match (ip, mask) {
                    (Some(ip), Some(mask)) => Ok(Subnet {
                        ip: ip.to_string(),
                        mask,
                    }),
                    _ => Err(invalid.clone()),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid),
    }
}
