//! Raw payload types returned by the socket proxy.
//!
//! Every field is optional: the proxy forwards whatever the engine reports
//! and older engines omit fields freely. Normalization decides defaults.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Body of `GET /version`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawVersion {
    pub platform: Option<RawPlatform>,
    pub version: Option<String>,
    pub api_version: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub kernel_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPlatform {
    pub name: Option<String>,
}

/// One element of the `GET /containers/json?all=true` array.
///
/// Decoded field by field with [`RawContainer::from_entry`], never as a
/// whole, so a mistyped field only loses that field.
#[derive(Debug, Clone, Default)]
pub struct RawContainer {
    pub id: Option<String>,
    pub names: Option<Vec<String>>,
    pub image: Option<String>,
    pub image_id: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub labels: Option<HashMap<String, String>>,
    pub ports: Option<Vec<RawPort>>,
    pub network_settings: Option<RawNetworkSettings>,
    /// Unix seconds on the engine API, RFC 3339 on some proxies.
    pub created: Option<Value>,
}

/// A single published (or merely exposed) port.
#[derive(Debug, Clone, Default)]
pub struct RawPort {
    pub ip: Option<String>,
    pub private_port: Option<u16>,
    pub public_port: Option<u16>,
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawNetworkSettings {
    /// Kept untyped so one odd network entry cannot reject the container,
    /// and in wire order so the first network stays first.
    pub networks: Option<Map<String, Value>>,
}

/// Endpoint settings of one network attachment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawNetwork {
    #[serde(rename = "IPAddress")]
    pub ip_address: Option<String>,
    #[serde(rename = "GlobalIPv6Address")]
    pub global_ipv6_address: Option<String>,
    pub mac_address: Option<String>,
    pub driver: Option<String>,
}

impl RawContainer {
    /// Decode one array entry. Fields that are missing or of the wrong type
    /// fall back to `None`; a non-object entry decodes to an empty container.
    pub fn from_entry(entry: &Value) -> Self {
        let Some(obj) = entry.as_object() else {
            return Self::default();
        };

        Self {
            id: field(obj, "Id"),
            names: field::<Vec<Value>>(obj, "Names").map(|names| {
                names
                    .into_iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            }),
            image: field(obj, "Image"),
            image_id: field(obj, "ImageID"),
            state: field(obj, "State"),
            status: field(obj, "Status"),
            labels: field::<Map<String, Value>>(obj, "Labels").map(|labels| {
                labels
                    .into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k, v.to_string())))
                    .collect()
            }),
            ports: field::<Vec<Value>>(obj, "Ports")
                .map(|ports| ports.iter().filter_map(RawPort::from_entry).collect()),
            network_settings: field(obj, "NetworkSettings"),
            created: obj.get("Created").filter(|v| !v.is_null()).cloned(),
        }
    }

    /// The container id, if present and non-empty.
    pub fn usable_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

impl RawPort {
    /// Ports are read one key at a time; numbers sent as strings are accepted.
    fn from_entry(entry: &Value) -> Option<Self> {
        let obj = entry.as_object()?;
        let port = |key: &str| match obj.get(key)? {
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };

        Some(Self {
            ip: field(obj, "IP"),
            private_port: port("PrivatePort"),
            public_port: port("PublicPort"),
            protocol: field(obj, "Type"),
        })
    }
}

fn field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    obj.get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| T::deserialize(v).ok())
}
