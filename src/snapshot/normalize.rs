//! Field normalization: raw proxy fields in, typed presentation values out.
//!
//! Every function here is total. Bad input degrades to a sentinel or an
//! omitted item, never to an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::fetch::{RawNetwork, RawNetworkSettings, RawPort};

/// Sentinel for values the proxy did not report.
pub const UNKNOWN: &str = "unknown";

/// Label carrying `port:scheme` pairs for service links.
pub const WEB_PORT_LABEL: &str = "ha.web_port";

/// Label set by docker compose on every service container.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Watchtower in monitor-only mode flips this to `"true"` once a newer
/// image has been seen.
pub const WATCHTOWER_MONITOR_LABEL: &str = "com.centurylinklabs.watchtower.monitor-only";

/// Container health as reported in the status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Unhealthy,
    Starting,
    None,
}

/// Whether a newer image than the running one has been pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum UpdateAvailable {
    Unknown = 0,
    Yes = 1,
    No = 2,
}

/// Known network drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkDriver {
    Bridge,
    Host,
    Overlay,
    Macvlan,
    None,
    Unknown,
}

impl NetworkDriver {
    pub fn classify(driver: &str) -> Self {
        match driver.trim().to_ascii_lowercase().as_str() {
            "bridge" => NetworkDriver::Bridge,
            "host" => NetworkDriver::Host,
            "overlay" => NetworkDriver::Overlay,
            "macvlan" => NetworkDriver::Macvlan,
            "none" | "null" => NetworkDriver::None,
            _ => NetworkDriver::Unknown,
        }
    }
}

/// One network a container is attached to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkAttachment {
    pub name: String,
    pub ip_address: String,
    pub mac_address: String,
    pub driver: NetworkDriver,
    /// Driver name as reported, when the proxy reported one.
    pub driver_name: Option<String>,
}

/// Summary of a container's network settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NetworkSummary {
    pub networks: Vec<NetworkAttachment>,
    pub primary: Option<String>,
    pub ip_address: String,
    pub mac_address: String,
    pub display: String,
}

/// Health from a status string such as `"Up 2 hours (healthy)"`.
pub fn parse_health(status: &str) -> Health {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\(([^()]*)\)").unwrap());

    let token = match re.captures_iter(status).last() {
        Some(caps) => caps[1].trim().to_ascii_lowercase(),
        None => return Health::None,
    };

    match token.as_str() {
        "healthy" => Health::Healthy,
        "unhealthy" => Health::Unhealthy,
        "starting" | "health: starting" => Health::Starting,
        _ => Health::None,
    }
}

/// Duration part of an `"Up …"` status, or [`UNKNOWN`].
pub fn parse_uptime(status: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^Up\s+(.+?)(?:\s*\([^()]*\))*\s*$").unwrap());

    re.captures(status.trim())
        .map(|caps| caps[1].trim().to_string())
        .filter(|uptime| !uptime.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Published ports as `hostPort:containerPort/protocol`.
///
/// IPv4 and IPv6 bindings of the same host port collapse into one entry.
/// Exposed-only ports are left out. Sorted by container port, then
/// protocol, then host port.
pub fn derive_port_mappings(ports: &[RawPort]) -> Vec<String> {
    let mut grouped: BTreeMap<(u16, String), BTreeSet<u16>> = BTreeMap::new();

    for port in ports {
        let (Some(private), Some(public)) = (port.private_port, port.public_port) else {
            continue;
        };
        if public == 0 {
            continue;
        }
        let protocol = port
            .protocol
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("tcp")
            .to_ascii_lowercase();
        grouped.entry((private, protocol)).or_default().insert(public);
    }

    grouped
        .into_iter()
        .flat_map(|((private, protocol), hosts)| {
            hosts
                .into_iter()
                .map(move |public| format!("{}:{}/{}", public, private, protocol))
        })
        .collect()
}

/// Service URLs from the `ha.web_port` label, in label order.
///
/// Malformed pairs are skipped one by one.
pub fn derive_service_urls(labels: &HashMap<String, String>, host_address: &str) -> Vec<String> {
    let Some(value) = labels.get(WEB_PORT_LABEL) else {
        return Vec::new();
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let url = parse_web_port(pair).map(|(port, scheme)| {
                format!("{}://{}:{}", scheme, host_address, port)
            });
            if url.is_none() {
                tracing::debug!("Skipping malformed {} entry {:?}", WEB_PORT_LABEL, pair);
            }
            url
        })
        .collect()
}

fn parse_web_port(pair: &str) -> Option<(u16, String)> {
    let (port, scheme) = pair.split_once(':')?;
    let port: u16 = port.trim().parse().ok().filter(|p| *p != 0)?;
    let scheme = scheme.trim().to_ascii_lowercase();
    let valid = !scheme.is_empty()
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((port, scheme))
}

/// Compose project name, empty for standalone containers.
pub fn derive_project(labels: &HashMap<String, String>) -> String {
    labels
        .get(COMPOSE_PROJECT_LABEL)
        .map(|p| p.trim().to_string())
        .unwrap_or_default()
}

/// Summarize network attachments, first network being the primary one.
pub fn derive_network_summary(
    settings: Option<&RawNetworkSettings>,
    host_address: &str,
) -> NetworkSummary {
    let networks: Vec<NetworkAttachment> = settings
        .and_then(|s| s.networks.as_ref())
        .map(|networks| {
            networks
                .iter()
                .filter_map(|(name, value)| attachment(name, value))
                .collect()
        })
        .unwrap_or_default();

    let Some(primary) = networks.first() else {
        return NetworkSummary {
            display: "no network".to_string(),
            mac_address: UNKNOWN.to_string(),
            ..Default::default()
        };
    };

    let ip_address = first_non_empty(&networks, primary, |n| &n.ip_address);
    let mut mac_address = first_non_empty(&networks, primary, |n| &n.mac_address);

    let display = match primary.driver {
        NetworkDriver::Host => {
            mac_address = "host shared".to_string();
            format!("{} (host)", host_address)
        }
        NetworkDriver::None => {
            mac_address = "none".to_string();
            "isolated (none)".to_string()
        }
        _ if ip_address.is_empty() => format!("no ip ({})", primary.name),
        _ => format!("{} ({})", ip_address, primary.name),
    };

    NetworkSummary {
        primary: Some(primary.name.clone()),
        ip_address,
        mac_address,
        display,
        networks,
    }
}

fn attachment(name: &str, value: &Value) -> Option<NetworkAttachment> {
    let raw: RawNetwork = match serde_json::from_value(value.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Ignoring unreadable network {}: {}", name, e);
            return None;
        }
    };

    let ip_address = non_empty(raw.ip_address)
        .or_else(|| non_empty(raw.global_ipv6_address))
        .unwrap_or_default();
    let driver_name = non_empty(raw.driver);
    let driver = match &driver_name {
        Some(driver) => NetworkDriver::classify(driver),
        None if matches!(name, "bridge" | "host" | "none") => NetworkDriver::classify(name),
        None => NetworkDriver::Unknown,
    };

    Some(NetworkAttachment {
        name: name.to_string(),
        ip_address,
        mac_address: non_empty(raw.mac_address).unwrap_or_default(),
        driver,
        driver_name,
    })
}

fn first_non_empty(
    networks: &[NetworkAttachment],
    primary: &NetworkAttachment,
    field: impl Fn(&NetworkAttachment) -> &String,
) -> String {
    std::iter::once(primary)
        .chain(networks.iter())
        .map(field)
        .find(|v| !v.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Compare the running image digest with the newest pulled one.
///
/// Without both digests the Watchtower label decides; without the label
/// the answer is unknown.
pub fn derive_update_available(
    labels: &HashMap<String, String>,
    running: Option<&str>,
    latest: Option<&str>,
) -> UpdateAvailable {
    let running = running.map(str::trim).filter(|d| !d.is_empty());
    let latest = latest.map(str::trim).filter(|d| !d.is_empty());
    match (running, latest) {
        (Some(running), Some(latest)) if running == latest => UpdateAvailable::No,
        (Some(_), Some(_)) => UpdateAvailable::Yes,
        _ => match labels.get(WATCHTOWER_MONITOR_LABEL).map(|v| v.trim()) {
            Some("true") => UpdateAvailable::Yes,
            Some(_) => UpdateAvailable::No,
            None => UpdateAvailable::Unknown,
        },
    }
}

/// First name without the leading `/`.
pub fn display_name(names: &[String]) -> Option<String> {
    names
        .iter()
        .map(|n| n.trim().trim_start_matches('/'))
        .find(|n| !n.is_empty())
        .map(str::to_string)
}

/// Image reference without a pinned `@sha256:…` digest.
pub fn strip_digest(image: &str) -> String {
    image.split('@').next().unwrap_or(image).to_string()
}

/// Creation time from unix seconds or RFC 3339 text.
pub fn parse_created(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
                return Some(dt.with_timezone(&Utc));
            }
            s.trim().parse::<i64>().ok()?
        }
        _ => return None,
    };

    if seconds <= 0 {
        return None;
    }
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn port(private: u16, public: Option<u16>, protocol: &str, ip: &str) -> RawPort {
        RawPort {
            ip: Some(ip.to_string()),
            private_port: Some(private),
            public_port: public,
            protocol: Some(protocol.to_string()),
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn settings(networks: Value) -> RawNetworkSettings {
        serde_json::from_value(json!({ "Networks": networks })).unwrap()
    }

    #[test]
    fn test_parse_health() {
        assert_eq!(parse_health("Up 3 hours (healthy)"), Health::Healthy);
        assert_eq!(parse_health("Up 3 hours (unhealthy)"), Health::Unhealthy);
        assert_eq!(parse_health("Up 4 seconds (health: starting)"), Health::Starting);
        assert_eq!(parse_health("Up 3 hours"), Health::None);
        assert_eq!(parse_health("Exited (1) 2 hours ago"), Health::None);
        assert_eq!(parse_health("Up 2 minutes (Paused)"), Health::None);
        assert_eq!(parse_health(""), Health::None);
    }

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime("Up 2 hours (healthy)"), "2 hours");
        assert_eq!(parse_uptime("Up Less than a second"), "Less than a second");
        assert_eq!(parse_uptime("Up 5 days"), "5 days");
        assert_eq!(parse_uptime("Exited (0) 3 days ago"), UNKNOWN);
        assert_eq!(parse_uptime("Created"), UNKNOWN);
        assert_eq!(parse_uptime(""), UNKNOWN);
    }

    #[test]
    fn test_port_mappings_dedup_ip_family() {
        let ports = vec![
            port(80, Some(8080), "tcp", "0.0.0.0"),
            port(80, Some(8080), "tcp", "::"),
        ];
        assert_eq!(derive_port_mappings(&ports), vec!["8080:80/tcp"]);
    }

    #[test]
    fn test_port_mappings_order_and_omission() {
        let ports = vec![
            port(443, Some(8443), "tcp", "0.0.0.0"),
            port(53, Some(5353), "udp", "0.0.0.0"),
            port(53, Some(5353), "tcp", "0.0.0.0"),
            port(9000, None, "tcp", ""),
            port(80, Some(8081), "tcp", "0.0.0.0"),
            port(80, Some(8080), "tcp", "::"),
        ];
        assert_eq!(
            derive_port_mappings(&ports),
            vec![
                "5353:53/tcp",
                "5353:53/udp",
                "8080:80/tcp",
                "8081:80/tcp",
                "8443:443/tcp",
            ]
        );
    }

    #[test]
    fn test_service_urls() {
        let l = labels(&[(WEB_PORT_LABEL, "8080:http,8443:https")]);
        assert_eq!(
            derive_service_urls(&l, "10.0.0.5"),
            vec!["http://10.0.0.5:8080", "https://10.0.0.5:8443"]
        );
    }

    #[test]
    fn test_service_urls_skip_malformed() {
        let l = labels(&[(WEB_PORT_LABEL, "abc, 8080:http ,9000,:https,x1:http,3000:")]);
        assert_eq!(derive_service_urls(&l, "nas.local"), vec!["http://nas.local:8080"]);
        assert!(derive_service_urls(&HashMap::new(), "nas.local").is_empty());
    }

    #[test]
    fn test_project() {
        let l = labels(&[(COMPOSE_PROJECT_LABEL, "media")]);
        assert_eq!(derive_project(&l), "media");
        assert_eq!(derive_project(&HashMap::new()), "");
    }

    #[test]
    fn test_network_summary_bridge() {
        let s = settings(json!({
            "bridge": {"IPAddress": "172.17.0.2", "MacAddress": "02:42:ac:11:00:02"},
            "backend": {"IPAddress": "172.20.0.3", "MacAddress": "02:42:ac:14:00:03", "Driver": "overlay"}
        }));
        let summary = derive_network_summary(Some(&s), "10.0.0.5");
        assert_eq!(summary.primary.as_deref(), Some("bridge"));
        assert_eq!(summary.ip_address, "172.17.0.2");
        assert_eq!(summary.mac_address, "02:42:ac:11:00:02");
        assert_eq!(summary.display, "172.17.0.2 (bridge)");
        assert_eq!(summary.networks[0].driver, NetworkDriver::Bridge);
        assert_eq!(summary.networks[1].driver, NetworkDriver::Overlay);
    }

    #[test]
    fn test_network_summary_special_networks() {
        let host = derive_network_summary(Some(&settings(json!({"host": {}}))), "10.0.0.5");
        assert_eq!(host.display, "10.0.0.5 (host)");
        assert_eq!(host.mac_address, "host shared");

        let none = derive_network_summary(Some(&settings(json!({"none": {}}))), "10.0.0.5");
        assert_eq!(none.display, "isolated (none)");

        let custom = derive_network_summary(
            Some(&settings(json!({"lan": {"Driver": "ipvlan", "IPAddress": ""}}))),
            "10.0.0.5",
        );
        assert_eq!(custom.display, "no ip (lan)");
        assert_eq!(custom.networks[0].driver, NetworkDriver::Unknown);
        assert_eq!(custom.networks[0].driver_name.as_deref(), Some("ipvlan"));

        let empty = derive_network_summary(None, "10.0.0.5");
        assert_eq!(empty.display, "no network");
        assert!(empty.primary.is_none());
    }

    #[test]
    fn test_network_summary_skips_bad_entry() {
        let s = settings(json!({"weird": "not-an-object", "bridge": {"IPAddress": "172.17.0.9"}}));
        let summary = derive_network_summary(Some(&s), "h");
        assert_eq!(summary.networks.len(), 1);
        assert_eq!(summary.ip_address, "172.17.0.9");
    }

    #[test]
    fn test_update_available() {
        let none = HashMap::new();
        assert_eq!(derive_update_available(&none, Some("sha256:a"), Some("sha256:a")), UpdateAvailable::No);
        assert_eq!(derive_update_available(&none, Some("sha256:a"), Some("sha256:b")), UpdateAvailable::Yes);
        assert_eq!(derive_update_available(&none, Some("sha256:a"), None), UpdateAvailable::Unknown);
        assert_eq!(derive_update_available(&none, None, Some("")), UpdateAvailable::Unknown);
    }

    #[test]
    fn test_update_available_from_watchtower_label() {
        let flagged = labels(&[(WATCHTOWER_MONITOR_LABEL, "true")]);
        let watched = labels(&[(WATCHTOWER_MONITOR_LABEL, "false")]);
        assert_eq!(derive_update_available(&flagged, Some("sha256:a"), None), UpdateAvailable::Yes);
        assert_eq!(derive_update_available(&watched, None, None), UpdateAvailable::No);
        // known digests win over the label
        assert_eq!(
            derive_update_available(&flagged, Some("sha256:a"), Some("sha256:a")),
            UpdateAvailable::No
        );
    }

    #[test]
    fn test_names_and_images() {
        assert_eq!(display_name(&["/web".to_string()]).as_deref(), Some("web"));
        assert_eq!(display_name(&[]), None);
        assert_eq!(strip_digest("nginx:1.27@sha256:abcd"), "nginx:1.27");
        assert_eq!(strip_digest("nginx"), "nginx");
    }

    #[test]
    fn test_parse_created() {
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(parse_created(&json!(1_700_000_000)), Some(expected));
        assert_eq!(parse_created(&json!("2023-11-14T22:13:20Z")), Some(expected));
        assert_eq!(parse_created(&json!(0)), None);
        assert_eq!(parse_created(&json!(null)), None);
    }
}
