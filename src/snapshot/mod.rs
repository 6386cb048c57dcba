//! Snapshot module: one cycle's normalized host and container state.
//!
//! The builder here never performs I/O. It takes whatever the fetch cycle
//! produced and turns it into an immutable [`Snapshot`].

mod normalize;

pub use normalize::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::fetch::{FetchOutcome, RawContainer, RawVersion};

/// Identity of a container across cycles: host instance plus container id.
///
/// Names are deliberately not part of it since they can be reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContainerKey {
    pub instance: String,
    pub container_id: String,
}

impl ContainerKey {
    pub fn new(instance: &str, container_id: &str) -> Self {
        Self {
            instance: instance.to_string(),
            container_id: container_id.to_string(),
        }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.instance, self.container_id)
    }
}

/// Presentation-ready view of one container in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerView {
    pub display_name: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub health: Health,
    pub uptime: String,
    pub update_available: UpdateAvailable,
    pub project: String,
    pub service_urls: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub ports: Vec<String>,
    pub network: NetworkSummary,
    pub mac_address: String,
    pub fetched_at: DateTime<Utc>,
}

impl ContainerView {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Which of the two proxy endpoints answered this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Availability {
    pub version: bool,
    pub containers: bool,
}

/// Engine and host facts from `/version`, plus container counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSummary {
    pub hostname: String,
    pub os: String,
    pub architecture: String,
    pub kernel_version: String,
    pub platform: String,
    pub engine_version: String,
    pub api_version: String,
    pub running: usize,
    pub total: usize,
    pub fetched_at: DateTime<Utc>,
    pub availability: Availability,
}

impl HostSummary {
    /// Short status for the host entity.
    pub fn status_line(&self) -> String {
        if !self.availability.version {
            "version unavailable".to_string()
        } else if !self.availability.containers {
            "containers unavailable".to_string()
        } else {
            format!("{}/{} running", self.running, self.total)
        }
    }
}

/// One cycle's fully normalized state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub host: HostSummary,
    pub containers: HashMap<ContainerKey, ContainerView>,
}

impl Snapshot {
    pub fn containers_available(&self) -> bool {
        self.host.availability.containers
    }
}

/// Source of the newest pulled digest for an image reference.
///
/// The proxy only exposes the running digest; whatever knows about newer
/// pulls plugs in here.
pub trait DigestSource: Send + Sync {
    fn latest_digest(&self, image: &str) -> Option<String>;
}

/// Digest source that knows nothing; update flags then come from labels only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDigestSource;

impl DigestSource for NoDigestSource {
    fn latest_digest(&self, _image: &str) -> Option<String> {
        None
    }
}

/// Builds snapshots for one host instance.
#[derive(Clone)]
pub struct SnapshotBuilder {
    instance: String,
    host_address: String,
    digests: Arc<dyn DigestSource>,
}

impl SnapshotBuilder {
    pub fn new(instance: &str, host_address: &str, digests: Arc<dyn DigestSource>) -> Self {
        Self {
            instance: instance.to_string(),
            host_address: host_address.to_string(),
            digests,
        }
    }

    /// Build from a fetch outcome, treating failed retrievals as absent.
    pub fn build_from(
        &self,
        outcome: &FetchOutcome,
        previous: Option<&HostSummary>,
        now: DateTime<Utc>,
    ) -> Snapshot {
        self.build(
            outcome.version.as_ref().ok(),
            outcome.containers.as_deref().ok(),
            previous,
            now,
        )
    }

    /// Build a snapshot.
    ///
    /// `None` for either payload means that retrieval failed: the matching
    /// availability flag goes down and the host fields it would have fed are
    /// carried over from `previous`.
    pub fn build(
        &self,
        version: Option<&RawVersion>,
        containers: Option<&[Value]>,
        previous: Option<&HostSummary>,
        now: DateTime<Utc>,
    ) -> Snapshot {
        let views = containers
            .map(|entries| self.build_views(entries, now))
            .unwrap_or_default();

        let mut host = match version {
            Some(version) => self.host_from_version(version, now),
            None => self.host_carried_over(previous, now),
        };
        host.availability = Availability {
            version: version.is_some(),
            containers: containers.is_some(),
        };

        if containers.is_some() {
            host.running = views.values().filter(|v| v.is_running()).count();
            host.total = views.len();
        } else if let Some(previous) = previous {
            host.running = previous.running;
            host.total = previous.total;
        }

        Snapshot {
            host,
            containers: views,
        }
    }

    fn build_views(
        &self,
        entries: &[Value],
        now: DateTime<Utc>,
    ) -> HashMap<ContainerKey, ContainerView> {
        let mut views = HashMap::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let raw = RawContainer::from_entry(entry);
            let Some(id) = raw.usable_id() else {
                tracing::warn!("{}: skipping container #{} without an id", self.instance, index);
                continue;
            };

            let key = ContainerKey::new(&self.instance, id);
            let view = self.container_view(&raw, id, now);
            if views.insert(key, view).is_some() {
                tracing::warn!("{}: container {} listed twice, keeping the last", self.instance, id);
            }
        }

        views
    }

    fn container_view(&self, raw: &RawContainer, id: &str, now: DateTime<Utc>) -> ContainerView {
        let labels = raw.labels.clone().unwrap_or_default();
        let status = raw.status.as_deref().unwrap_or_default();
        let names: Vec<String> = raw
            .names
            .iter()
            .flatten()
            .map(|n| n.trim_start_matches('/').to_string())
            .collect();
        let image = raw
            .image
            .as_deref()
            .map(strip_digest)
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let latest = self.digests.latest_digest(&image);
        let network = derive_network_summary(raw.network_settings.as_ref(), &self.host_address);
        let mac_address = if network.mac_address.is_empty() {
            UNKNOWN.to_string()
        } else {
            network.mac_address.clone()
        };

        ContainerView {
            display_name: display_name(&names).unwrap_or_else(|| id.chars().take(12).collect()),
            names,
            state: raw.state.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            health: parse_health(status),
            uptime: parse_uptime(status),
            update_available: derive_update_available(
                &labels,
                raw.image_id.as_deref(),
                latest.as_deref(),
            ),
            project: derive_project(&labels),
            service_urls: derive_service_urls(&labels, &self.host_address),
            created: raw.created.as_ref().and_then(parse_created),
            ports: derive_port_mappings(raw.ports.as_deref().unwrap_or_default()),
            network,
            mac_address,
            image,
            fetched_at: now,
        }
    }

    fn host_from_version(&self, version: &RawVersion, now: DateTime<Utc>) -> HostSummary {
        let field = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(UNKNOWN)
                .to_string()
        };

        HostSummary {
            hostname: self.host_address.clone(),
            os: field(&version.os),
            architecture: field(&version.arch),
            kernel_version: field(&version.kernel_version),
            platform: field(&version.platform.as_ref().and_then(|p| p.name.clone())),
            engine_version: field(&version.version),
            api_version: field(&version.api_version),
            running: 0,
            total: 0,
            fetched_at: now,
            availability: Availability::default(),
        }
    }

    fn host_carried_over(&self, previous: Option<&HostSummary>, now: DateTime<Utc>) -> HostSummary {
        match previous {
            Some(previous) => HostSummary {
                fetched_at: now,
                ..previous.clone()
            },
            None => HostSummary {
                hostname: self.host_address.clone(),
                os: UNKNOWN.to_string(),
                architecture: UNKNOWN.to_string(),
                kernel_version: UNKNOWN.to_string(),
                platform: UNKNOWN.to_string(),
                engine_version: UNKNOWN.to_string(),
                api_version: UNKNOWN.to_string(),
                running: 0,
                total: 0,
                fetched_at: now,
                availability: Availability::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    struct FixedDigests;

    impl DigestSource for FixedDigests {
        fn latest_digest(&self, image: &str) -> Option<String> {
            (image == "nginx:latest").then(|| "sha256:new".to_string())
        }
    }

    fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new("nas", "10.0.0.5", Arc::new(NoDigestSource))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn version() -> RawVersion {
        serde_json::from_value(json!({
            "Platform": {"Name": "Docker Engine - Community"},
            "Version": "27.1.1",
            "ApiVersion": "1.46",
            "Os": "linux",
            "Arch": "amd64",
            "KernelVersion": "6.8.0"
        }))
        .unwrap()
    }

    fn containers() -> Vec<Value> {
        vec![
            json!({
                "Id": "aaa111",
                "Names": ["/web"],
                "Image": "nginx:latest@sha256:old",
                "ImageID": "sha256:old",
                "State": "running",
                "Status": "Up 2 hours (healthy)",
                "Labels": {"com.docker.compose.project": "media", "ha.web_port": "8080:http"},
                "Ports": [
                    {"IP": "0.0.0.0", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"},
                    {"IP": "::", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"}
                ],
                "NetworkSettings": {"Networks": {"bridge": {"IPAddress": "172.17.0.2", "MacAddress": "02:42:ac:11:00:02"}}},
                "Created": 1700000000
            }),
            json!({
                "Id": "bbb222",
                "Names": ["/db"],
                "Image": "postgres:16",
                "State": "exited",
                "Status": "Exited (0) 3 days ago",
                "Labels": {},
                "Ports": [],
                "Created": 1700000000
            }),
        ]
    }

    #[test]
    fn test_build_full_snapshot() {
        let snapshot = builder().build(Some(&version()), Some(&containers()[..]), None, now());

        assert_eq!(snapshot.containers.len(), 2);
        assert_eq!(snapshot.host.running, 1);
        assert_eq!(snapshot.host.total, 2);
        assert_eq!(snapshot.host.hostname, "10.0.0.5");
        assert_eq!(snapshot.host.platform, "Docker Engine - Community");
        assert_eq!(snapshot.host.status_line(), "1/2 running");

        let web = &snapshot.containers[&ContainerKey::new("nas", "aaa111")];
        assert_eq!(web.display_name, "web");
        assert_eq!(web.image, "nginx:latest");
        assert_eq!(web.health, Health::Healthy);
        assert_eq!(web.uptime, "2 hours");
        assert_eq!(web.project, "media");
        assert_eq!(web.service_urls, vec!["http://10.0.0.5:8080"]);
        assert_eq!(web.ports, vec!["8080:80/tcp"]);
        assert_eq!(web.mac_address, "02:42:ac:11:00:02");
        assert_eq!(web.update_available, UpdateAvailable::Unknown);
        assert_eq!(web.fetched_at, now());

        let db = &snapshot.containers[&ContainerKey::new("nas", "bbb222")];
        assert_eq!(db.uptime, UNKNOWN);
        assert_eq!(db.health, Health::None);
        assert_eq!(db.project, "");
        assert_eq!(db.network.display, "no network");
    }

    #[test]
    fn test_digest_source_drives_update_flag() {
        let builder = SnapshotBuilder::new("nas", "10.0.0.5", Arc::new(FixedDigests));
        let snapshot = builder.build(Some(&version()), Some(&containers()[..]), None, now());
        let web = &snapshot.containers[&ContainerKey::new("nas", "aaa111")];
        assert_eq!(web.update_available, UpdateAvailable::Yes);
    }

    #[test]
    fn test_watchtower_label_drives_update_flag() {
        let entries = vec![
            json!({"Id": "a", "Labels": {"com.centurylinklabs.watchtower.monitor-only": "true"}}),
            json!({"Id": "b", "Labels": {"com.centurylinklabs.watchtower.monitor-only": "false"}}),
            json!({"Id": "c", "Labels": {}}),
        ];
        let snapshot = builder().build(Some(&version()), Some(&entries[..]), None, now());
        let flag = |id: &str| snapshot.containers[&ContainerKey::new("nas", id)].update_available;
        assert_eq!(flag("a"), UpdateAvailable::Yes);
        assert_eq!(flag("b"), UpdateAvailable::No);
        assert_eq!(flag("c"), UpdateAvailable::Unknown);
    }

    #[test]
    fn test_same_name_distinct_keys() {
        let entries = vec![
            json!({"Id": "one", "Names": ["/app"], "State": "running"}),
            json!({"Id": "two", "Names": ["/app"], "State": "exited"}),
        ];
        let snapshot = builder().build(Some(&version()), Some(&entries[..]), None, now());
        assert_eq!(snapshot.containers.len(), 2);
        assert!(snapshot.containers.contains_key(&ContainerKey::new("nas", "one")));
        assert!(snapshot.containers.contains_key(&ContainerKey::new("nas", "two")));
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let entries = vec![
            json!({"Names": ["/no-id"], "State": "running"}),
            json!({"Id": "", "State": "running"}),
            json!({"Id": "broken", "Names": 42}),
            json!("not even an object"),
            json!({"Id": "ok", "Names": ["/fine"], "State": "running"}),
        ];
        let snapshot = builder().build(Some(&version()), Some(&entries[..]), None, now());
        assert_eq!(snapshot.containers.len(), 2);
        assert!(snapshot.containers.contains_key(&ContainerKey::new("nas", "ok")));

        let broken = &snapshot.containers[&ContainerKey::new("nas", "broken")];
        assert!(broken.names.is_empty());
        assert_eq!(broken.display_name, "broken");
    }

    #[test]
    fn test_mistyped_label_keeps_container() {
        let entries = vec![json!({
            "Id": "aaa111",
            "Names": ["/web"],
            "State": "running",
            "Labels": {"x": 1, "com.docker.compose.project": "media"},
            "Ports": [{"PrivatePort": "80", "PublicPort": "8080", "Type": "tcp"}]
        })];
        let snapshot = builder().build(Some(&version()), Some(&entries[..]), None, now());

        let web = &snapshot.containers[&ContainerKey::new("nas", "aaa111")];
        assert!(web.is_running());
        assert_eq!(web.project, "media");
        assert_eq!(web.ports, vec!["8080:80/tcp"]);
        assert_eq!(snapshot.host.running, 1);
    }

    #[test]
    fn test_containers_unavailable_keeps_host_state() {
        let first = builder().build(Some(&version()), Some(&containers()[..]), None, now());
        let later = now() + chrono::Duration::seconds(30);
        let snapshot = builder().build(Some(&version()), None, Some(&first.host), later);

        assert!(snapshot.containers.is_empty());
        assert!(!snapshot.containers_available());
        assert!(snapshot.host.availability.version);
        assert_eq!(snapshot.host.running, 1);
        assert_eq!(snapshot.host.total, 2);
        assert_eq!(snapshot.host.status_line(), "containers unavailable");
    }

    #[test]
    fn test_version_unavailable_carries_fields() {
        let first = builder().build(Some(&version()), Some(&containers()[..]), None, now());
        let later = now() + chrono::Duration::seconds(30);
        let snapshot = builder().build(None, Some(&containers()[..]), Some(&first.host), later);

        assert!(!snapshot.host.availability.version);
        assert!(snapshot.containers_available());
        assert_eq!(snapshot.host.engine_version, "27.1.1");
        assert_eq!(snapshot.host.fetched_at, later);
        assert_eq!(snapshot.containers.len(), 2);
        assert_eq!(snapshot.host.status_line(), "version unavailable");

        let cold = builder().build(None, None, None, now());
        assert_eq!(cold.host.engine_version, UNKNOWN);
        assert_eq!(cold.host.availability, Availability::default());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ContainerKey::new("nas", "abc").to_string(), "nas_abc");
    }
}
