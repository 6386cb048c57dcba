//! Configuration module for proxywatch.
//!
//! Server settings come from environment variables with sensible defaults.
//! Host instances come from a JSON file, or from a single proxy URL.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::fetch::FetchConfig;
use crate::reconcile::{GracePolicy, DEFAULT_GRACE_PERIOD_SECONDS};

pub const DEFAULT_SCAN_INTERVAL: u64 = 30;
pub const MAX_SCAN_INTERVAL: u64 = 3600;
pub const DEFAULT_TIMEOUT: f64 = 5.0;
pub const MAX_TIMEOUT: f64 = 1800.0;
pub const DEFAULT_HOST_NAME: &str = "Docker Host";
pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:2375";

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read hosts file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse hosts file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid host configuration: {0}")]
    Invalid(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the status API (default: 8080)
    pub http_port: u16,
    /// JSON file listing host instances (default: "hosts.json")
    pub hosts_file: String,
    /// Proxy used when the hosts file does not exist
    pub proxy_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            hosts_file: "hosts.json".to_string(),
            proxy_url: DEFAULT_PROXY_URL.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PROXYWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PROXYWATCH_HOSTS_FILE`: hosts file path (default: "hosts.json")
    /// - `PROXYWATCH_PROXY_URL`: fallback proxy URL (default: "http://127.0.0.1:2375")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("PROXYWATCH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(hosts_file) = env::var("PROXYWATCH_HOSTS_FILE") {
            cfg.hosts_file = hosts_file;
        }

        if let Ok(proxy_url) = env::var("PROXYWATCH_PROXY_URL") {
            cfg.proxy_url = proxy_url;
        }

        cfg
    }

    /// Host instances to start with.
    pub fn instances(&self) -> Result<Vec<InstanceConfig>, ConfigError> {
        let path = Path::new(&self.hosts_file);
        if path.exists() {
            return load_hosts(path);
        }

        tracing::info!(
            "No hosts file at {}, watching {} only",
            self.hosts_file,
            self.proxy_url
        );
        Ok(vec![InstanceConfig::new(DEFAULT_HOST_NAME, &self.proxy_url).normalized()?])
    }
}

/// Options of one watched host instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
    /// Seconds between fetch cycles.
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
    /// Seconds each retrieval may take.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_grace_enabled")]
    pub grace_period_enabled: bool,
    #[serde(default = "default_grace_seconds")]
    pub grace_period_seconds: u64,
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT
}

fn default_grace_enabled() -> bool {
    true
}

fn default_grace_seconds() -> u64 {
    DEFAULT_GRACE_PERIOD_SECONDS
}

impl InstanceConfig {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            url: url.to_string(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            grace_period_enabled: true,
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
        }
    }

    /// Fill defaults and validate.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("host name must not be empty".to_string()));
        }

        self.url = self.url.trim().trim_end_matches('/').to_string();
        let url = Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("{}: bad url {}: {}", self.name, self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::Invalid(format!(
                "{}: url {} must be http(s)://host[:port]",
                self.name, self.url
            )));
        }

        if self.id.trim().is_empty() {
            self.id = slugify(&self.name);
        }
        if self.scan_interval == 0 {
            self.scan_interval = DEFAULT_SCAN_INTERVAL;
        }
        if self.scan_interval > MAX_SCAN_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "{}: scan_interval {} exceeds {} seconds",
                self.name, self.scan_interval, MAX_SCAN_INTERVAL
            )));
        }
        if !self.timeout.is_finite() || self.timeout > MAX_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "{}: timeout {} must be at most {} seconds",
                self.name, self.timeout, MAX_TIMEOUT
            )));
        }
        if self.timeout <= 0.0 {
            self.timeout = DEFAULT_TIMEOUT;
        }

        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval.max(1))
    }

    /// Per-retrieval timeout, at most half the interval.
    pub fn timeout(&self) -> Duration {
        let timeout = if self.timeout.is_nan() || self.timeout <= 0.0 {
            Duration::from_secs_f64(DEFAULT_TIMEOUT)
        } else {
            Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::MAX)
        };
        timeout.min(self.interval() / 2)
    }

    pub fn grace_policy(&self) -> GracePolicy {
        GracePolicy {
            enabled: self.grace_period_enabled,
            period_seconds: self.grace_period_seconds,
        }
    }

    /// Host part of the proxy URL, used for service links.
    pub fn hostname(&self) -> String {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.clone())
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::new(&self.url, self.timeout())
    }
}

/// Load and validate host instances from a JSON array.
pub fn load_hosts(path: &Path) -> Result<Vec<InstanceConfig>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let raw: Vec<InstanceConfig> = serde_json::from_str(&content)?;

    let mut seen = HashSet::new();
    let mut hosts = Vec::with_capacity(raw.len());
    for host in raw {
        let host = host.normalized()?;
        if !seen.insert(host.id.clone()) {
            return Err(ConfigError::Invalid(format!("duplicate host id {}", host.id)));
        }
        hosts.push(host);
    }

    Ok(hosts)
}

/// Lowercase, alphanumerics kept, everything else collapsed to `_`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}
