//! Fetch cycle: the two independent retrievals made on every tick.
//!
//! `/version` and `/containers/json` are requested concurrently. Each one
//! succeeds or fails on its own; the cycle always reports both results.

mod http;
mod models;

pub use http::*;
pub use models::*;

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Fetch error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("proxy unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("partial failure: {0}")]
    PartialFailure(String),
}

/// Where and how patiently to fetch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl FetchConfig {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn version_url(&self) -> String {
        format!("{}/version", self.base_url)
    }

    pub fn containers_url(&self) -> String {
        format!("{}/containers/json?all=true", self.base_url)
    }
}

/// Results of one fetch cycle, one per retrieval.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub version: Result<RawVersion, FetchError>,
    /// Entries stay untyped here so a single bad container can be skipped later.
    pub containers: Result<Vec<Value>, FetchError>,
}

impl FetchOutcome {
    /// Cycle-level classification.
    ///
    /// `Ok` when both retrievals succeeded, `PartialFailure` when exactly one
    /// did, and the container error when neither did.
    pub fn status(&self) -> Result<(), FetchError> {
        match (&self.version, &self.containers) {
            (Ok(_), Ok(_)) => Ok(()),
            (Err(e), Ok(_)) => Err(FetchError::PartialFailure(format!("version: {}", e))),
            (Ok(_), Err(e)) => Err(FetchError::PartialFailure(format!("containers: {}", e))),
            (Err(_), Err(e)) => Err(e.clone()),
        }
    }

    pub fn is_total_failure(&self) -> bool {
        self.version.is_err() && self.containers.is_err()
    }
}

/// Run both retrievals concurrently and wait for each to finish or time out.
pub async fn run_fetch_cycle(client: &reqwest::Client, config: &FetchConfig) -> FetchOutcome {
    let version_url = config.version_url();
    let containers_url = config.containers_url();

    let (version, containers) = tokio::join!(
        get_json::<RawVersion>(client, &version_url, config.timeout),
        get_json::<Vec<Value>>(client, &containers_url, config.timeout),
    );

    FetchOutcome { version, containers }
}
