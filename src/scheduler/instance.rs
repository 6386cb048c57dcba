//! One watched host: its fetch loop and the reconciler state it owns.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::InstanceConfig;
use crate::fetch::{build_client, run_fetch_cycle, FetchError, FetchOutcome};
use crate::reconcile::{reconcile, Decisions, ReconcilerState, TrackedEntity};
use crate::snapshot::{DigestSource, HostSummary, SnapshotBuilder};

use super::ReconcileListener;

/// What readers see of an instance, republished after every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub config: InstanceConfig,
    pub host: Option<HostSummary>,
    pub entities: Vec<TrackedEntity>,
    pub last_decisions: Decisions,
    pub last_error: Option<String>,
    pub last_cycle: Option<DateTime<Utc>>,
    pub cycles: u64,
}

impl InstanceStatus {
    pub fn new(config: InstanceConfig) -> Self {
        Self {
            config,
            host: None,
            entities: Vec::new(),
            last_decisions: Decisions::default(),
            last_error: None,
            last_cycle: None,
            cycles: 0,
        }
    }
}

pub type SharedStatus = Arc<RwLock<InstanceStatus>>;

/// Runs fetch cycles for one host and owns its [`ReconcilerState`].
///
/// Only the loop task touches the runner, one cycle at a time.
pub struct InstanceRunner {
    config: InstanceConfig,
    client: reqwest::Client,
    builder: SnapshotBuilder,
    digests: Arc<dyn DigestSource>,
    state: ReconcilerState,
    listener: Arc<dyn ReconcileListener>,
    status: SharedStatus,
}

impl InstanceRunner {
    pub fn new(
        config: InstanceConfig,
        digests: Arc<dyn DigestSource>,
        listener: Arc<dyn ReconcileListener>,
        status: SharedStatus,
    ) -> Result<Self, FetchError> {
        let client = build_client(config.timeout())?;
        let builder = SnapshotBuilder::new(&config.id, &config.hostname(), digests.clone());
        Ok(Self {
            config,
            client,
            builder,
            digests,
            state: ReconcilerState::new(),
            listener,
            status,
        })
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Swap in new options. Tracked entities are kept.
    pub fn reconfigure(&mut self, config: InstanceConfig) -> Result<(), FetchError> {
        if config.timeout() != self.config.timeout() {
            self.client = build_client(config.timeout())?;
        }
        if config.hostname() != self.config.hostname() {
            self.builder = SnapshotBuilder::new(&self.config.id, &config.hostname(), self.digests.clone());
        }
        tracing::info!(
            "{}: reconfigured (interval {}s, grace {})",
            self.config.id,
            config.scan_interval,
            if config.grace_policy().is_disabled() {
                "off".to_string()
            } else {
                format!("{}s", config.grace_period_seconds)
            }
        );
        self.config = InstanceConfig {
            id: self.config.id.clone(),
            ..config
        };
        self.write_status(|status| status.config = self.config.clone());
        Ok(())
    }

    pub async fn fetch(&self) -> FetchOutcome {
        run_fetch_cycle(&self.client, &self.config.fetch_config()).await
    }

    /// Turn a fetch outcome into a snapshot, reconcile, notify, publish.
    pub fn apply(&mut self, outcome: FetchOutcome, now: DateTime<Utc>) -> Decisions {
        let id = self.config.id.clone();
        if let Err(e) = &outcome.version {
            tracing::warn!("{}: version unavailable: {}", id, e);
        }
        if let Err(e) = &outcome.containers {
            tracing::warn!("{}: containers unavailable: {}", id, e);
        }
        if outcome.is_total_failure() {
            tracing::warn!(
                "{}: proxy gave no information, keeping {} tracked containers as they are",
                id,
                self.state.entities.len()
            );
        }

        let snapshot = self.builder.build_from(&outcome, self.state.host.as_ref(), now);
        self.listener.on_snapshot(&id, &snapshot.host, &snapshot.containers);

        let state = std::mem::take(&mut self.state);
        let (state, decisions) = reconcile(state, &snapshot, self.config.grace_policy(), now);
        self.state = state;
        self.listener.on_reconciled(&id, &decisions);

        let last_error = outcome.status().err().map(|e| e.to_string());
        let host = self.state.host.clone();
        let entities: Vec<TrackedEntity> = self.state.entities.values().cloned().collect();
        let published = decisions.clone();
        self.write_status(move |status| {
            status.host = host;
            status.entities = entities;
            status.last_decisions = published;
            status.last_error = last_error;
            status.last_cycle = Some(now);
            status.cycles += 1;
        });

        decisions
    }

    fn write_status(&self, update: impl FnOnce(&mut InstanceStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut status);
    }
}

/// Drive one instance until it is stopped.
///
/// Ticks never overlap: a cycle runs to completion inside the loop, and
/// ticks missed meanwhile are skipped. Results of a cycle that finishes
/// after a stop request are dropped.
pub async fn run_instance_loop(
    mut runner: InstanceRunner,
    mut config_rx: watch::Receiver<InstanceConfig>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    // Stagger instances started together.
    let jitter = Duration::from_millis(rand::random::<u64>() % 100);
    tokio::select! {
        _ = stop_rx.recv() => return,
        _ = tokio::time::sleep(jitter) => {}
    }

    let mut interval = new_interval(runner.config().interval(), Instant::now());

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let config = config_rx.borrow_and_update().clone();
                let period = config.interval();
                let reschedule = period != runner.config().interval();
                if let Err(e) = runner.reconfigure(config) {
                    tracing::error!("{}: cannot apply new configuration: {}", runner.config().id, e);
                    continue;
                }
                if reschedule {
                    interval = new_interval(period, Instant::now() + period);
                }
            }
            _ = interval.tick() => {
                let outcome = runner.fetch().await;
                if stop_requested(&mut stop_rx) {
                    tracing::debug!("{}: stopped during fetch, discarding results", runner.config().id);
                    break;
                }
                runner.apply(outcome, Utc::now());
            }
        }
    }

    tracing::info!("{}: polling stopped", runner.config().id);
}

fn new_interval(period: Duration, start: Instant) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn stop_requested(stop_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        stop_rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}
