//! Reconciler: folds each new snapshot into the tracked entity set.
//!
//! An entity is either `Active` or in `Grace` since the cycle it went
//! missing. Missing entities keep their last view until the grace period
//! runs out. A cycle without container data changes nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::snapshot::{ContainerKey, ContainerView, HostSummary, Snapshot};

/// Default grace period: one week.
pub const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 604_800;

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EntityState {
    Active,
    Grace { since: DateTime<Utc> },
}

/// How long a vanished container stays visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePolicy {
    pub enabled: bool,
    pub period_seconds: u64,
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
        }
    }
}

impl GracePolicy {
    /// Disabled, or a zero period: evict on first absence.
    pub fn is_disabled(&self) -> bool {
        !self.enabled || self.period_seconds == 0
    }

    fn expired(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.is_disabled() || (now - since).num_seconds().max(0) as u64 >= self.period_seconds
    }
}

/// The reconciler's record of one container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEntity {
    pub key: ContainerKey,
    pub view: ContainerView,
    #[serde(flatten)]
    pub state: EntityState,
    pub last_seen: DateTime<Utc>,
}

impl TrackedEntity {
    fn new(key: ContainerKey, view: ContainerView, now: DateTime<Utc>) -> Self {
        Self {
            key,
            view,
            state: EntityState::Active,
            last_seen: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }

    /// Seconds left before eviction, for entities in grace.
    pub fn grace_remaining(&self, policy: &GracePolicy, now: DateTime<Utc>) -> Option<u64> {
        match self.state {
            EntityState::Active => None,
            EntityState::Grace { since } => {
                let elapsed = (now - since).num_seconds().max(0) as u64;
                Some(policy.period_seconds.saturating_sub(elapsed))
            }
        }
    }
}

/// Everything the reconciler remembers for one host instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilerState {
    pub entities: BTreeMap<ContainerKey, TrackedEntity>,
    pub host: Option<HostSummary>,
}

impl ReconcilerState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What changed in one reconciliation, per decision kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Decisions {
    pub created: Vec<ContainerKey>,
    pub updated: Vec<ContainerKey>,
    pub revived: Vec<ContainerKey>,
    pub graced: Vec<ContainerKey>,
    pub removed: Vec<ContainerKey>,
}

impl Decisions {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.revived.is_empty()
            && self.graced.is_empty()
            && self.removed.is_empty()
    }
}

/// Fold `snapshot` into `state`.
///
/// Present keys are created, updated or revived; absent active keys enter
/// grace (or are evicted right away when grace is disabled); absent keys
/// whose grace ran out are evicted. Keys are visited in order so the
/// decision lists are reproducible.
pub fn reconcile(
    mut state: ReconcilerState,
    snapshot: &Snapshot,
    policy: GracePolicy,
    now: DateTime<Utc>,
) -> (ReconcilerState, Decisions) {
    let mut decisions = Decisions::default();
    state.host = Some(snapshot.host.clone());

    if !snapshot.containers_available() {
        return (state, decisions);
    }

    let mut present: Vec<(&ContainerKey, &ContainerView)> = snapshot.containers.iter().collect();
    present.sort_by(|a, b| a.0.cmp(b.0));

    for (key, view) in present {
        match state.entities.get_mut(key) {
            None => {
                state
                    .entities
                    .insert(key.clone(), TrackedEntity::new(key.clone(), view.clone(), now));
                decisions.created.push(key.clone());
            }
            Some(entity) => {
                entity.view = view.clone();
                entity.last_seen = now;
                match entity.state {
                    EntityState::Active => decisions.updated.push(key.clone()),
                    EntityState::Grace { .. } => {
                        entity.state = EntityState::Active;
                        decisions.revived.push(key.clone());
                    }
                }
            }
        }
    }

    let mut evicted = Vec::new();
    for (key, entity) in state.entities.iter_mut() {
        if snapshot.containers.contains_key(key) {
            continue;
        }
        match entity.state {
            EntityState::Active if policy.is_disabled() => evicted.push(key.clone()),
            EntityState::Active => {
                entity.state = EntityState::Grace { since: now };
                decisions.graced.push(key.clone());
            }
            EntityState::Grace { since } if policy.expired(since, now) => {
                evicted.push(key.clone())
            }
            EntityState::Grace { .. } => {}
        }
    }

    for key in evicted {
        state.entities.remove(&key);
        decisions.removed.push(key);
    }

    (state, decisions)
}
