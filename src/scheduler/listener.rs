//! Downstream hooks called after every cycle.

use std::collections::HashMap;

use crate::reconcile::Decisions;
use crate::snapshot::{ContainerKey, ContainerView, HostSummary};

/// Receives each cycle's results, e.g. to register or drop entities in a
/// presentation layer.
pub trait ReconcileListener: Send + Sync {
    /// Called once per completed cycle with the freshly built snapshot.
    fn on_snapshot(
        &self,
        instance: &str,
        host: &HostSummary,
        containers: &HashMap<ContainerKey, ContainerView>,
    );

    /// Called once per cycle after reconciliation.
    fn on_reconciled(&self, instance: &str, decisions: &Decisions);
}

/// Listener that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl ReconcileListener for LogListener {
    fn on_snapshot(
        &self,
        instance: &str,
        host: &HostSummary,
        containers: &HashMap<ContainerKey, ContainerView>,
    ) {
        tracing::debug!(
            "{}: {} ({} containers in snapshot)",
            instance,
            host.status_line(),
            containers.len()
        );
    }

    fn on_reconciled(&self, instance: &str, decisions: &Decisions) {
        if decisions.is_empty() {
            return;
        }
        for key in &decisions.created {
            tracing::info!("{}: tracking new container {}", instance, key.container_id);
        }
        for key in &decisions.revived {
            tracing::info!("{}: container {} is back", instance, key.container_id);
        }
        for key in &decisions.graced {
            tracing::debug!("{}: container {} missing, grace period started", instance, key.container_id);
        }
        for key in &decisions.removed {
            tracing::info!("{}: grace period over, dropping container {}", instance, key.container_id);
        }
        if !decisions.updated.is_empty() {
            tracing::debug!("{}: updated {} containers", instance, decisions.updated.len());
        }
    }
}
