//! HTTP request handlers.

use super::AppState;
use crate::config::InstanceConfig;
use crate::reconcile::TrackedEntity;
use crate::scheduler::{InstanceStatus, SchedulerError};
use crate::snapshot::HostSummary;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

fn error_response(e: SchedulerError) -> Response {
    let status = match &e {
        SchedulerError::AlreadyRunning(_) => StatusCode::CONFLICT,
        SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::Config(_) => StatusCode::BAD_REQUEST,
        SchedulerError::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

fn status_line(status: &InstanceStatus) -> String {
    status
        .host
        .as_ref()
        .map(HostSummary::status_line)
        .unwrap_or_else(|| "pending".to_string())
}

// ============================================================================
// API: Hosts
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HostListItem {
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: String,
    pub host: Option<HostSummary>,
    pub entity_count: usize,
    pub active_count: usize,
    pub last_cycle: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub async fn handle_get_hosts(State(state): State<AppState>) -> impl IntoResponse {
    let hosts: Vec<HostListItem> = state
        .scheduler
        .statuses()
        .await
        .into_iter()
        .map(|s| HostListItem {
            status: status_line(&s),
            id: s.config.id,
            name: s.config.name,
            url: s.config.url,
            host: s.host,
            entity_count: s.entities.len(),
            active_count: s.entities.iter().filter(|e| e.is_active()).count(),
            last_cycle: s.last_cycle,
            last_error: s.last_error,
        })
        .collect();

    Json(hosts)
}

#[derive(Debug, Serialize)]
pub struct EntityView {
    #[serde(flatten)]
    pub entity: TrackedEntity,
    pub grace_remaining_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HostDetail {
    pub config: InstanceConfig,
    pub status: String,
    pub host: Option<HostSummary>,
    pub entities: Vec<EntityView>,
    pub last_cycle: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub async fn handle_get_host(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Some(s) = state.scheduler.status(&id).await else {
        return (StatusCode::NOT_FOUND, "Host not found").into_response();
    };

    let now = Utc::now();
    let policy = s.config.grace_policy();
    let status = status_line(&s);
    let entities = s
        .entities
        .into_iter()
        .map(|entity| EntityView {
            grace_remaining_seconds: entity.grace_remaining(&policy, now),
            entity,
        })
        .collect();

    Json(HostDetail {
        config: s.config,
        status,
        host: s.host,
        entities,
        last_cycle: s.last_cycle,
        last_error: s.last_error,
    })
    .into_response()
}

pub async fn handle_get_decisions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.scheduler.status(&id).await {
        Some(s) => Json(s.last_decisions).into_response(),
        None => (StatusCode::NOT_FOUND, "Host not found").into_response(),
    }
}

pub async fn handle_create_host(
    State(state): State<AppState>,
    Json(req): Json<InstanceConfig>,
) -> Response {
    let config = match req.normalized() {
        Ok(c) => c,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.scheduler.add_instance(config.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(config)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_update_host(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InstanceConfig>,
) -> Response {
    match state.scheduler.reconfigure(&id, req).await {
        Ok(config) => Json(config).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_delete_host(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.scheduler.remove_instance(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
