//! HTTP handlers for the receiver.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use warden_core::{
    CallbackId, DispatchReport, EngineError, LogLine, ManualTrigger, PrometheusAlert,
    ResourceChange, TriggerEvent,
};

use super::ReceiverState;
use crate::error::{RunnerError, RunnerResult};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` when every sink is healthy, else `degraded`.
    pub status: String,
    /// Active configuration generation.
    pub generation: u64,
    /// Loaded playbooks.
    pub playbooks: usize,
    /// Active sinks.
    pub sinks: usize,
    /// Events dispatched since start.
    pub processed: u64,
    /// Events dropped on full queues since start.
    pub dropped: u64,
    /// Seconds since start.
    pub uptime_secs: u64,
}

/// Alertmanager webhook body. Only the alert list is used.
#[derive(Debug, Deserialize)]
pub struct AlertmanagerPayload {
    /// The grouped alerts.
    pub alerts: Vec<PrometheusAlert>,
}

/// Number of events queued by a request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    /// Events queued.
    pub accepted: usize,
}

/// Body of `POST /api/trigger`.
#[derive(Debug, Deserialize)]
pub struct ExternalActionRequest {
    /// Registered action to run.
    pub action_name: String,
    /// Parameters for the action.
    #[serde(default)]
    pub action_params: Value,
    /// Sinks to deliver to; default routing if unset.
    #[serde(default)]
    pub sinks: Option<Vec<String>>,
}

/// Handle GET /health.
pub async fn health_check(
    State(state): State<Arc<ReceiverState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let generation = state.dispatcher().current();
    let healthy = state.dispatcher().is_healthy();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            generation: generation.version(),
            playbooks: generation.playbooks().len(),
            sinks: generation.sinks().len(),
            processed: state.pool().stats().processed(),
            dropped: state.pool().stats().dropped(),
            uptime_secs: state.uptime_secs(),
        }),
    )
}

async fn enqueue(
    state: &ReceiverState,
    events: impl IntoIterator<Item = TriggerEvent>,
) -> RunnerResult<(StatusCode, Json<Accepted>)> {
    let mut accepted = 0;
    for event in events {
        state.pool().submit(event).await?;
        accepted += 1;
    }
    Ok((StatusCode::ACCEPTED, Json(Accepted { accepted })))
}

/// Handle POST /api/alerts - one event per alert.
pub async fn receive_alerts(
    State(state): State<Arc<ReceiverState>>,
    Json(payload): Json<AlertmanagerPayload>,
) -> RunnerResult<(StatusCode, Json<Accepted>)> {
    debug!(alerts = payload.alerts.len(), "alertmanager webhook received");
    enqueue(
        &state,
        payload.alerts.into_iter().map(TriggerEvent::PrometheusAlert),
    )
    .await
}

/// Handle POST /api/k8s.
pub async fn receive_resource_change(
    State(state): State<Arc<ReceiverState>>,
    Json(change): Json<ResourceChange>,
) -> RunnerResult<(StatusCode, Json<Accepted>)> {
    enqueue(&state, [TriggerEvent::ResourceChange(change)]).await
}

/// Handle POST /api/logs.
pub async fn receive_log_line(
    State(state): State<Arc<ReceiverState>>,
    Json(line): Json<LogLine>,
) -> RunnerResult<(StatusCode, Json<Accepted>)> {
    enqueue(&state, [TriggerEvent::Log(line)]).await
}

/// Handle POST /api/manual - fires matching manual triggers.
pub async fn receive_manual(
    State(state): State<Arc<ReceiverState>>,
    Json(manual): Json<ManualTrigger>,
) -> RunnerResult<(StatusCode, Json<Accepted>)> {
    enqueue(&state, [TriggerEvent::Manual(manual)]).await
}

/// Handle POST /api/trigger - runs one action and waits for delivery.
pub async fn run_action(
    State(state): State<Arc<ReceiverState>>,
    Json(request): Json<ExternalActionRequest>,
) -> RunnerResult<Json<DispatchReport>> {
    if request.action_name.is_empty() {
        return Err(RunnerError::InvalidRequest(
            "action_name cannot be empty".to_string(),
        ));
    }
    let dispatcher = Arc::clone(state.dispatcher());
    let report = tokio::task::spawn_blocking(move || {
        dispatcher.run_external_action(
            &request.action_name,
            request.action_params,
            request.sinks,
        )
    })
    .await
    .map_err(|e| RunnerError::Internal(e.to_string()))??;
    Ok(Json(report))
}

fn parse_callback_id(id: &str) -> RunnerResult<CallbackId> {
    CallbackId::parse(id)
        .ok_or_else(|| RunnerError::InvalidRequest(format!("malformed callback id '{id}'")))
}

/// Handle POST /api/callbacks/{id}.
pub async fn invoke_callback(
    State(state): State<Arc<ReceiverState>>,
    Path(id): Path<String>,
) -> RunnerResult<Json<DispatchReport>> {
    let id = parse_callback_id(&id)?;
    let dispatcher = Arc::clone(state.dispatcher());
    let report = tokio::task::spawn_blocking(move || dispatcher.invoke_callback(&id))
        .await
        .map_err(|e| RunnerError::Internal(e.to_string()))??;
    Ok(Json(report))
}

/// Handle DELETE /api/callbacks/{id} - retires a callback button.
pub async fn remove_callback(
    State(state): State<Arc<ReceiverState>>,
    Path(id): Path<String>,
) -> RunnerResult<StatusCode> {
    let id = parse_callback_id(&id)?;
    state
        .dispatcher()
        .callbacks()
        .unsubscribe(&id)
        .ok_or_else(|| EngineError::CallbackNotFound { id: id.to_string() })?;
    debug!(callback_id = %id, "callback removed");
    Ok(StatusCode::NO_CONTENT)
}
