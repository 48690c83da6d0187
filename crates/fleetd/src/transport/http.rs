// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the fleet control plane: the agent-facing envelope
//! endpoints and the operator-facing admin API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::dispatch::{self, JobSpec};
use crate::error::{ApiError, AuthError};
use crate::model::AuditEntry;
use crate::presence;
use crate::protocol::{
    AgentPolicy, AgentStatus, EnrollRequest, Envelope, HeartbeatPayload, InventoryPayload,
    JobPriority, JobResultPayload, JobStatus, JobType, MessageKind, MetricsPayload, OsType,
};
use crate::registry::{self, EnrollRejection};
use crate::state::AppState;
use crate::store::{AgentFilter, JobFilter};
use crate::transport::auth;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
struct Success<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success { success: true, data })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub agent_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: JobPriority,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

fn default_priority() -> JobPriority {
    JobPriority::Normal
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub policy: Option<AgentPolicy>,
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token_id: String,
    /// Raw token, shown only in this response.
    pub token: String,
    pub expires_at: Option<i64>,
    pub max_uses: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AgentListQuery {
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub os: Option<OsType>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    50
}

fn parse_payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, AuthError> {
    serde_json::from_value(envelope.payload.clone()).map_err(|_| AuthError::Malformed)
}

// -- Health -------------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let agent_count = s.store.agent_count().await;
    Json(HealthResponse { status: "running".to_owned(), agent_count })
}

// -- Agent API ----------------------------------------------------------------

/// `POST /api/v1/enroll` — exchange an enrollment token for an identity.
pub async fn enroll(
    State(s): State<Arc<AppState>>,
    Json(req): Json<EnrollRequest>,
) -> impl IntoResponse {
    match registry::enroll(&s, req).await {
        Ok(resp) => ok(resp).into_response(),
        Err(EnrollRejection::Token(e)) => e.to_http_response().into_response(),
        Err(EnrollRejection::Internal(e)) => {
            warn!(err = %e, "enrollment failed internally");
            ApiError::Internal.to_http_response("enrollment failed").into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HeartbeatAck {
    pub ack: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_job: Option<crate::protocol::QueueEntry>,
}

/// `POST /api/v1/agent/heartbeat` — liveness report; the response
/// piggybacks at most one queued job so quiet agents skip a poll.
pub async fn agent_heartbeat(
    State(s): State<Arc<AppState>>,
    Json(envelope): Json<Envelope>,
) -> impl IntoResponse {
    let agent = match auth::verify_envelope(&s, &envelope, MessageKind::Heartbeat).await {
        Ok(a) => a,
        Err(e) => return e.to_http_response().into_response(),
    };
    let payload: HeartbeatPayload = match parse_payload(&envelope) {
        Ok(p) => p,
        Err(e) => return e.to_http_response().into_response(),
    };

    presence::process_heartbeat(&s, &agent, &payload).await;
    let pending_job = dispatch::poll(&s, &agent.id).await;
    ok(HeartbeatAck { ack: true, pending_job }).into_response()
}

/// `POST /api/v1/agent/metrics`
pub async fn agent_metrics(
    State(s): State<Arc<AppState>>,
    Json(envelope): Json<Envelope>,
) -> impl IntoResponse {
    let agent = match auth::verify_envelope(&s, &envelope, MessageKind::MetricsPush).await {
        Ok(a) => a,
        Err(e) => return e.to_http_response().into_response(),
    };
    let payload: MetricsPayload = match parse_payload(&envelope) {
        Ok(p) => p,
        Err(e) => return e.to_http_response().into_response(),
    };

    presence::process_metrics(&s, &agent, &payload).await;
    ok(serde_json::json!({"ack": true})).into_response()
}

/// `POST /api/v1/agent/inventory`
pub async fn agent_inventory(
    State(s): State<Arc<AppState>>,
    Json(envelope): Json<Envelope>,
) -> impl IntoResponse {
    let agent = match auth::verify_envelope(&s, &envelope, MessageKind::InventoryPush).await {
        Ok(a) => a,
        Err(e) => return e.to_http_response().into_response(),
    };
    let payload: InventoryPayload = match parse_payload(&envelope) {
        Ok(p) => p,
        Err(e) => return e.to_http_response().into_response(),
    };

    presence::process_inventory(&s, &agent, &payload).await;
    ok(serde_json::json!({"ack": true})).into_response()
}

/// `POST /api/v1/agent/job-result`
pub async fn agent_job_result(
    State(s): State<Arc<AppState>>,
    Json(envelope): Json<Envelope>,
) -> impl IntoResponse {
    let agent = match auth::verify_envelope(&s, &envelope, MessageKind::JobResult).await {
        Ok(a) => a,
        Err(e) => return e.to_http_response().into_response(),
    };
    let payload: JobResultPayload = match parse_payload(&envelope) {
        Ok(p) => p,
        Err(e) => return e.to_http_response().into_response(),
    };

    match dispatch::report_result(&s, &agent.id, &agent.organization_id, &payload).await {
        Ok(()) => ok(serde_json::json!({"ack": true})).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `POST /api/v1/agent/jobs/next` — explicit poll for one queued job.
pub async fn agent_poll(
    State(s): State<Arc<AppState>>,
    Json(envelope): Json<Envelope>,
) -> impl IntoResponse {
    let agent = match auth::verify_envelope(&s, &envelope, MessageKind::PollRequest).await {
        Ok(a) => a,
        Err(e) => return e.to_http_response().into_response(),
    };

    ok(dispatch::poll(&s, &agent.id).await).into_response()
}

// -- Admin API ----------------------------------------------------------------

/// `POST /api/v1/jobs`
pub async fn create_job(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateJobRequest>,
) -> impl IntoResponse {
    let operator = match auth::resolve_operator(&s, &headers) {
        Ok(op) => op,
        Err(e) => return e.to_http_response("missing or invalid bearer token").into_response(),
    };
    let spec = JobSpec {
        agent_id: req.agent_id,
        job_type: req.job_type,
        payload: req.payload,
        priority: req.priority,
        timeout_sec: req.timeout_sec,
    };
    match dispatch::create_job(&s, operator, spec).await {
        Ok(job) => ok(job).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `GET /api/v1/jobs`
pub async fn list_jobs(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<JobListQuery>,
) -> impl IntoResponse {
    let operator = match auth::resolve_operator(&s, &headers) {
        Ok(op) => op,
        Err(e) => return e.to_http_response("missing or invalid bearer token").into_response(),
    };
    let filter =
        JobFilter { agent_id: q.agent_id, status: q.status, created_by: q.created_by };
    let (jobs, meta) = s
        .store
        .list_jobs(&operator.organization_id, &filter, q.page, q.per_page.clamp(1, 200))
        .await;
    ok(serde_json::json!({"jobs": jobs, "meta": meta})).into_response()
}

/// `GET /api/v1/jobs/{id}`
pub async fn get_job(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let operator = match auth::resolve_operator(&s, &headers) {
        Ok(op) => op,
        Err(e) => return e.to_http_response("missing or invalid bearer token").into_response(),
    };
    match s.store.get_job(&id, &operator.organization_id).await {
        Some((job, result)) => {
            ok(serde_json::json!({"job": job, "result": result})).into_response()
        }
        None => ApiError::NotFound.to_http_response("job not found").into_response(),
    }
}

/// `POST /api/v1/jobs/{id}/cancel`
pub async fn cancel_job(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let operator = match auth::resolve_operator(&s, &headers) {
        Ok(op) => op,
        Err(e) => return e.to_http_response("missing or invalid bearer token").into_response(),
    };
    let Some((job, _)) = s.store.get_job(&id, &operator.organization_id).await else {
        return ApiError::NotFound.to_http_response("job not found").into_response();
    };
    match dispatch::cancel(&s, &job, &operator.name).await {
        Ok(()) => ok(serde_json::json!({"cancelled": true})).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `GET /api/v1/agents`
pub async fn list_agents(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<AgentListQuery>,
) -> impl IntoResponse {
    let operator = match auth::resolve_operator(&s, &headers) {
        Ok(op) => op,
        Err(e) => return e.to_http_response("missing or invalid bearer token").into_response(),
    };
    let filter = AgentFilter { status: q.status, os: q.os, search: q.search };
    let (agents, meta) = s
        .store
        .list_agents(&operator.organization_id, &filter, q.page, q.per_page.clamp(1, 200))
        .await;
    ok(serde_json::json!({"agents": agents, "meta": meta})).into_response()
}

/// `GET /api/v1/agents/{id}` — agent row plus cached presence and the
/// freshest metrics sample, when still within TTL.
pub async fn get_agent(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let operator = match auth::resolve_operator(&s, &headers) {
        Ok(op) => op,
        Err(e) => return e.to_http_response("missing or invalid bearer token").into_response(),
    };
    let Some(agent) = s.store.get_agent_scoped(&id, &operator.organization_id).await else {
        return ApiError::NotFound.to_http_response("agent not found").into_response();
    };
    let now = s.now() as u64;
    let latest_metrics = s.cache.latest_metrics(&id, now).await;
    let inventory = s.store.latest_inventory(&id).await;
    ok(serde_json::json!({
        "agent": agent,
        "latest_metrics": latest_metrics,
        "inventory": inventory,
    }))
    .into_response()
}

/// `DELETE /api/v1/agents/{id}` — hard delete; queued deliveries dropped.
pub async fn delete_agent(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let operator = match auth::resolve_operator(&s, &headers) {
        Ok(op) => op,
        Err(e) => return e.to_http_response("missing or invalid bearer token").into_response(),
    };
    if !s.store.delete_agent(&id, &operator.organization_id).await {
        return ApiError::NotFound.to_http_response("agent not found").into_response();
    }
    s.cache.clear_queue(&id).await;
    s.store
        .record_audit(AuditEntry {
            organization_id: operator.organization_id.clone(),
            actor: Some(operator.name.clone()),
            agent_id: Some(id.clone()),
            action: "agent.deleted",
            resource_type: "agent",
            resource_id: id.clone(),
            details: serde_json::json!({}),
            recorded_at: s.now(),
        })
        .await;
    tracing::info!(agent_id = %id, actor = %operator.name, "agent deleted");
    ok(serde_json::json!({"deleted": true})).into_response()
}

/// `POST /api/v1/enrollment-tokens`
pub async fn create_enrollment_token(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTokenRequest>,
) -> impl IntoResponse {
    let operator = match auth::resolve_operator(&s, &headers) {
        Ok(op) => op,
        Err(e) => return e.to_http_response("missing or invalid bearer token").into_response(),
    };
    if !operator.has_permission("agents.enroll") {
        return crate::error::DispatchError::PermissionMissing.to_http_response().into_response();
    }
    let (raw, token) = registry::mint_token(
        &s,
        &operator.organization_id,
        &operator.name,
        req.max_uses,
        req.expires_at,
        req.tags,
        req.policy,
    )
    .await;
    ok(CreateTokenResponse {
        token_id: token.id,
        token: raw,
        expires_at: token.expires_at,
        max_uses: token.max_uses,
    })
    .into_response()
}
