// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the fleet control plane.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all control-plane routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Agent API: enrollment, then envelope-authenticated traffic
        .route("/api/v1/enroll", post(http::enroll))
        .route("/api/v1/agent/heartbeat", post(http::agent_heartbeat))
        .route("/api/v1/agent/metrics", post(http::agent_metrics))
        .route("/api/v1/agent/inventory", post(http::agent_inventory))
        .route("/api/v1/agent/job-result", post(http::agent_job_result))
        .route("/api/v1/agent/jobs/next", post(http::agent_poll))
        // Admin API (operator bearer token, resolved per handler)
        .route("/api/v1/jobs", post(http::create_job).get(http::list_jobs))
        .route("/api/v1/jobs/{id}", get(http::get_job))
        .route("/api/v1/jobs/{id}/cancel", post(http::cancel_job))
        .route("/api/v1/agents", get(http::list_agents))
        .route("/api/v1/agents/{id}", get(http::get_agent).delete(http::delete_agent))
        .route("/api/v1/enrollment-tokens", post(http::create_enrollment_token))
        // Realtime events
        .route("/realtime", get(ws::realtime_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
