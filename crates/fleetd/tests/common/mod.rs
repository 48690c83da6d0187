// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the integration tests: in-process server setup and a
//! minimal signing agent client.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum_test::TestServer;

use fleetd::config::FleetConfig;
use fleetd::protocol::MessageKind;
use fleetd::state::{AppState, Operator, OperatorDirectory};
use fleetd::transport::build_router;

pub const SECRET: &str = "integration-secret";

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

pub fn test_config() -> FleetConfig {
    FleetConfig {
        host: "127.0.0.1".into(),
        port: 0,
        agent_hmac_secret: SECRET.into(),
        operators_config: None,
        nonce_window_sec: 300,
        heartbeat_interval_sec: 30,
        offline_threshold_sec: 90,
        stale_sweep_ms: 30000,
        timeout_sweep_ms: 15000,
        default_job_timeout_sec: 300,
        presence_ttl_sec: 120,
    }
}

pub fn operator(token: &str, org: &str, permissions: &[&str]) -> Operator {
    Operator {
        token: token.to_owned(),
        organization_id: org.to_owned(),
        name: format!("op-{org}"),
        permissions: permissions.iter().map(|p| (*p).to_owned()).collect(),
    }
}

pub fn test_state(operators: Vec<Operator>) -> Arc<AppState> {
    AppState::with_operators(test_config(), OperatorDirectory::from_operators(operators))
}

pub fn test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(build_router(state)).expect("failed to create test server")
}

/// Mint an enrollment token through the admin API; returns the raw token.
pub async fn mint_token(
    server: &TestServer,
    bearer: &str,
    body: serde_json::Value,
) -> String {
    let resp = server
        .post("/api/v1/enrollment-tokens")
        .authorization_bearer(bearer)
        .json(&body)
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    body["data"]["token"].as_str().expect("raw token in response").to_owned()
}

/// A signing test double for an enrolled agent.
pub struct AgentClient {
    pub id: String,
    pub key: String,
}

impl AgentClient {
    /// Build a signed envelope with a fresh nonce and the current time.
    pub fn envelope(&self, kind: MessageKind, payload: serde_json::Value) -> serde_json::Value {
        self.envelope_at(kind, payload, now())
    }

    pub fn envelope_at(
        &self,
        kind: MessageKind,
        payload: serde_json::Value,
        ts: i64,
    ) -> serde_json::Value {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.envelope_with_nonce(kind, payload, ts, &nonce)
    }

    pub fn envelope_with_nonce(
        &self,
        kind: MessageKind,
        payload: serde_json::Value,
        ts: i64,
        nonce: &str,
    ) -> serde_json::Value {
        let hmac = fleetd::authn::sign(&self.key, &self.id, ts, nonce, kind, &payload)
            .expect("signing cannot fail");
        serde_json::json!({
            "agent_id": self.id,
            "ts": ts,
            "nonce": nonce,
            "type": kind.as_str(),
            "payload": payload,
            "hmac": hmac,
        })
    }
}

/// Enroll a new agent through the API and return its signing client.
pub async fn enroll_agent(server: &TestServer, raw_token: &str, hostname: &str) -> AgentClient {
    let resp = server
        .post("/api/v1/enroll")
        .json(&serde_json::json!({
            "enrollment_token": raw_token,
            "hostname": hostname,
            "os": "linux",
            "os_version": "6.1.0",
            "arch": "x86_64",
            "agent_version": "1.0.0",
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    AgentClient {
        id: body["data"]["agent_id"].as_str().expect("agent_id").to_owned(),
        key: body["data"]["agent_secret"].as_str().expect("agent_secret").to_owned(),
    }
}
