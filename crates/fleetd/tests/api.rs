// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the HTTP surface: enrollment, envelope
//! authentication, and admin API access control.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

mod common;

use common::*;
use fleetd::protocol::MessageKind;

#[tokio::test]
async fn health_reports_agent_count() {
    let state = test_state(vec![operator("tok-admin", "org-1", &["*"])]);
    let server = test_server(state);

    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["agent_count"], 0);

    let raw = mint_token(&server, "tok-admin", serde_json::json!({})).await;
    enroll_agent(&server, &raw, "host-a").await;

    let body: serde_json::Value = server.get("/api/v1/health").await.json();
    assert_eq!(body["agent_count"], 1);
}

#[tokio::test]
async fn enrollment_with_unknown_token_is_rejected() {
    let server = test_server(test_state(vec![]));

    let resp = server
        .post("/api/v1/enroll")
        .json(&serde_json::json!({
            "enrollment_token": "fet_bogus",
            "hostname": "host-x",
            "os": "linux",
            "os_version": "6.1",
            "arch": "x86_64",
            "agent_version": "1.0.0",
        }))
        .await;
    resp.assert_status_bad_request();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "TOKEN_INVALID");
}

#[tokio::test]
async fn single_use_token_enrolls_exactly_once() {
    let state = test_state(vec![operator("tok-admin", "org-1", &["*"])]);
    let server = test_server(state);
    let raw = mint_token(&server, "tok-admin", serde_json::json!({"max_uses": 1})).await;

    enroll_agent(&server, &raw, "host-a").await;

    let resp = server
        .post("/api/v1/enroll")
        .json(&serde_json::json!({
            "enrollment_token": raw,
            "hostname": "host-b",
            "os": "linux",
            "os_version": "6.1",
            "arch": "x86_64",
            "agent_version": "1.0.0",
        }))
        .await;
    resp.assert_status_bad_request();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "TOKEN_EXHAUSTED");
}

#[tokio::test]
async fn heartbeat_requires_a_valid_signature() {
    let state = test_state(vec![operator("tok-admin", "org-1", &["*"])]);
    let server = test_server(state);
    let raw = mint_token(&server, "tok-admin", serde_json::json!({})).await;
    let agent = enroll_agent(&server, &raw, "host-a").await;

    let payload = serde_json::json!({
        "status": "online",
        "uptime_sec": 10,
        "agent_version": "1.0.0",
    });

    // Valid envelope.
    let resp =
        server.post("/api/v1/agent/heartbeat").json(&agent.envelope(MessageKind::Heartbeat, payload.clone())).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["ack"], true);

    // Tampered payload: signature no longer matches.
    let mut env = agent.envelope(MessageKind::Heartbeat, payload.clone());
    env["payload"]["status"] = "offline".into();
    let resp = server.post("/api/v1/agent/heartbeat").json(&env).await;
    resp.assert_status_unauthorized();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "SIGNATURE_INVALID");

    // Wrong key entirely.
    let stranger = AgentClient { id: agent.id.clone(), key: "00".repeat(32) };
    let resp = server
        .post("/api/v1/agent/heartbeat")
        .json(&stranger.envelope(MessageKind::Heartbeat, payload))
        .await;
    resp.assert_status_unauthorized();
}

#[tokio::test]
async fn replayed_envelope_is_rejected() {
    let state = test_state(vec![operator("tok-admin", "org-1", &["*"])]);
    let server = test_server(state);
    let raw = mint_token(&server, "tok-admin", serde_json::json!({})).await;
    let agent = enroll_agent(&server, &raw, "host-a").await;

    let env = agent.envelope(
        MessageKind::Heartbeat,
        serde_json::json!({"status": "online", "uptime_sec": 1, "agent_version": "1.0.0"}),
    );

    server.post("/api/v1/agent/heartbeat").json(&env).await.assert_status_ok();

    let resp = server.post("/api/v1/agent/heartbeat").json(&env).await;
    resp.assert_status_unauthorized();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "REPLAY_DETECTED");
}

#[tokio::test]
async fn skewed_timestamp_is_rejected() {
    let state = test_state(vec![operator("tok-admin", "org-1", &["*"])]);
    let server = test_server(state);
    let raw = mint_token(&server, "tok-admin", serde_json::json!({})).await;
    let agent = enroll_agent(&server, &raw, "host-a").await;

    let env = agent.envelope_at(
        MessageKind::Heartbeat,
        serde_json::json!({"status": "online", "uptime_sec": 1, "agent_version": "1.0.0"}),
        now() - 301,
    );
    let resp = server.post("/api/v1/agent/heartbeat").json(&env).await;
    resp.assert_status_unauthorized();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "CLOCK_SKEW");
}

#[tokio::test]
async fn envelope_kind_must_match_endpoint() {
    let state = test_state(vec![operator("tok-admin", "org-1", &["*"])]);
    let server = test_server(state);
    let raw = mint_token(&server, "tok-admin", serde_json::json!({})).await;
    let agent = enroll_agent(&server, &raw, "host-a").await;

    // A poll_request envelope sent to the heartbeat endpoint.
    let env = agent.envelope(MessageKind::PollRequest, serde_json::json!({}));
    let resp = server.post("/api/v1/agent/heartbeat").json(&env).await;
    resp.assert_status_bad_request();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "ENVELOPE_INVALID");
}

#[tokio::test]
async fn admin_api_requires_bearer_token() {
    let server = test_server(test_state(vec![operator("tok-admin", "org-1", &["*"])]));

    server.get("/api/v1/agents").await.assert_status_unauthorized();
    server
        .get("/api/v1/agents")
        .authorization_bearer("wrong")
        .await
        .assert_status_unauthorized();
    server.get("/api/v1/agents").authorization_bearer("tok-admin").await.assert_status_ok();
}

#[tokio::test]
async fn tenancy_hides_foreign_agents_and_jobs() {
    let state = test_state(vec![
        operator("tok-one", "org-1", &["*"]),
        operator("tok-two", "org-2", &["*"]),
    ]);
    let server = test_server(state);
    let raw = mint_token(&server, "tok-one", serde_json::json!({})).await;
    let agent = enroll_agent(&server, &raw, "host-a").await;

    // org-2 sees an empty fleet and cannot address org-1's agent.
    let body: serde_json::Value =
        server.get("/api/v1/agents").authorization_bearer("tok-two").await.json();
    assert_eq!(body["data"]["agents"].as_array().unwrap().len(), 0);

    server
        .get(&format!("/api/v1/agents/{}", agent.id))
        .authorization_bearer("tok-two")
        .await
        .assert_status_not_found();
    server
        .delete(&format!("/api/v1/agents/{}", agent.id))
        .authorization_bearer("tok-two")
        .await
        .assert_status_not_found();

    // Cross-tenant job creation reads as agent-not-found.
    let resp = server
        .post("/api/v1/jobs")
        .authorization_bearer("tok-two")
        .json(&serde_json::json!({"agent_id": agent.id, "type": "run_script"}))
        .await;
    resp.assert_status_not_found();
}

#[tokio::test]
async fn job_creation_enforces_permissions() {
    let state = test_state(vec![
        operator("tok-admin", "org-1", &["*", "agents.enroll"]),
        operator("tok-limited", "org-1", &["scripts.run"]),
    ]);
    let server = test_server(state);
    let raw = mint_token(&server, "tok-admin", serde_json::json!({})).await;
    let agent = enroll_agent(&server, &raw, "host-a").await;

    // Allowed.
    let resp = server
        .post("/api/v1/jobs")
        .authorization_bearer("tok-limited")
        .json(&serde_json::json!({
            "agent_id": agent.id,
            "type": "run_script",
            "payload": {"script": "uptime"},
        }))
        .await;
    resp.assert_status_ok();

    // Capability present on the agent, permission missing on the operator.
    let resp = server
        .post("/api/v1/jobs")
        .authorization_bearer("tok-limited")
        .json(&serde_json::json!({"agent_id": agent.id, "type": "reboot"}))
        .await;
    resp.assert_status_forbidden();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "PERMISSION_MISSING");

    // Capability the agent does not have.
    let resp = server
        .post("/api/v1/jobs")
        .authorization_bearer("tok-admin")
        .json(&serde_json::json!({"agent_id": agent.id, "type": "wake_on_lan"}))
        .await;
    resp.assert_status_bad_request();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "CAPABILITY_MISSING");
}

#[tokio::test]
async fn minting_tokens_requires_the_enroll_permission() {
    let state = test_state(vec![operator("tok-limited", "org-1", &["scripts.run"])]);
    let server = test_server(state);

    let resp = server
        .post("/api/v1/enrollment-tokens")
        .authorization_bearer("tok-limited")
        .json(&serde_json::json!({}))
        .await;
    resp.assert_status_forbidden();
}
