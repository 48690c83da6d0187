// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime WebSocket for operator dashboards.
//!
//! The credential is resolved once at upgrade; every delivered event is
//! filtered by the operator's organization, and `agent.metrics` events
//! additionally require an explicit `agent:{id}` subscription taken out by
//! the client.  A closed socket ends only that connection's forward loop.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::events::InputFrame;
use crate::state::{AppState, Operator};
use crate::transport::auth;

/// Query parameters for the realtime upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeQuery {
    pub token: Option<String>,
}

/// `GET /realtime` — WebSocket upgrade for realtime fleet events.
pub async fn realtime_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RealtimeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let operator = match auth::resolve_ws_operator(&state, query.token.as_deref()) {
        Ok(op) => op.clone(),
        Err(_) => {
            return axum::http::Response::builder()
                .status(401)
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_realtime(socket, state, operator)).into_response()
}

fn frame(event: &str, data: serde_json::Value, timestamp: i64) -> String {
    serde_json::to_string(&serde_json::json!({
        "event": event,
        "data": data,
        "timestamp": timestamp,
    }))
    .unwrap_or_default()
}

/// Per-connection forward loop.
async fn handle_realtime(socket: WebSocket, state: Arc<AppState>, operator: Operator) {
    let mut rx = state.fanout.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subscriptions: HashSet<String> = HashSet::new();

    let hello = frame(
        "connected",
        serde_json::json!({"operator": operator.name}),
        state.now(),
    );
    if ws_tx.send(Message::Text(hello.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            evt = rx.recv() => {
                match evt {
                    Ok(event) => {
                        if event.organization_id() != operator.organization_id {
                            continue;
                        }
                        if let Some(key) = event.subscription_key() {
                            if !subscriptions.contains(&key) {
                                continue;
                            }
                        }
                        let Ok(data) = serde_json::to_value(&event) else { continue };
                        let text = frame(event.event_name(), data, state.now());
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(lagged = n, operator = %operator.name, "realtime client lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state, &operator, &mut subscriptions, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// Handle one inbound client frame: subscription management or remote
/// shell input.  Unknown actions are ignored.
fn handle_client_frame(
    state: &AppState,
    operator: &Operator,
    subscriptions: &mut HashSet<String>,
    text: &str,
) {
    let Ok(msg) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    let action = msg.get("action").and_then(|v| v.as_str()).unwrap_or_default();

    match action {
        "subscribe" => {
            if let Some(channel) = msg.get("channel").and_then(|v| v.as_str()) {
                subscriptions.insert(channel.to_owned());
            }
        }
        "unsubscribe" => {
            if let Some(channel) = msg.get("channel").and_then(|v| v.as_str()) {
                subscriptions.remove(channel);
            }
        }
        "remote_shell_input" => {
            let (Some(session_id), Some(data)) = (
                msg.get("session_id").and_then(|v| v.as_str()),
                msg.get("data").and_then(|v| v.as_str()),
            ) else {
                return;
            };
            state.fanout.forward_input(InputFrame {
                session_id: session_id.to_owned(),
                data: data.to_owned(),
                operator: operator.name.clone(),
            });
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;

    fn test_state() -> Arc<AppState> {
        AppState::new(FleetConfig {
            host: "127.0.0.1".into(),
            port: 0,
            agent_hmac_secret: "test-secret".into(),
            operators_config: None,
            nonce_window_sec: 300,
            heartbeat_interval_sec: 30,
            offline_threshold_sec: 90,
            stale_sweep_ms: 30000,
            timeout_sweep_ms: 15000,
            default_job_timeout_sec: 300,
            presence_ttl_sec: 120,
        })
        .unwrap()
    }

    fn operator() -> Operator {
        Operator {
            token: "tok".into(),
            organization_id: "org-1".into(),
            name: "op".into(),
            permissions: vec!["*".into()],
        }
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_manage_the_set() {
        let state = test_state();
        let op = operator();
        let mut subs = HashSet::new();

        handle_client_frame(
            &state,
            &op,
            &mut subs,
            r#"{"action":"subscribe","channel":"agent:a-1"}"#,
        );
        assert!(subs.contains("agent:a-1"));

        handle_client_frame(
            &state,
            &op,
            &mut subs,
            r#"{"action":"unsubscribe","channel":"agent:a-1"}"#,
        );
        assert!(subs.is_empty());

        // Garbage frames are ignored.
        handle_client_frame(&state, &op, &mut subs, "not json");
        handle_client_frame(&state, &op, &mut subs, r#"{"action":"launch_missiles"}"#);
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn remote_shell_input_is_forwarded_with_operator_identity() {
        let state = test_state();
        let op = operator();
        let mut subs = HashSet::new();
        let mut rx = state.fanout.subscribe_input();

        handle_client_frame(
            &state,
            &op,
            &mut subs,
            r#"{"action":"remote_shell_input","session_id":"s-1","data":"ls\n"}"#,
        );
        let input = rx.try_recv().unwrap();
        assert_eq!(input.session_id, "s-1");
        assert_eq!(input.data, "ls\n");
        assert_eq!(input.operator, "op");
    }

    #[test]
    fn frames_carry_event_data_and_timestamp() {
        let text = frame("agent.status_changed", serde_json::json!({"agent_id": "a-1"}), 1700);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "agent.status_changed");
        assert_eq!(value["data"]["agent_id"], "a-1");
        assert_eq!(value["timestamp"], 1700);
    }
}
