// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request authentication helpers for the transport layer: operator bearer
//! tokens on the admin API and signed envelopes on the agent API.

use axum::http::HeaderMap;

use crate::error::{ApiError, AuthError};
use crate::model::Agent;
use crate::protocol::{Envelope, MessageKind};
use crate::state::{AppState, Operator};

/// Resolve the operator behind a `Bearer` token, or fail with 401.
pub fn resolve_operator<'a>(
    state: &'a AppState,
    headers: &HeaderMap,
) -> Result<&'a Operator, ApiError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    state.operators.resolve(token).ok_or(ApiError::Unauthorized)
}

/// Resolve an operator from a WebSocket query string (`?token=...`).
pub fn resolve_ws_operator<'a>(
    state: &'a AppState,
    token: Option<&str>,
) -> Result<&'a Operator, ApiError> {
    let token = token.ok_or(ApiError::Unauthorized)?;
    state.operators.resolve(token).ok_or(ApiError::Unauthorized)
}

/// Authenticate an envelope arriving at an endpoint bound to one message
/// kind.  A kind mismatch is a shape failure, not a signature failure.
pub async fn verify_envelope(
    state: &AppState,
    envelope: &Envelope,
    expected: MessageKind,
) -> Result<Agent, AuthError> {
    if envelope.kind != expected {
        return Err(AuthError::Malformed);
    }
    state.auth.verify(&state.store, &state.cache, envelope, state.now()).await
}
