// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry: token minting and the enrollment exchange.
//!
//! Enrollment is the only unauthenticated write path, so it is strict: the
//! raw token is hashed and matched against stored hashes, validity is
//! re-checked inside the store transaction that creates the agent, and the
//! response is the one place the agent's derived signing secret ever
//! appears on the wire.

use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::EnrollError;
use crate::model::{Agent, AuditEntry, EnrollmentToken};
use crate::protocol::{
    AgentPolicy, AgentStatus, EnrollRequest, EnrollResponse, DEFAULT_CAPABILITIES,
};
use crate::state::AppState;

/// Enrollment failure: a token-level rejection surfaced to the agent, or
/// an internal fault surfaced as a 500.
#[derive(Debug)]
pub enum EnrollRejection {
    Token(EnrollError),
    Internal(anyhow::Error),
}

impl From<EnrollError> for EnrollRejection {
    fn from(err: EnrollError) -> Self {
        Self::Token(err)
    }
}

/// SHA-256 hex of a raw enrollment token.  Only this form is ever stored.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Mint a new enrollment token for an organization.  Returns the raw token
/// (shown once) alongside the stored record.
pub async fn mint_token(
    state: &AppState,
    organization_id: &str,
    minted_by: &str,
    max_uses: Option<u32>,
    expires_at: Option<i64>,
    tags: Vec<String>,
    policy: Option<AgentPolicy>,
) -> (String, EnrollmentToken) {
    let raw = format!("fet_{}", Uuid::new_v4().simple());
    let token = EnrollmentToken {
        id: Uuid::new_v4().to_string(),
        token_hash: hash_token(&raw),
        organization_id: organization_id.to_owned(),
        max_uses,
        current_uses: 0,
        expires_at,
        is_active: true,
        tags,
        policy,
    };
    let now = state.now();
    state.store.insert_token(token.clone()).await;
    state
        .store
        .record_audit(AuditEntry {
            organization_id: organization_id.to_owned(),
            actor: Some(minted_by.to_owned()),
            agent_id: None,
            action: "enrollment_token.created",
            resource_type: "enrollment_token",
            resource_id: token.id.clone(),
            details: serde_json::json!({"max_uses": max_uses, "expires_at": expires_at}),
            recorded_at: now,
        })
        .await;
    info!(organization_id, token_id = %token.id, "minted enrollment token");
    (raw, token)
}

/// Exchange an enrollment token for an agent identity.
///
/// The token is pre-checked outside the transaction for a precise error
/// code, then re-validated inside `enroll_txn` so two racing enrollments
/// cannot both consume the last use of a bounded token.
pub async fn enroll(
    state: &AppState,
    req: EnrollRequest,
) -> Result<EnrollResponse, EnrollRejection> {
    let now = state.now();
    let token_hash = hash_token(&req.enrollment_token);
    let token = state
        .store
        .find_token(&token_hash)
        .await
        .filter(|t| t.is_active)
        .ok_or(EnrollError::TokenInvalid)?;
    if token.expires_at.is_some_and(|exp| exp < now) {
        return Err(EnrollError::TokenExpired.into());
    }
    if token.max_uses.is_some_and(|max| token.current_uses >= max) {
        return Err(EnrollError::TokenExhausted.into());
    }

    let agent_id = Uuid::new_v4().to_string();
    let policy = token.policy.clone().unwrap_or_default();
    let agent = Agent {
        id: agent_id.clone(),
        organization_id: token.organization_id.clone(),
        hostname: req.hostname,
        os: req.os,
        os_version: req.os_version,
        arch: req.arch,
        agent_version: req.agent_version,
        mac_addresses: req.mac_addresses,
        tags: token.tags.clone(),
        status: AgentStatus::Online,
        last_seen: now,
        enrolled_at: now,
        policy: policy.clone(),
        capabilities: DEFAULT_CAPABILITIES.iter().copied().collect(),
    };
    state.store.enroll_txn(&token_hash, agent, now).await.map_err(EnrollRejection::Token)?;

    let agent_secret = state
        .auth
        .agent_key(&agent_id)
        .map_err(|e| EnrollRejection::Internal(anyhow::anyhow!("key derivation: {e}")))?;

    info!(agent_id, organization_id = %token.organization_id, "agent enrolled");
    Ok(EnrollResponse {
        agent_id,
        agent_secret,
        policy,
        heartbeat_interval_sec: state.config.heartbeat_interval_sec,
        capabilities: DEFAULT_CAPABILITIES.to_vec(),
    })
}
