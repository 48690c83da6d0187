// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope authentication: HMAC-SHA256 signatures, per-agent key
//! derivation, clock-skew bounds, and single-use nonce enforcement.
//!
//! Agent keys are derived, not stored: `key = hex(HMAC-SHA256(secret,
//! agent_id))`, and the hex string's ASCII bytes are the signing key.  The
//! backend can verify any agent's traffic from the global secret alone.
//!
//! The signing string is `agent_id|ts|nonce|type|payload` with the payload
//! serialized in canonical form (object keys in lexicographic order).  Both
//! sides serialize from the parsed value, so whitespace and key order on
//! the wire never affect the signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::cache::Cache;
use crate::error::AuthError;
use crate::model::Agent;
use crate::protocol::{Envelope, MessageKind};
use crate::store::Store;

type HmacSha256 = Hmac<Sha256>;

/// Minimum nonce length accepted on the wire.
const NONCE_MIN_LEN: usize = 16;
/// Hex length of an HMAC-SHA256 signature.
const SIGNATURE_HEX_LEN: usize = 64;

fn keyed_mac(key: &[u8]) -> Result<HmacSha256, AuthError> {
    HmacSha256::new_from_slice(key).map_err(|_| AuthError::SignatureInvalid)
}

/// Per-agent signing key: `hex(HMAC-SHA256(secret, agent_id))`.
pub fn derive_agent_key(secret: &str, agent_id: &str) -> Result<String, AuthError> {
    let mut mac = keyed_mac(secret.as_bytes())?;
    mac.update(agent_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Canonical payload serialization.  `serde_json::Value` objects order
/// their keys, so this is deterministic regardless of wire formatting.
pub fn canonical_payload(payload: &serde_json::Value) -> Result<String, AuthError> {
    serde_json::to_string(payload).map_err(|_| AuthError::Malformed)
}

fn signing_string(
    agent_id: &str,
    ts: i64,
    nonce: &str,
    kind: MessageKind,
    payload: &serde_json::Value,
) -> Result<String, AuthError> {
    let payload = canonical_payload(payload)?;
    Ok(format!("{agent_id}|{ts}|{nonce}|{}|{payload}", kind.as_str()))
}

/// Compute the hex signature for an envelope's fields.  Used by the
/// verifier and by test clients building signed traffic.
pub fn sign(
    agent_key: &str,
    agent_id: &str,
    ts: i64,
    nonce: &str,
    kind: MessageKind,
    payload: &serde_json::Value,
) -> Result<String, AuthError> {
    let message = signing_string(agent_id, ts, nonce, kind, payload)?;
    let mut mac = keyed_mac(agent_key.as_bytes())?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Stateless verifier configuration; the nonce ledger lives in the cache.
pub struct Authenticator {
    secret: String,
    window_sec: u64,
    nonce_ttl_sec: u64,
}

impl Authenticator {
    pub fn new(secret: String, window_sec: u64, nonce_ttl_sec: u64) -> Self {
        Self { secret, window_sec, nonce_ttl_sec }
    }

    pub fn agent_key(&self, agent_id: &str) -> Result<String, AuthError> {
        derive_agent_key(&self.secret, agent_id)
    }

    /// Full envelope verification.  Checks run cheapest-first: shape, clock
    /// skew, agent existence, signature, and only then nonce consumption —
    /// a forged envelope must not burn a nonce the legitimate sender still
    /// needs.  Returns the authenticated agent on success.
    pub async fn verify(
        &self,
        store: &Store,
        cache: &Cache,
        envelope: &Envelope,
        now: i64,
    ) -> Result<Agent, AuthError> {
        if envelope.nonce.len() < NONCE_MIN_LEN
            || envelope.hmac.len() != SIGNATURE_HEX_LEN
            || envelope.agent_id.is_empty()
        {
            return Err(AuthError::Malformed);
        }
        let provided = hex::decode(&envelope.hmac).map_err(|_| AuthError::Malformed)?;

        if now.abs_diff(envelope.ts) > self.window_sec {
            return Err(AuthError::ClockSkew);
        }

        let agent = store.get_agent(&envelope.agent_id).await.ok_or(AuthError::UnknownAgent)?;

        let key = self.agent_key(&envelope.agent_id)?;
        let message = signing_string(
            &envelope.agent_id,
            envelope.ts,
            &envelope.nonce,
            envelope.kind,
            &envelope.payload,
        )?;
        let mut mac = keyed_mac(key.as_bytes())?;
        mac.update(message.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&provided).map_err(|_| AuthError::SignatureInvalid)?;

        let fresh = cache
            .insert_nonce(&envelope.nonce, &envelope.agent_id, self.nonce_ttl_sec, now as u64)
            .await;
        if !fresh {
            return Err(AuthError::ReplayDetected);
        }

        Ok(agent)
    }
}
