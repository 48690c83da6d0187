// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared process state: the store, the cache, the fanout hub, the envelope
//! authenticator, and the operator credential directory.  Built once in
//! `main` and handed to every handler and background task as an `Arc`.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::authn::Authenticator;
use crate::cache::Cache;
use crate::config::FleetConfig;
use crate::events::Fanout;
use crate::store::Store;

/// One operator credential from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Operator {
    pub token: String,
    pub organization_id: String,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Operator {
    /// `"*"` grants everything.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == "*" || p == permission)
    }
}

#[derive(Debug, Deserialize)]
struct OperatorsFile {
    operators: Vec<Operator>,
}

/// Bearer-token directory for the admin API and realtime socket.  Tokens
/// are matched by SHA-256 digest, not byte equality on the raw values.
pub struct OperatorDirectory {
    entries: Vec<([u8; 32], Operator)>,
}

impl OperatorDirectory {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading operators config {}", path.display()))?;
        let file: OperatorsFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing operators config {}", path.display()))?;
        Ok(Self::from_operators(file.operators))
    }

    pub fn from_operators(operators: Vec<Operator>) -> Self {
        let entries = operators
            .into_iter()
            .map(|op| (Sha256::digest(op.token.as_bytes()).into(), op))
            .collect();
        Self { entries }
    }

    pub fn resolve(&self, bearer: &str) -> Option<&Operator> {
        let digest: [u8; 32] = Sha256::digest(bearer.as_bytes()).into();
        self.entries.iter().find(|(d, _)| *d == digest).map(|(_, op)| op)
    }
}

pub struct AppState {
    pub config: FleetConfig,
    pub store: Store,
    pub cache: Cache,
    pub fanout: Fanout,
    pub auth: Authenticator,
    pub operators: OperatorDirectory,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: FleetConfig) -> anyhow::Result<Arc<Self>> {
        let operators = match &config.operators_config {
            Some(path) => OperatorDirectory::load(path)?,
            None => OperatorDirectory::empty(),
        };
        Ok(Self::with_operators(config, operators))
    }

    pub fn with_operators(config: FleetConfig, operators: OperatorDirectory) -> Arc<Self> {
        let auth = Authenticator::new(
            config.agent_hmac_secret.clone(),
            config.nonce_window_sec,
            config.nonce_ttl_sec(),
        );
        Arc::new(Self {
            config,
            store: Store::new(),
            cache: Cache::new(),
            fanout: Fanout::new(),
            auth,
            operators,
            shutdown: CancellationToken::new(),
        })
    }

    /// Current Unix time in seconds.  The single clock read point for
    /// handlers; store and cache methods take time as a parameter.
    pub fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}
