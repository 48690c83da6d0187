// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fast TTL-capable shared cache: nonce records, per-agent delivery queues,
//! and short-lived presence/metrics entries.
//!
//! Everything here is allowed to be lost across a crash.  A lost nonce only
//! narrows the replay window; a lost queue entry only delays delivery (job
//! state is recovered from the store).  All operations take the current
//! time as a parameter so sweeps and tests control the clock.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

use crate::protocol::QueueEntry;

#[derive(Debug, Clone)]
struct NonceRecord {
    #[allow(dead_code)]
    agent_id: String,
    expires_at: u64,
}

#[derive(Debug, Clone)]
struct PresenceEntry {
    status: String,
    last_seen: i64,
    expires_at: u64,
}

#[derive(Default)]
struct CacheInner {
    nonces: HashMap<String, NonceRecord>,
    queues: HashMap<String, VecDeque<QueueEntry>>,
    presence: HashMap<String, PresenceEntry>,
    latest_metrics: HashMap<String, (serde_json::Value, u64)>,
}

pub struct Cache {
    inner: Mutex<CacheInner>,
}

impl Cache {
    pub fn new() -> Self {
        Self { inner: Mutex::new(CacheInner::default()) }
    }

    /// Atomic insert-if-absent for a nonce.  Returns `false` when the nonce
    /// is already held and unexpired (replay).  The check and the insert
    /// happen under one lock acquisition — a read-then-write version would
    /// reopen the replay race between near-simultaneous deliveries.
    pub async fn insert_nonce(
        &self,
        nonce: &str,
        agent_id: &str,
        ttl_sec: u64,
        now: u64,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.nonces.get(nonce) {
            if existing.expires_at > now {
                return false;
            }
        }
        inner.nonces.insert(
            nonce.to_owned(),
            NonceRecord { agent_id: agent_id.to_owned(), expires_at: now + ttl_sec },
        );
        true
    }

    /// Push a queue entry onto an agent's delivery queue (FIFO tail).
    pub async fn push_job(&self, agent_id: &str, entry: QueueEntry) {
        let mut inner = self.inner.lock().await;
        inner.queues.entry(agent_id.to_owned()).or_default().push_back(entry);
    }

    /// Pop at most one entry from an agent's delivery queue (FIFO head).
    /// Each entry is handed out exactly once.
    pub async fn pop_job(&self, agent_id: &str) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().await;
        inner.queues.get_mut(agent_id).and_then(VecDeque::pop_front)
    }

    /// Drop all queued entries for an agent (used on hard delete).
    pub async fn clear_queue(&self, agent_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.queues.remove(agent_id);
    }

    pub async fn set_presence(
        &self,
        agent_id: &str,
        status: &str,
        last_seen: i64,
        ttl_sec: u64,
        now: u64,
    ) {
        let mut inner = self.inner.lock().await;
        inner.presence.insert(
            agent_id.to_owned(),
            PresenceEntry {
                status: status.to_owned(),
                last_seen,
                expires_at: now + ttl_sec,
            },
        );
    }

    /// Cached `(status, last_seen)` if the entry is still fresh.
    pub async fn presence(&self, agent_id: &str, now: u64) -> Option<(String, i64)> {
        let inner = self.inner.lock().await;
        inner
            .presence
            .get(agent_id)
            .filter(|e| e.expires_at > now)
            .map(|e| (e.status.clone(), e.last_seen))
    }

    pub async fn set_latest_metrics(
        &self,
        agent_id: &str,
        metrics: serde_json::Value,
        ttl_sec: u64,
        now: u64,
    ) {
        let mut inner = self.inner.lock().await;
        inner.latest_metrics.insert(agent_id.to_owned(), (metrics, now + ttl_sec));
    }

    pub async fn latest_metrics(&self, agent_id: &str, now: u64) -> Option<serde_json::Value> {
        let inner = self.inner.lock().await;
        inner
            .latest_metrics
            .get(agent_id)
            .filter(|(_, expires)| *expires > now)
            .map(|(v, _)| v.clone())
    }

    /// Drop expired nonces and presence entries.  Called from the stale
    /// sweep tick; correctness never depends on it (reads check expiry).
    pub async fn purge_expired(&self, now: u64) {
        let mut inner = self.inner.lock().await;
        inner.nonces.retain(|_, r| r.expires_at > now);
        inner.presence.retain(|_, e| e.expires_at > now);
        inner.latest_metrics.retain(|_, (_, expires)| *expires > now);
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
