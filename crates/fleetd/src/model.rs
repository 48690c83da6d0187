// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted entities owned by the store.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::protocol::{
    AgentPolicy, AgentStatus, Capability, JobArtifact, JobPriority, JobStatus, JobType, OsType,
};

/// A managed machine's enrolled agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub organization_id: String,
    pub hostname: String,
    pub os: OsType,
    pub os_version: String,
    pub arch: String,
    pub agent_version: String,
    #[serde(default)]
    pub mac_addresses: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: AgentStatus,
    /// Unix epoch seconds of the last accepted heartbeat.
    pub last_seen: i64,
    pub enrolled_at: i64,
    pub policy: AgentPolicy,
    pub capabilities: HashSet<Capability>,
}

impl Agent {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// Enrollment token record.  Only the SHA-256 hash of the raw token is
/// stored; the raw value is shown once at mint time.
#[derive(Debug, Clone)]
pub struct EnrollmentToken {
    pub id: String,
    pub token_hash: String,
    pub organization_id: String,
    pub max_uses: Option<u32>,
    pub current_uses: u32,
    pub expires_at: Option<i64>,
    pub is_active: bool,
    pub tags: Vec<String>,
    pub policy: Option<AgentPolicy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub organization_id: String,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub payload: serde_json::Value,
    pub timeout_sec: u64,
    pub created_by: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// One-to-one with a terminal job.  Written once by the agent's result
/// report, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResultRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i64>,
    pub error_message: Option<String>,
    pub artifacts: Vec<JobArtifact>,
    pub result_data: Option<serde_json::Value>,
    pub started_at: i64,
    pub completed_at: i64,
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub organization_id: String,
    pub actor: Option<String>,
    pub agent_id: Option<String>,
    pub action: &'static str,
    pub resource_type: &'static str,
    pub resource_id: String,
    pub details: serde_json::Value,
    pub recorded_at: i64,
}

/// One stored metrics sample (the store keeps a bounded history per agent).
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSample {
    pub agent_id: String,
    pub timestamp: i64,
    pub cpu_usage: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub processes_count: u32,
}

/// Latest inventory snapshot for an agent.
#[derive(Debug, Clone, Serialize)]
pub struct InventorySnapshot {
    pub agent_id: String,
    pub timestamp: i64,
    pub raw: serde_json::Value,
}

/// Pagination metadata for listing endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PageMeta {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl PageMeta {
    pub fn new(page: usize, per_page: usize, total: usize) -> Self {
        let total_pages = total.div_ceil(per_page.max(1));
        Self { page, per_page, total, total_pages }
    }
}
