// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System of record for agents, tokens, jobs, results, and the audit log.
//!
//! The store is in-memory behind a single `RwLock`; one write-lock scope is
//! a transaction.  Every transition that can race another writer (poll vs.
//! timeout sweep vs. result report vs. cancel) is a compare-and-set guarded
//! by the expected prior state, and a zero-row outcome means "someone else
//! already moved it" — callers treat that as information, not an error.
//! An external SQL collaborator can satisfy the same method contracts.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::{DispatchError, EnrollError};
use crate::model::{
    Agent, AuditEntry, EnrollmentToken, InventorySnapshot, Job, JobResultRecord, MetricsSample,
    PageMeta,
};
use crate::protocol::{AgentStatus, Capability, JobResultPayload, JobStatus, OsType};

/// Bounded per-agent metrics history.
const METRICS_HISTORY_CAP: usize = 500;

#[derive(Default)]
struct StoreInner {
    agents: HashMap<String, Agent>,
    tokens: HashMap<String, EnrollmentToken>,
    jobs: HashMap<String, Job>,
    job_results: HashMap<String, JobResultRecord>,
    metrics: HashMap<String, Vec<MetricsSample>>,
    inventory: HashMap<String, InventorySnapshot>,
    audit: Vec<AuditEntry>,
}

pub struct Store {
    inner: RwLock<StoreInner>,
}

/// Filters for the agent listing.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
    pub os: Option<OsType>,
    pub search: Option<String>,
}

/// Filters for the job listing.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub agent_id: Option<String>,
    pub status: Option<JobStatus>,
    pub created_by: Option<String>,
}

/// Row returned by the stale-agent sweep for each transitioned agent.
#[derive(Debug, Clone)]
pub struct StaleAgent {
    pub id: String,
    pub organization_id: String,
    pub prev_status: AgentStatus,
}

/// Row returned by the timeout sweep for each transitioned job.
#[derive(Debug, Clone)]
pub struct TimedOutJob {
    pub id: String,
    pub organization_id: String,
    pub agent_id: String,
}

/// Outcome of a heartbeat update.
#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    pub organization_id: String,
    pub prev_status: AgentStatus,
}

/// Outcome of a result report.  `applied` is false for an idempotent retry
/// that changed nothing.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub organization_id: String,
    pub job_type: &'static str,
    pub created_by: String,
    pub status: JobStatus,
    pub exit_code: Option<i64>,
    pub applied: bool,
}

impl Store {
    pub fn new() -> Self {
        Self { inner: RwLock::new(StoreInner::default()) }
    }

    // -- Enrollment tokens ----------------------------------------------------

    pub async fn insert_token(&self, token: EnrollmentToken) {
        let mut inner = self.inner.write().await;
        inner.tokens.insert(token.token_hash.clone(), token);
    }

    pub async fn find_token(&self, token_hash: &str) -> Option<EnrollmentToken> {
        let inner = self.inner.read().await;
        inner.tokens.get(token_hash).cloned()
    }

    /// All-or-nothing enrollment: re-validate the token, insert the agent,
    /// increment the token's usage counter, and append the audit record in
    /// one write-lock scope.  Nothing is visible on failure.
    pub async fn enroll_txn(
        &self,
        token_hash: &str,
        agent: Agent,
        now: i64,
    ) -> Result<(), EnrollError> {
        let mut inner = self.inner.write().await;

        let token = match inner.tokens.get(token_hash) {
            Some(t) if t.is_active => t,
            _ => return Err(EnrollError::TokenInvalid),
        };
        if token.expires_at.is_some_and(|exp| exp < now) {
            return Err(EnrollError::TokenExpired);
        }
        if token.max_uses.is_some_and(|max| token.current_uses >= max) {
            return Err(EnrollError::TokenExhausted);
        }

        let audit = AuditEntry {
            organization_id: agent.organization_id.clone(),
            actor: None,
            agent_id: Some(agent.id.clone()),
            action: "agent.enrolled",
            resource_type: "agent",
            resource_id: agent.id.clone(),
            details: serde_json::json!({
                "hostname": agent.hostname,
                "os": agent.os.as_str(),
                "version": agent.agent_version,
            }),
            recorded_at: now,
        };

        if let Some(t) = inner.tokens.get_mut(token_hash) {
            t.current_uses += 1;
        }
        inner.agents.insert(agent.id.clone(), agent);
        inner.audit.push(audit);
        Ok(())
    }

    // -- Agents ---------------------------------------------------------------

    pub async fn agent_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.agents.len()
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        let inner = self.inner.read().await;
        inner.agents.get(agent_id).cloned()
    }

    /// Tenant-scoped fetch: cross-organization lookups behave like a miss.
    pub async fn get_agent_scoped(&self, agent_id: &str, organization_id: &str) -> Option<Agent> {
        let inner = self.inner.read().await;
        inner
            .agents
            .get(agent_id)
            .filter(|a| a.organization_id == organization_id)
            .cloned()
    }

    pub async fn list_agents(
        &self,
        organization_id: &str,
        filter: &AgentFilter,
        page: usize,
        per_page: usize,
    ) -> (Vec<Agent>, PageMeta) {
        let inner = self.inner.read().await;
        let mut matched: Vec<Agent> = inner
            .agents
            .values()
            .filter(|a| a.organization_id == organization_id)
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| filter.os.is_none_or(|os| a.os == os))
            .filter(|a| {
                filter.search.as_deref().is_none_or(|needle| {
                    a.hostname.to_lowercase().contains(&needle.to_lowercase())
                })
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

        let total = matched.len();
        let page = page.max(1);
        let start = page.saturating_sub(1).saturating_mul(per_page);
        let items = matched.into_iter().skip(start).take(per_page).collect();
        (items, PageMeta::new(page, per_page, total))
    }

    /// Hard delete, tenant-scoped.  Capability set and cached data go with
    /// the row.
    pub async fn delete_agent(&self, agent_id: &str, organization_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let owned = inner
            .agents
            .get(agent_id)
            .is_some_and(|a| a.organization_id == organization_id);
        if owned {
            inner.agents.remove(agent_id);
            inner.metrics.remove(agent_id);
            inner.inventory.remove(agent_id);
        }
        owned
    }

    /// Heartbeat write: status, last-seen, and version update
    /// unconditionally; reported capabilities are enabled, never disabled.
    pub async fn heartbeat_update(
        &self,
        agent_id: &str,
        status: AgentStatus,
        agent_version: &str,
        capabilities: &[Capability],
        now: i64,
    ) -> Option<HeartbeatOutcome> {
        let mut inner = self.inner.write().await;
        let agent = inner.agents.get_mut(agent_id)?;
        let prev_status = agent.status;
        agent.status = status;
        agent.last_seen = now;
        agent.agent_version = agent_version.to_owned();
        for cap in capabilities {
            agent.capabilities.insert(*cap);
        }
        Some(HeartbeatOutcome { organization_id: agent.organization_id.clone(), prev_status })
    }

    /// Stale sweep: `status != offline AND last_seen < now - threshold`
    /// rows flip to offline.  Conditional, so overlapping sweeps each
    /// transition a given agent at most once between heartbeats.
    pub async fn mark_stale_offline(&self, threshold_sec: u64, now: i64) -> Vec<StaleAgent> {
        let cutoff = now - threshold_sec as i64;
        let mut inner = self.inner.write().await;
        let mut transitioned = Vec::new();
        for agent in inner.agents.values_mut() {
            if agent.status != AgentStatus::Offline && agent.last_seen < cutoff {
                transitioned.push(StaleAgent {
                    id: agent.id.clone(),
                    organization_id: agent.organization_id.clone(),
                    prev_status: agent.status,
                });
                agent.status = AgentStatus::Offline;
            }
        }
        transitioned
    }

    pub async fn update_agent_inventory(
        &self,
        agent_id: &str,
        os_version: &str,
        arch: &str,
        snapshot: InventorySnapshot,
    ) {
        let mut inner = self.inner.write().await;
        if let Some(agent) = inner.agents.get_mut(agent_id) {
            agent.os_version = os_version.to_owned();
            agent.arch = arch.to_owned();
        }
        inner.inventory.insert(agent_id.to_owned(), snapshot);
    }

    pub async fn latest_inventory(&self, agent_id: &str) -> Option<InventorySnapshot> {
        let inner = self.inner.read().await;
        inner.inventory.get(agent_id).cloned()
    }

    pub async fn record_metrics(&self, sample: MetricsSample) {
        let mut inner = self.inner.write().await;
        let history = inner.metrics.entry(sample.agent_id.clone()).or_default();
        history.push(sample);
        if history.len() > METRICS_HISTORY_CAP {
            let excess = history.len() - METRICS_HISTORY_CAP;
            history.drain(..excess);
        }
    }

    pub async fn metrics_history(&self, agent_id: &str, limit: usize) -> Vec<MetricsSample> {
        let inner = self.inner.read().await;
        inner
            .metrics
            .get(agent_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    // -- Jobs -----------------------------------------------------------------

    pub async fn insert_job(&self, job: Job) {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id.clone(), job);
    }

    pub async fn get_job(
        &self,
        job_id: &str,
        organization_id: &str,
    ) -> Option<(Job, Option<JobResultRecord>)> {
        let inner = self.inner.read().await;
        let job = inner
            .jobs
            .get(job_id)
            .filter(|j| j.organization_id == organization_id)
            .cloned()?;
        let result = inner.job_results.get(job_id).cloned();
        Some((job, result))
    }

    pub async fn list_jobs(
        &self,
        organization_id: &str,
        filter: &JobFilter,
        page: usize,
        per_page: usize,
    ) -> (Vec<Job>, PageMeta) {
        let inner = self.inner.read().await;
        let mut matched: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.organization_id == organization_id)
            .filter(|j| filter.agent_id.as_deref().is_none_or(|a| j.agent_id == a))
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .filter(|j| filter.created_by.as_deref().is_none_or(|c| j.created_by == c))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len();
        let page = page.max(1);
        let start = page.saturating_sub(1).saturating_mul(per_page);
        let items = matched.into_iter().skip(start).take(per_page).collect();
        (items, PageMeta::new(page, per_page, total))
    }

    /// Compare-and-set status advance with no timestamp side effects.
    /// Returns false when the job's status was not `expected` (someone else
    /// already moved it).
    pub async fn advance_job(
        &self,
        job_id: &str,
        expected: JobStatus,
        next: JobStatus,
    ) -> bool {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(job_id) {
            Some(job) if job.status == expected => {
                job.status = next;
                true
            }
            _ => false,
        }
    }

    /// CAS `queued -> running`, recording the execution start time.
    pub async fn mark_job_running(&self, job_id: &str, started_at: i64) -> bool {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running;
                job.started_at = Some(started_at);
                true
            }
            _ => false,
        }
    }

    /// CAS `{pending, queued} -> cancelled`.  Returns false (refusal) once
    /// the job has left those states.
    pub async fn cancel_job(&self, job_id: &str, organization_id: &str, now: i64) -> bool {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(job_id) {
            Some(job)
                if job.organization_id == organization_id
                    && matches!(job.status, JobStatus::Pending | JobStatus::Queued) =>
            {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Ingest a terminal result report in one transaction: ownership check,
    /// result upsert, job status + timestamps, and the audit record.  A
    /// crash can never leave a stored result beside a still-running job.
    ///
    /// Retrying an already-applied report acks idempotently
    /// (`applied: false`); a report for a job that timeout or cancel
    /// closed without a result is rejected and never resurrects the job.
    pub async fn complete_job(
        &self,
        agent_id: &str,
        result: &JobResultPayload,
        now: i64,
    ) -> Result<CompletionOutcome, DispatchError> {
        let mut inner = self.inner.write().await;

        let (job_type, organization_id, created_by, status) = {
            let job = inner
                .jobs
                .get(&result.job_id)
                .filter(|j| j.agent_id == agent_id)
                .ok_or(DispatchError::JobNotOwned)?;
            (job.job_type, job.organization_id.clone(), job.created_by.clone(), job.status)
        };

        if status.is_terminal() {
            if inner.job_results.contains_key(&result.job_id) {
                return Ok(CompletionOutcome {
                    organization_id,
                    job_type: job_type.as_str(),
                    created_by,
                    status,
                    exit_code: result.exit_code,
                    applied: false,
                });
            }
            // Closed by the timeout sweep or a cancel; a late result must
            // not reopen it.
            return Err(DispatchError::JobClosed);
        }
        if status == JobStatus::AgentOffline {
            return Err(DispatchError::JobClosed);
        }

        let completed_at = result.completed_at.unwrap_or(now);
        inner.job_results.insert(
            result.job_id.clone(),
            JobResultRecord {
                job_id: result.job_id.clone(),
                status: result.status,
                stdout: result.stdout.clone(),
                stderr: result.stderr.clone(),
                exit_code: result.exit_code,
                error_message: result.error_message.clone(),
                artifacts: result.artifacts.clone(),
                result_data: result.result_data.clone(),
                started_at: result.started_at,
                completed_at,
            },
        );

        if let Some(job) = inner.jobs.get_mut(&result.job_id) {
            job.status = result.status;
            job.started_at = Some(result.started_at);
            job.completed_at = Some(completed_at);
        }

        let action =
            if result.status == JobStatus::Success { "job.completed" } else { "job.failed" };
        inner.audit.push(AuditEntry {
            organization_id: organization_id.clone(),
            actor: Some(created_by.clone()),
            agent_id: Some(agent_id.to_owned()),
            action,
            resource_type: "job",
            resource_id: result.job_id.clone(),
            details: serde_json::json!({
                "type": job_type.as_str(),
                "status": result.status.as_str(),
                "exit_code": result.exit_code,
                "error": result.error_message,
            }),
            recorded_at: now,
        });

        Ok(CompletionOutcome {
            organization_id,
            job_type: job_type.as_str(),
            created_by,
            status: result.status,
            exit_code: result.exit_code,
            applied: true,
        })
    }

    /// Timeout sweep: CAS bulk `running AND started_at + timeout < now ->
    /// timeout`.  Safe under overlapping runs — the status guard makes a
    /// second sweep's pass affect zero rows.
    pub async fn sweep_job_timeouts(&self, now: i64) -> Vec<TimedOutJob> {
        let mut inner = self.inner.write().await;
        let mut transitioned = Vec::new();
        for job in inner.jobs.values_mut() {
            let Some(started_at) = job.started_at else { continue };
            let deadline = started_at.saturating_add(job.timeout_sec as i64);
            if job.status == JobStatus::Running && deadline < now {
                job.status = JobStatus::Timeout;
                job.completed_at = Some(now);
                transitioned.push(TimedOutJob {
                    id: job.id.clone(),
                    organization_id: job.organization_id.clone(),
                    agent_id: job.agent_id.clone(),
                });
            }
        }
        transitioned
    }

    // -- Audit ----------------------------------------------------------------

    pub async fn record_audit(&self, entry: AuditEntry) {
        let mut inner = self.inner.write().await;
        inner.audit.push(entry);
    }

    pub async fn audit_entries(&self, organization_id: &str) -> Vec<AuditEntry> {
        let inner = self.inner.read().await;
        inner
            .audit
            .iter()
            .filter(|e| e.organization_id == organization_id)
            .cloned()
            .collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
