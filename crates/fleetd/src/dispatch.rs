// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job dispatch engine: creation with capability/permission gates, pull
//! delivery to polling agents, result ingestion, cancellation, and the
//! timeout sweep.
//!
//! The status machine is `pending -> queued -> running -> terminal`, with
//! `agent_offline` as an initial parking state for jobs that cannot be
//! delivered.  Every transition is a store-side compare-and-set, so each
//! job emits each transition event at most once no matter how poll, cancel,
//! result, and sweep interleave.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::DispatchError;
use crate::events::FleetEvent;
use crate::model::{AuditEntry, Job};
use crate::protocol::{
    AgentStatus, JobPriority, JobResultPayload, JobStatus, JobType, QueueEntry,
};
use crate::state::{AppState, Operator};
use uuid::Uuid;

/// Parameters for a new job, as supplied by the admin API.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub agent_id: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub timeout_sec: Option<u64>,
}

fn publish_status(state: &AppState, job: &Job, status: JobStatus, exit_code: Option<i64>) {
    state.fanout.publish(FleetEvent::JobStatusChanged {
        organization_id: job.organization_id.clone(),
        job_id: job.id.clone(),
        agent_id: job.agent_id.clone(),
        status: status.as_str().to_owned(),
        exit_code,
    });
}

/// Create a job targeting one agent.
///
/// Gates run in order: agent existence (tenant-scoped), agent capability,
/// agent policy allowlist, operator permission.  A job for an offline
/// agent parks as `agent_offline` instead of entering the queue, except
/// for job kinds that are deliverable offline.
pub async fn create_job(
    state: &AppState,
    operator: &Operator,
    spec: JobSpec,
) -> Result<Job, DispatchError> {
    let agent = state
        .store
        .get_agent_scoped(&spec.agent_id, &operator.organization_id)
        .await
        .ok_or(DispatchError::AgentNotFound)?;

    if !agent.has_capability(spec.job_type.required_capability())
        || !agent.policy.allowed_job_types.contains(&spec.job_type)
    {
        return Err(DispatchError::CapabilityMissing);
    }
    if !operator.has_permission(spec.job_type.required_permission()) {
        return Err(DispatchError::PermissionMissing);
    }

    let now = state.now();
    let deliverable =
        agent.status != AgentStatus::Offline || spec.job_type.deliverable_offline();
    let status = if deliverable { JobStatus::Pending } else { JobStatus::AgentOffline };

    let job = Job {
        id: Uuid::new_v4().to_string(),
        organization_id: agent.organization_id.clone(),
        agent_id: agent.id.clone(),
        job_type: spec.job_type,
        status,
        priority: spec.priority,
        payload: spec.payload.clone(),
        timeout_sec: spec.timeout_sec.unwrap_or(state.config.default_job_timeout_sec),
        created_by: operator.name.clone(),
        created_at: now,
        started_at: None,
        completed_at: None,
    };
    state.store.insert_job(job.clone()).await;

    if deliverable {
        state
            .cache
            .push_job(
                &agent.id,
                QueueEntry {
                    job_id: job.id.clone(),
                    job_type: job.job_type,
                    timeout_sec: job.timeout_sec,
                    priority: job.priority,
                    payload: job.payload.clone(),
                    created_by: job.created_by.clone(),
                    organization_id: job.organization_id.clone(),
                },
            )
            .await;
    }

    state
        .store
        .record_audit(AuditEntry {
            organization_id: job.organization_id.clone(),
            actor: Some(operator.name.clone()),
            agent_id: Some(agent.id.clone()),
            action: "job.created",
            resource_type: "job",
            resource_id: job.id.clone(),
            details: serde_json::json!({
                "type": job.job_type.as_str(),
                "status": job.status.as_str(),
            }),
            recorded_at: now,
        })
        .await;
    state.fanout.publish(FleetEvent::JobCreated {
        organization_id: job.organization_id.clone(),
        job_id: job.id.clone(),
        agent_id: job.agent_id.clone(),
        job_type: job.job_type.as_str().to_owned(),
    });
    info!(job_id = %job.id, agent_id = %job.agent_id, kind = job.job_type.as_str(), "job created");
    Ok(job)
}

/// Deliver at most one queued job to a polling agent.
///
/// Pops the delivery queue and advances `pending -> queued`; an entry
/// whose CAS fails was cancelled while still in the queue, so it is
/// dropped and the next entry considered.  Queue pop plus conditional
/// advance makes delivery exactly-once.
pub async fn poll(state: &AppState, agent_id: &str) -> Option<QueueEntry> {
    while let Some(entry) = state.cache.pop_job(agent_id).await {
        if state.store.advance_job(&entry.job_id, JobStatus::Pending, JobStatus::Queued).await {
            state.fanout.publish(FleetEvent::JobStatusChanged {
                organization_id: entry.organization_id.clone(),
                job_id: entry.job_id.clone(),
                agent_id: agent_id.to_owned(),
                status: JobStatus::Queued.as_str().to_owned(),
                exit_code: None,
            });
            return Some(entry);
        }
        // Left `pending` while queued (cancel won the race); skip it.
    }
    None
}

/// Ingest a job result report from an authenticated agent.
///
/// A `running` status is a progress report marking execution start; any
/// terminal status closes the job through the store transaction.  Retries
/// of an already-applied terminal report ack without re-emitting events.
pub async fn report_result(
    state: &AppState,
    agent_id: &str,
    organization_id: &str,
    result: &JobResultPayload,
) -> Result<(), DispatchError> {
    let now = state.now();

    if result.status == JobStatus::Running {
        let (job, _) = state
            .store
            .get_job(&result.job_id, organization_id)
            .await
            .filter(|(j, _)| j.agent_id == agent_id)
            .ok_or(DispatchError::JobNotOwned)?;
        return match job.status {
            JobStatus::Queued => {
                if state.store.mark_job_running(&result.job_id, result.started_at).await {
                    publish_status(state, &job, JobStatus::Running, None);
                }
                Ok(())
            }
            // Duplicate progress report.
            JobStatus::Running => Ok(()),
            _ => Err(DispatchError::JobClosed),
        };
    }

    if !result.status.is_terminal() {
        return Err(DispatchError::JobClosed);
    }

    let outcome = state.store.complete_job(agent_id, result, now).await?;
    if outcome.applied {
        state.fanout.publish(FleetEvent::JobStatusChanged {
            organization_id: outcome.organization_id,
            job_id: result.job_id.clone(),
            agent_id: agent_id.to_owned(),
            status: outcome.status.as_str().to_owned(),
            exit_code: outcome.exit_code,
        });
        info!(
            job_id = %result.job_id,
            agent_id,
            status = outcome.status.as_str(),
            "job completed"
        );
    }
    Ok(())
}

/// Cancel a job that has not started executing.  Refused with
/// `CancelRejected` once the job left `pending`/`queued`.
pub async fn cancel(state: &AppState, job: &Job, actor: &str) -> Result<(), DispatchError> {
    let now = state.now();
    if !state.store.cancel_job(&job.id, &job.organization_id, now).await {
        return Err(DispatchError::CancelRejected);
    }
    state
        .store
        .record_audit(AuditEntry {
            organization_id: job.organization_id.clone(),
            actor: Some(actor.to_owned()),
            agent_id: Some(job.agent_id.clone()),
            action: "job.cancelled",
            resource_type: "job",
            resource_id: job.id.clone(),
            details: serde_json::json!({"type": job.job_type.as_str()}),
            recorded_at: now,
        })
        .await;
    publish_status(state, job, JobStatus::Cancelled, None);
    info!(job_id = %job.id, actor, "job cancelled");
    Ok(())
}

/// One timeout-sweep pass over running jobs.
pub async fn sweep_timeouts(state: &AppState) {
    let now = state.now();
    for timed_out in state.store.sweep_job_timeouts(now).await {
        warn!(job_id = %timed_out.id, agent_id = %timed_out.agent_id, "job timed out");
        state
            .store
            .record_audit(AuditEntry {
                organization_id: timed_out.organization_id.clone(),
                actor: None,
                agent_id: Some(timed_out.agent_id.clone()),
                action: "job.timeout",
                resource_type: "job",
                resource_id: timed_out.id.clone(),
                details: serde_json::json!({}),
                recorded_at: now,
            })
            .await;
        state.fanout.publish(FleetEvent::JobStatusChanged {
            organization_id: timed_out.organization_id,
            job_id: timed_out.id,
            agent_id: timed_out.agent_id,
            status: JobStatus::Timeout.as_str().to_owned(),
            exit_code: None,
        });
    }
}

/// Spawn the periodic job-timeout sweep.
pub fn spawn_timeout_sweeper(state: Arc<AppState>) {
    let interval = state.config.timeout_sweep_interval();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            sweep_timeouts(&state).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::model::{Agent, EnrollmentToken};
    use crate::protocol::{AgentPolicy, Capability, OsType};
    use std::collections::HashSet;

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

    fn operator(perms: &[&str]) -> Operator {
        Operator {
            token: "tok".into(),
            organization_id: "org-1".into(),
            name: "op".into(),
            permissions: perms.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    async fn seed_agent(state: &AppState, id: &str, status: AgentStatus) {
        state
            .store
            .insert_token(EnrollmentToken {
                id: format!("tok-{id}"),
                token_hash: format!("hash-{id}"),
                organization_id: "org-1".into(),
                max_uses: None,
                current_uses: 0,
                expires_at: None,
                is_active: true,
                tags: vec![],
                policy: None,
            })
            .await;
        state
            .store
            .enroll_txn(
                &format!("hash-{id}"),
                Agent {
                    id: id.to_owned(),
                    organization_id: "org-1".into(),
                    hostname: format!("host-{id}"),
                    os: OsType::Linux,
                    os_version: "6.1".into(),
                    arch: "x86_64".into(),
                    agent_version: "1.0.0".into(),
                    mac_addresses: vec![],
                    tags: vec![],
                    status,
                    last_seen: 0,
                    enrolled_at: 0,
                    policy: AgentPolicy {
                        allowed_job_types: vec![JobType::RunScript, JobType::Reboot],
                        ..AgentPolicy::default()
                    },
                    capabilities: HashSet::from([Capability::RunScript, Capability::Reboot]),
                },
                0,
            )
            .await
            .unwrap();
    }

    fn spec(agent_id: &str, job_type: JobType) -> JobSpec {
        JobSpec {
            agent_id: agent_id.to_owned(),
            job_type,
            payload: serde_json::json!({"script": "uptime"}),
            priority: JobPriority::Normal,
            timeout_sec: Some(60),
        }
    }

    fn running_report(job_id: &str, started_at: i64) -> JobResultPayload {
        JobResultPayload {
            job_id: job_id.to_owned(),
            status: JobStatus::Running,
            started_at,
            completed_at: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            error_message: None,
            artifacts: vec![],
            result_data: None,
        }
    }

    fn terminal_report(job_id: &str, status: JobStatus) -> JobResultPayload {
        JobResultPayload {
            job_id: job_id.to_owned(),
            status,
            started_at: 10,
            completed_at: Some(20),
            stdout: Some("done".into()),
            stderr: None,
            exit_code: Some(0),
            error_message: None,
            artifacts: vec![],
            result_data: None,
        }
    }

    #[tokio::test]
    async fn create_gates_capability_policy_and_permission() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Online).await;

        // Capability missing entirely.
        let err = create_job(&state, &operator(&["*"]), spec("a-1", JobType::WakeOnLan)).await;
        assert_eq!(err.unwrap_err(), DispatchError::CapabilityMissing);

        // Capability present but not in the agent's policy allowlist.
        let err = create_job(&state, &operator(&["*"]), spec("a-1", JobType::ProcessKill)).await;
        assert_eq!(err.unwrap_err(), DispatchError::CapabilityMissing);

        // Operator lacks the permission.
        let err =
            create_job(&state, &operator(&["scripts.run"]), spec("a-1", JobType::Reboot)).await;
        assert_eq!(err.unwrap_err(), DispatchError::PermissionMissing);

        // Unknown agent.
        let err = create_job(&state, &operator(&["*"]), spec("a-9", JobType::RunScript)).await;
        assert_eq!(err.unwrap_err(), DispatchError::AgentNotFound);
    }

    #[tokio::test]
    async fn offline_agent_parks_job_instead_of_queueing() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Offline).await;

        let job = create_job(&state, &operator(&["*"]), spec("a-1", JobType::RunScript))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::AgentOffline);
        assert!(state.cache.pop_job("a-1").await.is_none());
    }

    #[tokio::test]
    async fn full_lifecycle_create_poll_run_complete() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Online).await;
        let mut rx = state.fanout.subscribe();

        let job = create_job(&state, &operator(&["*"]), spec("a-1", JobType::RunScript))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let entry = poll(&state, "a-1").await.unwrap();
        assert_eq!(entry.job_id, job.id);
        // Queue hands each job out once.
        assert!(poll(&state, "a-1").await.is_none());

        report_result(&state, "a-1", "org-1", &running_report(&job.id, 10)).await.unwrap();
        let (stored, _) = state.store.get_job(&job.id, "org-1").await.unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.started_at, Some(10));

        report_result(&state, "a-1", "org-1", &terminal_report(&job.id, JobStatus::Success))
            .await
            .unwrap();
        let (stored, result) = state.store.get_job(&job.id, "org-1").await.unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert_eq!(result.unwrap().exit_code, Some(0));

        // created, queued, running, success.
        let mut statuses = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            match evt {
                FleetEvent::JobCreated { .. } => statuses.push("created".to_owned()),
                FleetEvent::JobStatusChanged { status, .. } => statuses.push(status),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(statuses, vec!["created", "queued", "running", "success"]);
    }

    #[tokio::test]
    async fn terminal_retry_does_not_republish() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Online).await;
        let job = create_job(&state, &operator(&["*"]), spec("a-1", JobType::RunScript))
            .await
            .unwrap();
        poll(&state, "a-1").await.unwrap();
        report_result(&state, "a-1", "org-1", &terminal_report(&job.id, JobStatus::Failed))
            .await
            .unwrap();

        let mut rx = state.fanout.subscribe();
        report_result(&state, "a-1", "org-1", &terminal_report(&job.id, JobStatus::Failed))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn poll_skips_entries_cancelled_in_queue() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Online).await;
        let op = operator(&["*"]);
        let first = create_job(&state, &op, spec("a-1", JobType::RunScript)).await.unwrap();
        let second = create_job(&state, &op, spec("a-1", JobType::RunScript)).await.unwrap();

        cancel(&state, &first, "op").await.unwrap();

        // The cancelled head entry is dropped; delivery moves on.
        let entry = poll(&state, "a-1").await.unwrap();
        assert_eq!(entry.job_id, second.id);
    }

    #[tokio::test]
    async fn cancel_refused_after_execution_starts() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Online).await;
        let job = create_job(&state, &operator(&["*"]), spec("a-1", JobType::RunScript))
            .await
            .unwrap();
        poll(&state, "a-1").await.unwrap();
        report_result(&state, "a-1", "org-1", &running_report(&job.id, 10)).await.unwrap();

        let err = cancel(&state, &job, "op").await;
        assert_eq!(err.unwrap_err(), DispatchError::CancelRejected);
    }

    #[tokio::test]
    async fn timeout_sweep_closes_overdue_jobs_and_rejects_late_results() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Online).await;
        let job = create_job(
            &state,
            &operator(&["*"]),
            JobSpec { timeout_sec: Some(0), ..spec("a-1", JobType::RunScript) },
        )
        .await
        .unwrap();
        poll(&state, "a-1").await.unwrap();
        report_result(&state, "a-1", "org-1", &running_report(&job.id, 0)).await.unwrap();

        let mut rx = state.fanout.subscribe();
        sweep_timeouts(&state).await;
        match rx.try_recv().unwrap() {
            FleetEvent::JobStatusChanged { status, .. } => assert_eq!(status, "timeout"),
            other => panic!("unexpected event {other:?}"),
        }

        // Idempotent under overlap.
        sweep_timeouts(&state).await;
        assert!(rx.try_recv().is_err());

        let err = report_result(
            &state,
            "a-1",
            "org-1",
            &terminal_report(&job.id, JobStatus::Success),
        )
        .await;
        assert_eq!(err.unwrap_err(), DispatchError::JobClosed);
    }

    #[tokio::test]
    async fn sweep_tolerates_extreme_reported_start_times() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Online).await;
        let job = create_job(&state, &operator(&["*"]), spec("a-1", JobType::RunScript))
            .await
            .unwrap();
        poll(&state, "a-1").await.unwrap();

        // A hostile agent can claim any start time; the deadline
        // arithmetic must saturate rather than overflow.
        report_result(&state, "a-1", "org-1", &running_report(&job.id, i64::MAX)).await.unwrap();
        sweep_timeouts(&state).await;

        let (stored, _) = state.store.get_job(&job.id, "org-1").await.unwrap();
        assert_eq!(stored.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn result_from_wrong_agent_is_rejected() {
        let state = test_state();
        seed_agent(&state, "a-1", AgentStatus::Online).await;
        seed_agent(&state, "a-2", AgentStatus::Online).await;
        let job = create_job(&state, &operator(&["*"]), spec("a-1", JobType::RunScript))
            .await
            .unwrap();
        poll(&state, "a-1").await.unwrap();

        let err = report_result(
            &state,
            "a-2",
            "org-1",
            &terminal_report(&job.id, JobStatus::Success),
        )
        .await;
        assert_eq!(err.unwrap_err(), DispatchError::JobNotOwned);
    }
}
