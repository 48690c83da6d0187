// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence tracking: heartbeat ingestion, telemetry capture, and the
//! background sweep that flips silent agents to offline.
//!
//! Status-change events are driven by actual transitions in the store, so
//! a flapping heartbeat or an overlapping sweep never duplicates them.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::events::FleetEvent;
use crate::model::{Agent, AuditEntry, InventorySnapshot, MetricsSample};
use crate::protocol::{AgentStatus, HeartbeatPayload, InventoryPayload, MetricsPayload};
use crate::state::AppState;

/// Apply a heartbeat from an authenticated agent.  Updates liveness, the
/// presence cache, and publishes a status-change event only when the
/// status actually moved.
pub async fn process_heartbeat(state: &AppState, agent: &Agent, payload: &HeartbeatPayload) {
    let now = state.now();
    let Some(outcome) = state
        .store
        .heartbeat_update(
            &agent.id,
            payload.status,
            &payload.agent_version,
            &payload.capabilities,
            now,
        )
        .await
    else {
        // Deleted between authentication and here; nothing to update.
        return;
    };

    state
        .cache
        .set_presence(
            &agent.id,
            payload.status.as_str(),
            now,
            state.config.presence_ttl_sec,
            now as u64,
        )
        .await;

    if outcome.prev_status != payload.status {
        debug!(
            agent_id = %agent.id,
            from = outcome.prev_status.as_str(),
            to = payload.status.as_str(),
            "agent status changed"
        );
        state
            .store
            .record_audit(AuditEntry {
                organization_id: outcome.organization_id.clone(),
                actor: None,
                agent_id: Some(agent.id.clone()),
                action: "agent.status_changed",
                resource_type: "agent",
                resource_id: agent.id.clone(),
                details: serde_json::json!({
                    "from": outcome.prev_status.as_str(),
                    "to": payload.status.as_str(),
                }),
                recorded_at: now,
            })
            .await;
        state.fanout.publish(FleetEvent::AgentStatusChanged {
            organization_id: outcome.organization_id,
            agent_id: agent.id.clone(),
            old_status: outcome.prev_status.as_str().to_owned(),
            new_status: payload.status.as_str().to_owned(),
        });
    }
}

/// Store a metrics sample and fan it out to subscribed realtime clients.
pub async fn process_metrics(state: &AppState, agent: &Agent, payload: &MetricsPayload) {
    let now = state.now();
    let (disk_used, disk_total) = payload
        .disks
        .iter()
        .fold((0u64, 0u64), |(u, t), d| (u + d.used_bytes, t + d.total_bytes));

    state
        .store
        .record_metrics(MetricsSample {
            agent_id: agent.id.clone(),
            timestamp: payload.timestamp,
            cpu_usage: payload.cpu.usage_percent,
            memory_used_bytes: payload.memory.used_bytes,
            memory_total_bytes: payload.memory.total_bytes,
            disk_used_bytes: disk_used,
            disk_total_bytes: disk_total,
            processes_count: payload.processes_count,
        })
        .await;

    let raw = match serde_json::to_value(payload) {
        Ok(v) => v,
        Err(err) => {
            warn!(agent_id = %agent.id, %err, "metrics payload not serializable");
            return;
        }
    };
    state
        .cache
        .set_latest_metrics(&agent.id, raw.clone(), state.config.presence_ttl_sec, now as u64)
        .await;
    state.fanout.publish(FleetEvent::AgentMetrics {
        organization_id: agent.organization_id.clone(),
        agent_id: agent.id.clone(),
        metrics: raw,
    });
}

/// Store an inventory snapshot and refresh the agent's OS/arch columns.
pub async fn process_inventory(state: &AppState, agent: &Agent, payload: &InventoryPayload) {
    let raw = match serde_json::to_value(payload) {
        Ok(v) => v,
        Err(err) => {
            warn!(agent_id = %agent.id, %err, "inventory payload not serializable");
            return;
        }
    };
    state
        .store
        .update_agent_inventory(
            &agent.id,
            &payload.os.version,
            &payload.os.arch,
            InventorySnapshot {
                agent_id: agent.id.clone(),
                timestamp: payload.timestamp,
                raw,
            },
        )
        .await;
    debug!(agent_id = %agent.id, "inventory updated");
}

/// One stale-sweep pass: flip silent agents offline, emit one event and
/// one audit record per transition, and purge expired cache entries.
pub async fn sweep_stale_agents(state: &AppState) {
    let now = state.now();
    let transitioned =
        state.store.mark_stale_offline(state.config.offline_threshold_sec, now).await;
    for stale in transitioned {
        info!(agent_id = %stale.id, prev = stale.prev_status.as_str(), "agent went offline");
        state
            .store
            .record_audit(AuditEntry {
                organization_id: stale.organization_id.clone(),
                actor: None,
                agent_id: Some(stale.id.clone()),
                action: "agent.offline",
                resource_type: "agent",
                resource_id: stale.id.clone(),
                details: serde_json::json!({
                    "reason": "heartbeat_timeout",
                    "prev_status": stale.prev_status.as_str(),
                }),
                recorded_at: now,
            })
            .await;
        state.fanout.publish(FleetEvent::AgentStatusChanged {
            organization_id: stale.organization_id,
            agent_id: stale.id,
            old_status: stale.prev_status.as_str().to_owned(),
            new_status: AgentStatus::Offline.as_str().to_owned(),
        });
    }
    state.cache.purge_expired(now as u64).await;
}

/// Spawn the periodic stale-agent sweep.
pub fn spawn_stale_sweeper(state: Arc<AppState>) {
    let interval = state.config.stale_sweep_interval();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            sweep_stale_agents(&state).await;
        }
    });
}
