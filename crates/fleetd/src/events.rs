// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event fanout hub — bridges backend-side state transitions to realtime
//! clients.
//!
//! Channels are hard-coded per feature: agent status changes, agent
//! metrics, job creation, and job status changes.  Every event carries its
//! organization so the WebSocket layer can enforce tenancy.  Publishing is
//! best-effort; a publish with no listeners is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Backend-side state transitions fanned out to realtime clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum FleetEvent {
    AgentStatusChanged {
        organization_id: String,
        agent_id: String,
        old_status: String,
        new_status: String,
    },
    AgentMetrics {
        organization_id: String,
        agent_id: String,
        metrics: serde_json::Value,
    },
    JobCreated {
        organization_id: String,
        job_id: String,
        agent_id: String,
        job_type: String,
    },
    JobStatusChanged {
        organization_id: String,
        job_id: String,
        agent_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
    },
}

impl FleetEvent {
    pub fn organization_id(&self) -> &str {
        match self {
            Self::AgentStatusChanged { organization_id, .. }
            | Self::AgentMetrics { organization_id, .. }
            | Self::JobCreated { organization_id, .. }
            | Self::JobStatusChanged { organization_id, .. } => organization_id,
        }
    }

    /// Wire event name for `{event, data, timestamp}` frames.  Job creation
    /// and job transitions share one client-facing event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::AgentStatusChanged { .. } => "agent.status_changed",
            Self::AgentMetrics { .. } => "agent.metrics",
            Self::JobCreated { .. } | Self::JobStatusChanged { .. } => "job.status_changed",
        }
    }

    /// Subscription key a client must hold to receive this event, if the
    /// channel is not broadcast org-wide.
    pub fn subscription_key(&self) -> Option<String> {
        match self {
            Self::AgentMetrics { agent_id, .. } => Some(format!("agent:{agent_id}")),
            _ => None,
        }
    }
}

/// Client→agent input forwarded through the realtime socket (remote shell
/// keystrokes).  Consumed by whichever session bridge owns the session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFrame {
    pub session_id: String,
    pub data: String,
    pub operator: String,
}

/// Connection-registry object owned by the fanout component.  Constructed
/// once at startup and carried in shared state — never ambient.
pub struct Fanout {
    event_tx: broadcast::Sender<FleetEvent>,
    input_tx: broadcast::Sender<InputFrame>,
}

impl Fanout {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (input_tx, _) = broadcast::channel(64);
        Self { event_tx, input_tx }
    }

    /// Best-effort publish; delivery failures never reach the caller.
    pub fn publish(&self, event: FleetEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.event_tx.subscribe()
    }

    pub fn forward_input(&self, frame: InputFrame) {
        let _ = self.input_tx.send(frame);
    }

    pub fn subscribe_input(&self) -> broadcast::Receiver<InputFrame> {
        self.input_tx.subscribe()
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}
