// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent wire protocol: the signed envelope, the per-message payload union,
//! and the closed job-type tables.
//!
//! Every agent→backend request except enrollment is an [`Envelope`].  The
//! payload is carried as raw JSON and only parsed into its typed variant
//! after the envelope has been authenticated, so business logic never sees
//! an unverified payload.

use serde::{Deserialize, Serialize};

// -- Envelope -----------------------------------------------------------------

/// Signed, replay-protected message wrapper for all agent traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub agent_id: String,
    /// Unix epoch seconds at the sender.
    pub ts: i64,
    /// Single-use random token, at least 16 characters.
    pub nonce: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    /// HMAC-SHA256 over the canonical signing string, hex-encoded.
    pub hmac: String,
}

/// Message kinds an agent may send inside an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Heartbeat,
    MetricsPush,
    InventoryPush,
    JobResult,
    PollRequest,
}

impl MessageKind {
    /// Wire name, also the `type` component of the signing string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::MetricsPush => "metrics_push",
            Self::InventoryPush => "inventory_push",
            Self::JobResult => "job_result",
            Self::PollRequest => "poll_request",
        }
    }
}

// -- Enrollment ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub enrollment_token: String,
    pub hostname: String,
    pub os: OsType,
    pub os_version: String,
    pub arch: String,
    pub agent_version: String,
    #[serde(default)]
    pub mac_addresses: Vec<String>,
}

/// The only response that ever carries the agent's raw signing secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub agent_id: String,
    pub agent_secret: String,
    pub policy: AgentPolicy,
    pub heartbeat_interval_sec: u64,
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Windows,
    Linux,
    Macos,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Macos => "macos",
        }
    }
}

// -- Policy & capabilities ----------------------------------------------------

/// Per-agent configuration stamped on at enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPolicy {
    pub metrics_interval_sec: u64,
    pub inventory_interval_sec: u64,
    pub allowed_job_types: Vec<JobType>,
    pub max_concurrent_jobs: u32,
    pub update_channel: UpdateChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    Stable,
    Beta,
    Canary,
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self {
            metrics_interval_sec: 30,
            inventory_interval_sec: 3600,
            allowed_job_types: vec![
                JobType::RunScript,
                JobType::RemoteShellStart,
                JobType::RemoteShellStop,
                JobType::RemoteDesktopStart,
                JobType::RemoteDesktopStop,
                JobType::Reboot,
                JobType::Shutdown,
                JobType::ServiceRestart,
                JobType::ServiceStop,
                JobType::ServiceStart,
                JobType::ProcessKill,
            ],
            max_concurrent_jobs: 5,
            update_channel: UpdateChannel::Stable,
        }
    }
}

/// Named optional features an agent can enable.  Gates which job types may
/// target the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Metrics,
    Inventory,
    RunScript,
    RemoteShell,
    RemoteDesktop,
    PrivacyMode,
    InputLock,
    WakeOnLan,
    AgentUpdate,
    ArtifactTransfer,
    WebcamCapture,
    Reboot,
    Shutdown,
    ServiceManagement,
    ProcessManagement,
}

/// Capability set enabled on a freshly enrolled agent.
pub const DEFAULT_CAPABILITIES: &[Capability] = &[
    Capability::Metrics,
    Capability::Inventory,
    Capability::RunScript,
    Capability::RemoteShell,
    Capability::RemoteDesktop,
    Capability::Reboot,
    Capability::Shutdown,
    Capability::ServiceManagement,
    Capability::ProcessManagement,
    Capability::AgentUpdate,
];

// -- Jobs ---------------------------------------------------------------------

/// Closed enumeration of job kinds.  The permission and capability tables
/// below must stay in lockstep with the agent's own job-type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    RunScript,
    RemoteShellStart,
    RemoteShellStop,
    RemoteDesktopStart,
    RemoteDesktopStop,
    RemoteDesktopStream,
    RemoteDesktopInput,
    RemoteDesktopPrivacyModeSet,
    RemoteDesktopInputLockSet,
    WakeOnLan,
    AgentUpdate,
    Reboot,
    Shutdown,
    ServiceRestart,
    ServiceStop,
    ServiceStart,
    ProcessKill,
    ArtifactUpload,
    ArtifactDownload,
    WebcamCapture,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunScript => "run_script",
            Self::RemoteShellStart => "remote_shell_start",
            Self::RemoteShellStop => "remote_shell_stop",
            Self::RemoteDesktopStart => "remote_desktop_start",
            Self::RemoteDesktopStop => "remote_desktop_stop",
            Self::RemoteDesktopStream => "remote_desktop_stream",
            Self::RemoteDesktopInput => "remote_desktop_input",
            Self::RemoteDesktopPrivacyModeSet => "remote_desktop_privacy_mode_set",
            Self::RemoteDesktopInputLockSet => "remote_desktop_input_lock_set",
            Self::WakeOnLan => "wake_on_lan",
            Self::AgentUpdate => "agent_update",
            Self::Reboot => "reboot",
            Self::Shutdown => "shutdown",
            Self::ServiceRestart => "service_restart",
            Self::ServiceStop => "service_stop",
            Self::ServiceStart => "service_start",
            Self::ProcessKill => "process_kill",
            Self::ArtifactUpload => "artifact_upload",
            Self::ArtifactDownload => "artifact_download",
            Self::WebcamCapture => "webcam_capture",
        }
    }

    /// Capability the target agent must have enabled.
    pub fn required_capability(&self) -> Capability {
        match self {
            Self::RunScript => Capability::RunScript,
            Self::RemoteShellStart | Self::RemoteShellStop => Capability::RemoteShell,
            Self::RemoteDesktopStart
            | Self::RemoteDesktopStop
            | Self::RemoteDesktopStream
            | Self::RemoteDesktopInput => Capability::RemoteDesktop,
            Self::RemoteDesktopPrivacyModeSet => Capability::PrivacyMode,
            Self::RemoteDesktopInputLockSet => Capability::InputLock,
            Self::WakeOnLan => Capability::WakeOnLan,
            Self::AgentUpdate => Capability::AgentUpdate,
            Self::Reboot => Capability::Reboot,
            Self::Shutdown => Capability::Shutdown,
            Self::ServiceRestart | Self::ServiceStop | Self::ServiceStart => {
                Capability::ServiceManagement
            }
            Self::ProcessKill => Capability::ProcessManagement,
            Self::ArtifactUpload | Self::ArtifactDownload => Capability::ArtifactTransfer,
            Self::WebcamCapture => Capability::WebcamCapture,
        }
    }

    /// Permission the creating operator must hold.
    pub fn required_permission(&self) -> &'static str {
        match self {
            Self::RunScript => "scripts.run",
            Self::RemoteShellStart | Self::RemoteShellStop => "remote.shell",
            Self::RemoteDesktopStart
            | Self::RemoteDesktopStop
            | Self::RemoteDesktopStream
            | Self::RemoteDesktopInput
            | Self::RemoteDesktopPrivacyModeSet
            | Self::RemoteDesktopInputLockSet => "remote.desktop",
            Self::WakeOnLan => "power.wol",
            Self::AgentUpdate => "agent.update",
            Self::Reboot => "power.reboot",
            Self::Shutdown => "power.shutdown",
            Self::ServiceRestart | Self::ServiceStop | Self::ServiceStart => "services.manage",
            Self::ProcessKill => "processes.kill",
            Self::ArtifactUpload => "artifacts.upload",
            Self::ArtifactDownload => "artifacts.download",
            Self::WebcamCapture => "webcam.capture",
        }
    }

    /// Job kinds queued even when the target agent is offline.  Wake-on-LAN
    /// is delivered through a relay, so offline targets are expected.
    pub fn deliverable_offline(&self) -> bool {
        matches!(self, Self::WakeOnLan)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
    AgentOffline,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::AgentOffline => "agent_offline",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout | Self::Cancelled)
    }
}

/// Informational only — the delivery queue is strict FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Wire-shaped job descriptor delivered to a polling agent.  Consumed
/// exactly once from the agent's delivery queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub timeout_sec: u64,
    pub priority: JobPriority,
    pub payload: serde_json::Value,
    pub created_by: String,
    pub organization_id: String,
}

// -- Feature payloads ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
    Degraded,
    Updating,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Degraded => "degraded",
            Self::Updating => "updating",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub status: AgentStatus,
    pub uptime_sec: u64,
    pub agent_version: String,
    #[serde(default)]
    pub active_jobs: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub timestamp: i64,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    #[serde(default)]
    pub disks: Vec<DiskMetrics>,
    pub processes_count: u32,
    pub uptime_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub usage_percent: f64,
    pub cores: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryPayload {
    pub timestamp: i64,
    pub os: OsInfo,
    pub hardware: HardwareInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsInfo {
    #[serde(rename = "type")]
    pub os_type: OsType,
    pub name: String,
    pub version: String,
    pub arch: String,
    pub kernel: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub ram_total_bytes: u64,
}

/// Result report for a job.  A `running` status is a progress report that
/// marks execution start; any terminal status closes the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultPayload {
    pub job_id: String,
    pub status: JobStatus,
    pub started_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<JobArtifact>,
    #[serde(default)]
    pub result_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArtifact {
    pub artifact_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
}
