// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the fleet control daemon.
#[derive(Debug, Clone, clap::Args)]
pub struct FleetConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "FLEETD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9700, env = "FLEETD_PORT")]
    pub port: u16,

    /// Global secret agent signing keys are derived from.
    #[arg(long, env = "FLEETD_AGENT_HMAC_SECRET")]
    pub agent_hmac_secret: String,

    /// Path to the operator credential JSON file.
    #[arg(long, env = "FLEETD_OPERATORS_CONFIG")]
    pub operators_config: Option<std::path::PathBuf>,

    /// Envelope timestamp acceptance window in seconds.  Nonces are
    /// retained for twice this long.
    #[arg(long, default_value_t = 300, env = "FLEETD_NONCE_WINDOW_SEC")]
    pub nonce_window_sec: u64,

    /// Heartbeat interval handed to agents at enrollment.
    #[arg(long, default_value_t = 30, env = "FLEETD_HEARTBEAT_INTERVAL_SEC")]
    pub heartbeat_interval_sec: u64,

    /// Seconds without a heartbeat before an agent is marked offline.
    /// Must comfortably exceed the heartbeat interval to avoid flapping
    /// on a single missed beat.
    #[arg(long, default_value_t = 90, env = "FLEETD_OFFLINE_THRESHOLD_SEC")]
    pub offline_threshold_sec: u64,

    /// Stale-agent sweep interval in milliseconds.
    #[arg(long, default_value_t = 30000, env = "FLEETD_STALE_SWEEP_MS")]
    pub stale_sweep_ms: u64,

    /// Job timeout sweep interval in milliseconds.
    #[arg(long, default_value_t = 15000, env = "FLEETD_TIMEOUT_SWEEP_MS")]
    pub timeout_sweep_ms: u64,

    /// Default job timeout budget in seconds.
    #[arg(long, default_value_t = 300, env = "FLEETD_DEFAULT_JOB_TIMEOUT_SEC")]
    pub default_job_timeout_sec: u64,

    /// TTL for cached presence (status/last-seen) entries in seconds.
    #[arg(long, default_value_t = 120, env = "FLEETD_PRESENCE_TTL_SEC")]
    pub presence_ttl_sec: u64,
}

impl FleetConfig {
    pub fn stale_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stale_sweep_ms)
    }

    pub fn timeout_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_sweep_ms)
    }

    /// Nonce retention: twice the acceptance window so every not-yet-expired
    /// replay candidate is still held.
    pub fn nonce_ttl_sec(&self) -> u64 {
        self.nonce_window_sec * 2
    }
}
