// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleetd: control-plane daemon for fleet agents.
//!
//! Agents enroll with single- or multi-use tokens, then talk over signed,
//! replay-protected envelopes: heartbeats, metrics, inventory, job polls,
//! and job results.  Operators drive the fleet over a bearer-token admin
//! API and watch it live over a tenant-filtered WebSocket.

pub mod authn;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod model;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod store;
pub mod transport;

use tokio::net::TcpListener;

use crate::config::FleetConfig;
use crate::dispatch::spawn_timeout_sweeper;
use crate::presence::spawn_stale_sweeper;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the fleet control plane until shutdown.
pub async fn run(config: FleetConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config)?;
    let shutdown = state.shutdown.clone();

    spawn_stale_sweeper(state.clone());
    spawn_timeout_sweeper(state.clone());

    tracing::info!("fleetd listening on {addr}");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
