// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Periodic liveness ping with directive-flag dispatch.
//!
//! The first heartbeat fires immediately; each response may carry
//! `reconcile` and `rotate_keys` directives which are forwarded to the
//! injected callbacks. A 401 hands control to the auth-recovery hook and
//! the loop keeps ticking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plexd_client::{ClientError, ControlPlaneClient, ErrorClass};
use plexd_wire::{HeartbeatRequest, HeartbeatResponse};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registrar::AuthRecovery;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Builds the heartbeat body each tick; the integrator installs one that
/// attaches version, uptime, and the binary checksum.
pub type RequestBuilder = Box<dyn Fn() -> HeartbeatRequest + Send + Sync>;

/// Control-plane surface the service needs; lets tests swap the client.
#[async_trait]
pub trait HeartbeatApi: Send + Sync {
    async fn heartbeat(
        &self,
        node_id: &str,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ClientError>;
}

#[async_trait]
impl HeartbeatApi for ControlPlaneClient {
    async fn heartbeat(
        &self,
        node_id: &str,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ClientError> {
        ControlPlaneClient::heartbeat(self, node_id, req).await
    }
}

pub struct HeartbeatService {
    api: Arc<dyn HeartbeatApi>,
    node_id: String,
    interval: Duration,
    builder: RequestBuilder,
    on_reconcile: Arc<dyn Fn() + Send + Sync>,
    on_rotate_keys: Arc<dyn Fn() + Send + Sync>,
    auth: Arc<dyn AuthRecovery>,
}

impl HeartbeatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn HeartbeatApi>,
        node_id: impl Into<String>,
        interval: Duration,
        builder: RequestBuilder,
        on_reconcile: Arc<dyn Fn() + Send + Sync>,
        on_rotate_keys: Arc<dyn Fn() + Send + Sync>,
        auth: Arc<dyn AuthRecovery>,
    ) -> Self {
        Self {
            api,
            node_id: node_id.into(),
            interval,
            builder,
            on_reconcile,
            on_rotate_keys,
            auth,
        }
    }

    /// Tick until cancelled. Heartbeats are strictly sequential: a slow
    /// call delays the next tick rather than overlapping it.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat service stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.beat().await;
        }
    }

    async fn beat(&self) {
        let request = (self.builder)();
        match self.api.heartbeat(&self.node_id, &request).await {
            Ok(response) => {
                debug!("heartbeat acknowledged");
                self.dispatch(&response);
            }
            Err(e) if e.class() == ErrorClass::RetryAuth => {
                warn!("heartbeat rejected with 401; recovering auth");
                self.auth.recover_auth().await;
            }
            Err(e) => {
                warn!(error = %e, "heartbeat failed");
            }
        }
    }

    fn dispatch(&self, response: &HeartbeatResponse) {
        if response.reconcile {
            info!("control plane requested a reconcile");
            (self.on_reconcile)();
        }
        if response.rotate_keys {
            // New keys arrive in the next state fetch; a reconcile pulls
            // them in.
            info!("control plane requested a key rotation");
            (self.on_rotate_keys)();
        }
    }
}

/// SHA-256 of the running binary, attached to heartbeats. Best-effort.
pub fn binary_checksum() -> Option<String> {
    let path = std::env::current_exe().ok()?;
    let bytes = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
