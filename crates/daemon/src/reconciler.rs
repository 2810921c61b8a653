// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Periodic + triggered reconciliation against the control plane.
//!
//! Cycles are strictly sequential. Each one fetches desired state, diffs
//! it against the last successfully applied snapshot, posts a best-effort
//! drift report, and fans the diff out to the registered handlers. The
//! snapshot advances only when every handler succeeds, so a transient
//! handler failure leaves the same drift visible next cycle.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use plexd_client::{ClientError, ControlPlaneClient};
use plexd_core::{state_diff, DesiredState, StateDiff};
use plexd_wire::DriftReport;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Handler error type; an error skips the snapshot update but never stops
/// the other handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Applies a reconcile diff. Handlers run in registration order.
#[async_trait]
pub trait ReconcileHandler: Send + Sync {
    async fn apply(&self, desired: &DesiredState, diff: &StateDiff) -> Result<(), HandlerError>;
}

/// Fetches desired state; implemented by the control-plane client and by
/// test fakes.
#[async_trait]
pub trait StateFetcher: Send + Sync {
    async fn fetch_state(&self, node_id: &str) -> Result<DesiredState, ClientError>;
}

#[async_trait]
impl StateFetcher for ControlPlaneClient {
    async fn fetch_state(&self, node_id: &str) -> Result<DesiredState, ClientError> {
        ControlPlaneClient::fetch_state(self, node_id).await
    }
}

/// Receives drift reports; best-effort.
#[async_trait]
pub trait DriftSink: Send + Sync {
    async fn report_drift(&self, node_id: &str, report: &DriftReport) -> Result<(), ClientError>;
}

#[async_trait]
impl DriftSink for ControlPlaneClient {
    async fn report_drift(&self, node_id: &str, report: &DriftReport) -> Result<(), ClientError> {
        ControlPlaneClient::report_drift(self, node_id, report).await
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reconciler requires a non-empty node id")]
    EmptyNodeId,

    #[error("reconciler is already running")]
    AlreadyRunning,
}

pub struct Reconciler {
    fetcher: Arc<dyn StateFetcher>,
    drift: Option<Arc<dyn DriftSink>>,
    handlers: Mutex<Vec<Arc<dyn ReconcileHandler>>>,
    snapshot: Mutex<DesiredState>,
    interval: Duration,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Reconciler {
    pub fn new(
        fetcher: Arc<dyn StateFetcher>,
        drift: Option<Arc<dyn DriftSink>>,
        interval: Duration,
    ) -> Self {
        // Capacity 1: triggers raised while a cycle is in flight coalesce
        // into at most one follow-up cycle.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            fetcher,
            drift,
            handlers: Mutex::new(Vec::new()),
            snapshot: Mutex::new(DesiredState::default()),
            interval: interval.max(MIN_INTERVAL),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        }
    }

    pub fn register_handler(&self, handler: Arc<dyn ReconcileHandler>) {
        self.handlers.lock().push(handler);
    }

    /// Request an out-of-band cycle. Never blocks; excess triggers coalesce.
    pub fn trigger_reconcile(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Last successfully applied desired state.
    pub fn snapshot(&self) -> DesiredState {
        self.snapshot.lock().clone()
    }

    /// Run one cycle immediately, then alternate between interval ticks
    /// and triggers until cancelled.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        node_id: &str,
    ) -> Result<(), ReconcileError> {
        if node_id.is_empty() {
            return Err(ReconcileError::EmptyNodeId);
        }
        let mut trigger_rx =
            self.trigger_rx.lock().take().ok_or(ReconcileError::AlreadyRunning)?;

        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.cycle(node_id).await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reconciler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
                Some(()) = trigger_rx.recv() => {
                    debug!("reconcile triggered");
                }
            }
        }
    }

    async fn cycle(&self, node_id: &str) {
        let desired = match self.fetcher.fetch_state(node_id).await {
            Ok(desired) => desired,
            Err(e) => {
                warn!(error = %e, "state fetch failed; skipping cycle");
                return;
            }
        };

        let snapshot = self.snapshot.lock().clone();
        let diff = state_diff(&desired, &snapshot);

        if !diff.is_empty() {
            info!(corrections = diff.corrections().len(), "drift detected");
            self.post_drift_report(node_id, &diff).await;
        }

        let handlers: Vec<Arc<dyn ReconcileHandler>> = self.handlers.lock().clone();
        let mut all_ok = true;
        for handler in handlers {
            match AssertUnwindSafe(handler.apply(&desired, &diff)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "reconcile handler failed");
                    all_ok = false;
                }
                Err(_) => {
                    error!("reconcile handler panicked");
                    all_ok = false;
                }
            }
        }

        // Only a fully applied state becomes the new snapshot; otherwise
        // the same drift shows up again next cycle.
        if all_ok {
            *self.snapshot.lock() = desired;
        }
    }

    async fn post_drift_report(&self, node_id: &str, diff: &StateDiff) {
        let Some(sink) = &self.drift else { return };
        let report = DriftReport { observed_at: Utc::now(), corrections: diff.corrections() };
        if let Err(e) = sink.report_drift(node_id, &report).await {
            warn!(error = %e, "failed to post drift report");
        }
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
