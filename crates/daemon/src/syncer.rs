// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Debounced push of locally-written reports to the control plane.
//!
//! Writers call [`ReportSyncer::notify_change`]; the run loop waits out
//! the debounce window, detaches the pending buffers, and ships them. A
//! failed flush puts everything back at the head of the queue and
//! re-signals, so nothing is dropped on the primary path. The buffer is
//! capped as a defense against a control plane that stays down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use plexd_client::{ClientError, ControlPlaneClient};
use plexd_core::ReportEntry;
use plexd_wire::ReportSyncRequest;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);
pub const MAX_PENDING: usize = 4096;

/// Control-plane surface the syncer needs; lets tests swap the client.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn sync_reports(
        &self,
        node_id: &str,
        req: &ReportSyncRequest,
    ) -> Result<(), ClientError>;
}

#[async_trait]
impl ReportSink for ControlPlaneClient {
    async fn sync_reports(
        &self,
        node_id: &str,
        req: &ReportSyncRequest,
    ) -> Result<(), ClientError> {
        ControlPlaneClient::sync_reports(self, node_id, req).await
    }
}

#[derive(Default)]
struct Pending {
    entries: Vec<ReportEntry>,
    deleted: Vec<String>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.deleted.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len() + self.deleted.len()
    }
}

pub struct ReportSyncer {
    sink: Arc<dyn ReportSink>,
    node_id: String,
    debounce: Duration,
    pending: Mutex<Pending>,
    change_tx: mpsc::Sender<()>,
    change_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ReportSyncer {
    pub fn new(sink: Arc<dyn ReportSink>, node_id: impl Into<String>, debounce: Duration) -> Self {
        let (change_tx, change_rx) = mpsc::channel(1);
        Self {
            sink,
            node_id: node_id.into(),
            debounce,
            pending: Mutex::new(Pending::default()),
            change_tx,
            change_rx: Mutex::new(Some(change_rx)),
        }
    }

    /// Queue updated entries and deleted keys, then signal the run loop.
    /// Never blocks; signals coalesce.
    pub fn notify_change(&self, entries: Vec<ReportEntry>, deleted_keys: Vec<String>) {
        if entries.is_empty() && deleted_keys.is_empty() {
            return;
        }
        {
            let mut pending = self.pending.lock();
            pending.entries.extend(entries);
            pending.deleted.extend(deleted_keys);

            let overflow = pending.len().saturating_sub(MAX_PENDING);
            if overflow > 0 {
                warn!(dropped = overflow, "report sync buffer full; dropping oldest entries");
                let from_entries = overflow.min(pending.entries.len());
                pending.entries.drain(..from_entries);
                let rest = overflow - from_entries;
                if rest > 0 {
                    let to_drain = rest.min(pending.deleted.len());
                    pending.deleted.drain(..to_drain);
                }
            }
        }
        let _ = self.change_tx.try_send(());
    }

    /// Number of queued items; used by tests and the status surface.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Debounce-and-flush until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncerError> {
        let mut change_rx = self.change_rx.lock().take().ok_or(SyncerError::AlreadyRunning)?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("report syncer stopping");
                    return Ok(());
                }
                changed = change_rx.recv() => {
                    if changed.is_none() {
                        return Ok(());
                    }
                }
            }

            // Debounce: let a burst of writes land before pushing.
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("report syncer stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.debounce) => {}
            }

            self.flush().await;
        }
    }

    /// Detach and push the pending buffers; on failure put everything back
    /// at the head and re-signal.
    async fn flush(&self) {
        let detached = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        if detached.is_empty() {
            return;
        }

        let request = ReportSyncRequest {
            entries: detached.entries.clone(),
            deleted: detached.deleted.clone(),
        };
        match self.sink.sync_reports(&self.node_id, &request).await {
            Ok(()) => {
                info!(
                    entries = request.entries.len(),
                    deleted = request.deleted.len(),
                    "reports synced"
                );
            }
            Err(e) => {
                warn!(error = %e, "report sync failed; re-queueing");
                let mut pending = self.pending.lock();
                let mut entries = detached.entries;
                entries.append(&mut pending.entries);
                pending.entries = entries;
                let mut deleted = detached.deleted;
                deleted.append(&mut pending.deleted);
                pending.deleted = deleted;
                drop(pending);
                let _ = self.change_tx.try_send(());
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncerError {
    #[error("report syncer is already running")]
    AlreadyRunning,
}

#[cfg(test)]
#[path = "syncer_tests.rs"]
mod tests;
