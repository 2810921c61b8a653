// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Signed event stream manager.
//!
//! Keeps one subscription alive for the life of the daemon: connect,
//! verify and deliver envelopes in arrival order, reconnect with backoff
//! on disconnect. A 401 handshake pauses reconnection, hands control to
//! the auth-recovery hook, then resumes with the refreshed token. The
//! reserved `signing_key_rotated` event is consumed here and never reaches
//! user handlers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use plexd_client::{open_event_stream, Backoff, ControlPlaneClient, StreamError};
use plexd_core::{SignedEnvelope, SystemClock, SIGNING_KEY_ROTATED};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registrar::AuthRecovery;
use crate::verifier::SignatureVerifier;

/// Handler error type; errors are logged and never stop delivery.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Synchronous handler invoked from the delivery task.
pub type EventHandler = Box<dyn Fn(&SignedEnvelope) -> Result<(), HandlerError> + Send + Sync>;

/// Payload of the reserved `signing_key_rotated` event.
#[derive(Debug, Deserialize)]
struct KeyRotation {
    current: String,
    #[serde(default)]
    previous: Option<String>,
    #[serde(default)]
    transition_expires: Option<DateTime<Utc>>,
}

pub struct EventStreamManager {
    client: Arc<ControlPlaneClient>,
    verifier: Arc<SignatureVerifier<SystemClock>>,
    auth: Arc<dyn AuthRecovery>,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    last_event_id: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl EventStreamManager {
    pub fn new(
        client: Arc<ControlPlaneClient>,
        verifier: Arc<SignatureVerifier<SystemClock>>,
        auth: Arc<dyn AuthRecovery>,
    ) -> Self {
        Self {
            client,
            verifier,
            auth,
            handlers: Mutex::new(HashMap::new()),
            last_event_id: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a handler for one event type. Handlers for the same type
    /// run in registration order.
    pub fn register_handler(&self, event_type: impl Into<String>, handler: EventHandler) {
        self.handlers.lock().entry(event_type.into()).or_default().push(handler);
    }

    /// Close the active connection and make [`run`] return. Idempotent and
    /// safe to call concurrently with the run loop.
    ///
    /// [`run`]: EventStreamManager::run
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Maintain the subscription until cancelled or shut down.
    pub async fn run(&self, cancel: CancellationToken, node_id: &str) {
        let mut backoff = Backoff::new();

        loop {
            if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                return;
            }

            let url = self.client.events_url(node_id);
            let token = self.client.auth_token();
            let last_event_id = self.last_event_id.lock().clone();

            match open_event_stream(&url, token.as_deref(), last_event_id.as_deref()).await {
                Ok(mut stream) => {
                    info!("event stream connected");
                    backoff.reset();
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                stream.close().await;
                                return;
                            }
                            _ = self.shutdown.cancelled() => {
                                stream.close().await;
                                return;
                            }
                            message = stream.next_envelope() => match message {
                                Some(Ok(envelope)) => self.deliver(&envelope),
                                Some(Err(e)) => warn!(error = %e, "dropping malformed event frame"),
                                None => {
                                    warn!("event stream disconnected");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(StreamError::Auth) => {
                    // Pause reconnection until the token is refreshed; a
                    // failed recovery lands back here, paced by the backoff.
                    warn!("event stream rejected credentials; recovering auth");
                    self.auth.recover_auth().await;
                    if !self.sleep(backoff.next_delay(), &cancel).await {
                        return;
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "event stream connect failed");
                    if !self.sleep(delay, &cancel).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep unless cancellation arrives first; false means "stop".
    async fn sleep(&self, delay: std::time::Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Verify and dispatch one envelope. Envelopes that fail verification
    /// are dropped before any handler sees them.
    fn deliver(&self, envelope: &SignedEnvelope) {
        if let Err(e) = self.verifier.verify(envelope) {
            warn!(
                event_id = %envelope.event_id,
                event_type = %envelope.event_type,
                error = %e,
                "dropping event with invalid signature"
            );
            return;
        }
        *self.last_event_id.lock() = Some(envelope.event_id.clone());

        if envelope.event_type == SIGNING_KEY_ROTATED {
            self.apply_key_rotation(envelope);
            return;
        }

        let handlers = self.handlers.lock();
        let Some(list) = handlers.get(&envelope.event_type) else {
            debug!(event_type = %envelope.event_type, "no handler registered for event");
            return;
        };
        for handler in list {
            if let Err(e) = handler(envelope) {
                warn!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    error = %e,
                    "event handler failed"
                );
            }
        }
    }

    fn apply_key_rotation(&self, envelope: &SignedEnvelope) {
        let rotation: KeyRotation = match serde_json::from_slice(&envelope.payload) {
            Ok(rotation) => rotation,
            Err(e) => {
                warn!(event_id = %envelope.event_id, error = %e, "malformed key rotation payload");
                return;
            }
        };
        match self.verifier.set_keys(
            &rotation.current,
            rotation.previous.as_deref(),
            rotation.transition_expires,
        ) {
            Ok(()) => info!("signing keys rotated"),
            Err(e) => warn!(error = %e, "rejected key rotation"),
        }
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
