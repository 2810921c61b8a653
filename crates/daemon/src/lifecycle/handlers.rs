// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Handlers the integrator registers on the two state-delivery paths.
//!
//! Stream push and reconcile pull both land in the same cache mutators;
//! updates replace whole categories, so duplicate or reordered delivery
//! between the paths is harmless.

use std::sync::Arc;

use async_trait::async_trait;
use plexd_core::{DesiredState, StateDiff};
use plexd_storage::StateCache;

use crate::events::EventHandler;
use crate::reconciler::{HandlerError, Reconciler, ReconcileHandler};
use crate::verifier::SignatureVerifier;

/// Full desired state pushed over the stream.
pub const STATE_UPDATED: &str = "state_updated";

/// Control-plane nudge to pull state now.
pub const RECONCILE_REQUESTED: &str = "reconcile_requested";

/// Mirrors reconciled state into the cache, one category per diff flag.
pub struct CacheUpdateHandler {
    cache: Arc<StateCache>,
}

impl CacheUpdateHandler {
    pub fn new(cache: Arc<StateCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ReconcileHandler for CacheUpdateHandler {
    async fn apply(&self, desired: &DesiredState, diff: &StateDiff) -> Result<(), HandlerError> {
        if diff.metadata_changed {
            self.cache.update_metadata(desired.metadata.clone());
        }
        if diff.data_changed {
            self.cache.update_data(desired.data.clone());
        }
        if diff.secret_refs_changed {
            self.cache.update_secret_index(desired.secret_refs.clone());
        }
        Ok(())
    }
}

/// Applies signing keys carried in a state response to the verifier.
pub struct SigningKeyHandler {
    verifier: Arc<SignatureVerifier>,
}

impl SigningKeyHandler {
    pub fn new(verifier: Arc<SignatureVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl ReconcileHandler for SigningKeyHandler {
    async fn apply(&self, _desired: &DesiredState, diff: &StateDiff) -> Result<(), HandlerError> {
        if !diff.signing_keys_changed {
            return Ok(());
        }
        let Some(keys) = &diff.new_signing_keys else {
            return Ok(());
        };
        self.verifier
            .set_keys(&keys.current, keys.previous.as_deref(), keys.transition_expires)
            .map_err(|e| Box::new(e) as HandlerError)
    }
}

/// Stream handler: a `state_updated` envelope carries a full desired
/// state in its payload.
pub fn state_updated_handler(cache: Arc<StateCache>) -> EventHandler {
    Box::new(move |envelope| {
        let state: DesiredState = serde_json::from_slice(&envelope.payload)?;
        cache.update_metadata(state.metadata);
        cache.update_data(state.data);
        cache.update_secret_index(state.secret_refs);
        Ok(())
    })
}

/// Stream handler: `reconcile_requested` coalesces into the trigger
/// channel.
pub fn reconcile_requested_handler(reconciler: Arc<Reconciler>) -> EventHandler {
    Box::new(move |_envelope| {
        reconciler.trigger_reconcile();
        Ok(())
    })
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
