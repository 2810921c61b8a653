// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Ed25519 envelope verification with a key-transition window.
//!
//! The verifier holds the current key plus, during a rotation, the
//! previous one; the previous key stops being accepted at
//! `transition_expires`. Key swaps are atomic with respect to
//! verification: both go through one mutex.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use parking_lot::Mutex;
use plexd_core::{Clock, SignedEnvelope, SystemClock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("current signing key must not be empty")]
    EmptyCurrent,

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("signature is not valid base64")]
    BadSignatureEncoding,

    #[error("signature rejected")]
    Rejected,
}

struct KeySet {
    current: VerifyingKey,
    previous: Option<VerifyingKey>,
    transition_expires: Option<DateTime<Utc>>,
}

/// Accepts or rejects signed envelopes.
pub struct SignatureVerifier<C: Clock = SystemClock> {
    keys: Mutex<KeySet>,
    clock: C,
}

impl SignatureVerifier<SystemClock> {
    /// Initialize from the identity's base64 signing key.
    pub fn new(current_b64: &str) -> Result<Self, VerifyError> {
        Self::with_clock(current_b64, SystemClock)
    }
}

impl<C: Clock> SignatureVerifier<C> {
    pub fn with_clock(current_b64: &str, clock: C) -> Result<Self, VerifyError> {
        let current = decode_key(current_b64)?;
        Ok(Self {
            keys: Mutex::new(KeySet { current, previous: None, transition_expires: None }),
            clock,
        })
    }

    /// Atomically replace the key set. An empty current key is rejected:
    /// there must always be an accepting key.
    pub fn set_keys(
        &self,
        current_b64: &str,
        previous_b64: Option<&str>,
        transition_expires: Option<DateTime<Utc>>,
    ) -> Result<(), VerifyError> {
        if current_b64.is_empty() {
            return Err(VerifyError::EmptyCurrent);
        }
        let current = decode_key(current_b64)?;
        let previous = match previous_b64.filter(|p| !p.is_empty()) {
            Some(p) => Some(decode_key(p)?),
            None => None,
        };

        let mut keys = self.keys.lock();
        *keys = KeySet { current, previous, transition_expires };
        Ok(())
    }

    /// Verify an envelope against the current key, falling back to the
    /// previous key while the transition window is open.
    pub fn verify(&self, envelope: &SignedEnvelope) -> Result<(), VerifyError> {
        let sig_bytes = BASE64
            .decode(envelope.signature.as_bytes())
            .map_err(|_| VerifyError::BadSignatureEncoding)?;
        let sig_bytes: [u8; 64] =
            sig_bytes.try_into().map_err(|_| VerifyError::BadSignatureEncoding)?;
        let signature = Signature::from_bytes(&sig_bytes);
        let message = envelope.signed_bytes();

        let keys = self.keys.lock();
        if keys.current.verify(&message, &signature).is_ok() {
            return Ok(());
        }
        if let (Some(previous), Some(expires)) = (&keys.previous, keys.transition_expires) {
            if self.clock.now_utc() < expires && previous.verify(&message, &signature).is_ok() {
                return Ok(());
            }
        }
        Err(VerifyError::Rejected)
    }
}

fn decode_key(b64: &str) -> Result<VerifyingKey, VerifyError> {
    let bytes = BASE64
        .decode(b64.trim().as_bytes())
        .map_err(|e| VerifyError::InvalidKey(format!("not base64: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| VerifyError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| VerifyError::InvalidKey(e.to_string()))
}

#[cfg(test)]
#[path = "verifier_tests.rs"]
mod tests;
