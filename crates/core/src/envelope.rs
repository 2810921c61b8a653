// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Signed envelopes pushed by the control plane over the event stream.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Reserved event type: signing-key rotation, handled by the stream
/// manager itself rather than a registered handler.
pub const SIGNING_KEY_ROTATED: &str = "signing_key_rotated";

/// A server-pushed event with an Ed25519 signature over its canonical bytes.
///
/// The payload travels base64-encoded on the wire and is held decoded in
/// memory; it is the event's inner JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub event_type: String,
    /// Opaque, stream-ordered identifier; resent as the resume hint.
    pub event_id: String,
    pub issued_at: DateTime<Utc>,
    #[serde(with = "b64_bytes")]
    pub payload: Vec<u8>,
    /// Base64 Ed25519 signature over [`SignedEnvelope::signed_bytes`].
    pub signature: String,
}

impl SignedEnvelope {
    /// Canonical byte string the signature covers:
    /// `event_type \n event_id \n issued_at \n payload`, where `issued_at`
    /// is RFC 3339 at whole-second precision in UTC (`Z` suffix). Issuers
    /// truncate sub-second precision before signing.
    pub fn signed_bytes(&self) -> Vec<u8> {
        let stamp = self.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut out = Vec::with_capacity(
            self.event_type.len() + self.event_id.len() + stamp.len() + self.payload.len() + 3,
        );
        out.extend_from_slice(self.event_type.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(self.event_id.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(stamp.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Base64 (standard alphabet, padded) encoding for opaque payload bytes.
mod b64_bytes {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        BASE64.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
