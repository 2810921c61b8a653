// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Node identity issued by the control plane at registration.
//!
//! The JSON form of the record carries only the public fields; the private
//! key and node secret key live in standalone files next to `identity.json`
//! and are attached after load. Neither secret ever appears in serialized
//! output or `Debug` formatting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of this node within the fleet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Opaque identifier assigned by the control plane.
    pub node_id: String,
    /// Mesh address assigned by the control plane.
    pub mesh_ip: String,
    /// Base64 Ed25519 public key the control plane signs events with.
    pub signing_public_key: String,
    /// When this node registered.
    pub registered_at: DateTime<Utc>,
    /// 32-byte Curve25519 private key generated at registration.
    #[serde(skip)]
    pub private_key: Vec<u8>,
    /// Bearer secret issued by the control plane; doubles as the
    /// AES-256-GCM key for secret decryption when exactly 32 bytes.
    #[serde(skip)]
    pub node_secret_key: String,
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("node_id", &self.node_id)
            .field("mesh_ip", &self.mesh_ip)
            .field("signing_public_key", &self.signing_public_key)
            .field("registered_at", &self.registered_at)
            .field("private_key", &"<redacted>")
            .field("node_secret_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
