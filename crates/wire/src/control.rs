// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Bodies exchanged with the control plane.

use chrono::{DateTime, Utc};
use plexd_core::ReportEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `POST /v1/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Single-use bootstrap token.
    pub token: String,
    /// Base64 Curve25519 public key generated on the node.
    pub public_key: String,
    pub hostname: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub node_id: String,
    pub mesh_ip: String,
    /// Base64 Ed25519 key the verifier starts from.
    pub signing_public_key: String,
    /// Durable bearer secret; replaces the bootstrap token.
    pub node_secret_key: String,
}

/// `POST /v1/nodes/{id}/heartbeat`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub health: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    /// SHA-256 of the running agent binary, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_checksum: Option<String>,
}

/// Directive flags piggybacked on the heartbeat response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub reconcile: bool,
    #[serde(default)]
    pub rotate_keys: bool,
}

/// `POST /v1/nodes/{id}/drift` — best-effort summary of the corrections a
/// reconcile cycle is about to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub observed_at: DateTime<Utc>,
    pub corrections: Vec<String>,
}

/// `POST /v1/nodes/{id}/reports`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSyncRequest {
    #[serde(default)]
    pub entries: Vec<ReportEntry>,
    #[serde(default)]
    pub deleted: Vec<String>,
}

/// `GET /v1/nodes/{id}/secrets/{key}` — ciphertext and nonce are base64;
/// decryption happens on the node with the node secret key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretResponse {
    pub ciphertext: String,
    pub nonce: String,
    pub version: u64,
}
