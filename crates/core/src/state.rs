// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Desired state as fetched from the control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete desired state for one node. Both delivery paths (event stream
/// and reconcile fetch) carry this shape; the cache replaces whole
/// categories at a time, so re-applying a state is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub data: Vec<DataEntry>,
    #[serde(default)]
    pub secret_refs: Vec<SecretRef>,
    #[serde(default)]
    pub peers: Vec<PeerSpec>,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
    /// Absent means "no change"; never a rotation to empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_keys: Option<SigningKeySet>,
}

/// One configuration document delivered to the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    pub key: String,
    pub content_type: String,
    pub payload: serde_json::Value,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Reference to a secret the node may fetch; the ciphertext is never
/// delivered in state responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub key: String,
    pub version: u64,
}

/// Mesh peer description. Opaque to the agent core except for the fields
/// the diff engine compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSpec {
    pub id: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

/// Policy document, passed through to registered handlers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub id: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Current/previous signing keys with the transition deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeySet {
    pub current: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_expires: Option<DateTime<Utc>>,
}

/// Key plus version, used in index listings and state summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
    pub key: String,
    pub version: u64,
}
