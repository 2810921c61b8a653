// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! JSON surface of the local node API.

use plexd_core::KeyVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET /v1/state` — metadata plus per-category key/version listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSummary {
    pub metadata: BTreeMap<String, String>,
    pub data: Vec<KeyVersion>,
    pub secrets: Vec<KeyVersion>,
    pub reports: Vec<KeyVersion>,
}

/// `GET /v1/state/metadata/{key}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataValue {
    pub key: String,
    pub value: String,
}

/// `GET /v1/state/secrets/{key}` — decrypted value, never the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretValue {
    pub key: String,
    pub value: String,
    pub version: u64,
}

/// `PUT /v1/state/report/{key}` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutReportBody {
    pub content_type: String,
    pub payload: serde_json::Value,
}

/// Error responses: `{"error": "<message>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
