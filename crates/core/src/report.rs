// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Locally-authored reports, the one write-side data category.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A report written by a co-located workload through the local API,
/// persisted by the agent and pushed outward to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub key: String,
    pub content_type: String,
    pub payload: serde_json::Value,
    /// Starts at 1, incremented by 1 per successful update.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Rejected report key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportKeyError {
    #[error("report key must not be empty")]
    Empty,
    #[error("report key {0:?} is reserved")]
    Reserved(String),
    #[error("report key {0:?} contains a path separator")]
    PathSeparator(String),
}

/// Validate a report key before it is used as a file name component.
///
/// Keys must be non-empty, not `.` or `..`, and contain neither `/` nor `\`.
pub fn validate_report_key(key: &str) -> Result<(), ReportKeyError> {
    if key.is_empty() {
        return Err(ReportKeyError::Empty);
    }
    if key == "." || key == ".." {
        return Err(ReportKeyError::Reserved(key.to_string()));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(ReportKeyError::PathSeparator(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
