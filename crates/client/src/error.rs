// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Control-plane error classification.
//!
//! The client never retries; callers pick a policy from the class. The
//! mapping follows the control plane's contract: 401 means the bearer
//! token is no longer honored, 429/503+Retry-After carry an explicit wait,
//! remaining 4xx are permanent, everything else is worth a backoff.

use std::time::Duration;

use thiserror::Error;

/// What a caller should do about a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: retry with exponential backoff.
    RetryBackoff,
    /// The server supplied the wait; honor it verbatim.
    RespectServer,
    /// Bearer token rejected; re-register before retrying.
    RetryAuth,
    /// Permanent; surface to the caller.
    Permanent,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("control plane error: HTTP {status}")]
    Server { status: u16 },

    #[error("control plane asked to retry after {retry_after:?} (HTTP {status})")]
    RespectServer { status: u16, retry_after: Duration },

    #[error("control plane rejected credentials (HTTP 401)")]
    Auth,

    #[error("resource not found")]
    NotFound,

    #[error("permanent failure: HTTP {status}: {message}")]
    Permanent { status: u16, message: String },
}

impl ClientError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Network(_) | ClientError::Server { .. } => ErrorClass::RetryBackoff,
            ClientError::RespectServer { .. } => ErrorClass::RespectServer,
            ClientError::Auth => ErrorClass::RetryAuth,
            ClientError::NotFound | ClientError::Permanent { .. } => ErrorClass::Permanent,
        }
    }

    /// Map a non-success response to an error. `retry_after` is the parsed
    /// `Retry-After` header, when present.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        match status {
            401 => ClientError::Auth,
            404 => ClientError::NotFound,
            429 => ClientError::RespectServer {
                status,
                retry_after: retry_after.unwrap_or(Duration::from_secs(1)),
            },
            503 => match retry_after {
                Some(retry_after) => ClientError::RespectServer { status, retry_after },
                None => ClientError::Server { status },
            },
            s if s >= 500 => ClientError::Server { status },
            s => ClientError::Permanent { status: s, message: error_message(body) },
        }
    }
}

/// Pull the message out of an `{"error": "..."}` body, else use the raw
/// text (truncated) so operators see what the server actually said.
fn error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<plexd_wire::ErrorBody>(body) {
        return parsed.error;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "unspecified error".to_string();
    }
    trimmed.chars().take(200).collect()
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
