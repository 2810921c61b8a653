// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Bootstrap token resolution.
//!
//! Sources are consulted in a fixed priority order; the first non-empty
//! candidate wins. A candidate that fails validation aborts the whole
//! resolution rather than falling through, so a lower-priority source can
//! never shadow a malformed higher-priority token.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Upper bound on token length, in bytes.
pub const MAX_TOKEN_BYTES: usize = 512;

/// Where to look for the bootstrap token, in priority order: direct value,
/// file, environment variable, then the optional metadata service.
#[derive(Debug, Clone, Default)]
pub struct TokenSources {
    pub value: Option<String>,
    pub file: Option<PathBuf>,
    pub env_var: Option<String>,
    pub use_metadata: bool,
}

/// Cloud metadata service hook; injected by the integrator when the
/// deployment provides one.
#[async_trait]
pub trait MetadataTokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<Option<String>, TokenError>;
}

/// A resolved token. `file_path` is set only when the token came from a
/// file, so the registrar can delete it after a successful registration.
#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub value: String,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no bootstrap token found in any configured source")]
    NotFound,

    #[error("failed to read token file {path}: {source}")]
    File { path: PathBuf, source: io::Error },

    #[error("bootstrap token exceeds {MAX_TOKEN_BYTES} bytes")]
    TooLong,

    #[error("bootstrap token contains bytes outside printable ASCII")]
    NotPrintable,

    #[error("metadata token provider failed: {0}")]
    Metadata(String),
}

/// Resolve the bootstrap token from the configured sources.
pub async fn resolve_token(
    sources: &TokenSources,
    metadata: Option<&dyn MetadataTokenProvider>,
) -> Result<ResolvedToken, TokenError> {
    if let Some(value) = &sources.value {
        let value = value.trim();
        if !value.is_empty() {
            validate_token(value)?;
            return Ok(ResolvedToken { value: value.to_string(), file_path: None });
        }
    }

    if let Some(path) = &sources.file {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let value = contents.trim();
                if !value.is_empty() {
                    validate_token(value)?;
                    return Ok(ResolvedToken {
                        value: value.to_string(),
                        file_path: Some(path.clone()),
                    });
                }
            }
            // A missing file just means this source is not in use.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(TokenError::File { path: path.clone(), source }),
        }
    }

    if let Some(name) = &sources.env_var {
        if let Ok(raw) = std::env::var(name) {
            let value = raw.trim();
            if !value.is_empty() {
                validate_token(value)?;
                return Ok(ResolvedToken { value: value.to_string(), file_path: None });
            }
        }
    }

    if sources.use_metadata {
        if let Some(provider) = metadata {
            if let Some(raw) = provider.fetch_token().await? {
                let value = raw.trim();
                if !value.is_empty() {
                    validate_token(value)?;
                    return Ok(ResolvedToken { value: value.to_string(), file_path: None });
                }
            }
        }
    }

    Err(TokenError::NotFound)
}

/// Tokens must be printable ASCII and at most [`MAX_TOKEN_BYTES`] long.
fn validate_token(token: &str) -> Result<(), TokenError> {
    if token.len() > MAX_TOKEN_BYTES {
        return Err(TokenError::TooLong);
    }
    if !token.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        return Err(TokenError::NotPrintable);
    }
    Ok(())
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
