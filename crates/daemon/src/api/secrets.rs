// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Secret proxy: fetch ciphertext from the control plane, decrypt on-host.
//!
//! Every failure inside the decryption chain collapses to one generic 500
//! so the response cannot reveal which stage failed.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use plexd_client::{ClientError, ControlPlaneClient};
use plexd_wire::{SecretResponse, SecretValue};
use tracing::warn;

use super::routes::error_response;
use super::ApiCtx;

const GENERIC_FAILURE: &str = "secret unavailable";
const NONCE_LEN: usize = 12;

/// Control-plane surface for secret retrieval; lets tests swap the client.
#[async_trait]
pub trait SecretFetcher: Send + Sync {
    async fn fetch_secret(&self, node_id: &str, key: &str)
        -> Result<SecretResponse, ClientError>;
}

#[async_trait]
impl SecretFetcher for ControlPlaneClient {
    async fn fetch_secret(
        &self,
        node_id: &str,
        key: &str,
    ) -> Result<SecretResponse, ClientError> {
        ControlPlaneClient::fetch_secret(self, node_id, key).await
    }
}

/// Opaque decryption failure; carries no detail by design of the API.
#[derive(Debug)]
pub(crate) struct OpaqueFailure;

pub(crate) async fn secret_value(State(ctx): State<ApiCtx>, Path(key): Path<String>) -> Response {
    let fetched = match ctx.secrets.fetch_secret(&ctx.node_id, &key).await {
        Ok(fetched) => fetched,
        Err(ClientError::NotFound) => {
            return error_response(StatusCode::NOT_FOUND, "secret not found")
        }
        Err(e) => {
            warn!(key = %key, error = %e, "secret fetch failed");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "control plane unavailable");
        }
    };

    match decrypt_secret(&ctx.node_secret_key, &fetched.ciphertext, &fetched.nonce) {
        Ok(value) => (
            StatusCode::OK,
            Json(SecretValue { key, value, version: fetched.version }),
        )
            .into_response(),
        Err(OpaqueFailure) => {
            warn!(key = %key, "secret decryption failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE)
        }
    }
}

/// AES-256-GCM decryption with the node secret key. The key must be
/// exactly 32 bytes and the nonce exactly the AEAD's nonce size; both
/// inputs arrive base64-encoded.
pub(crate) fn decrypt_secret(
    key: &[u8],
    ciphertext_b64: &str,
    nonce_b64: &str,
) -> Result<String, OpaqueFailure> {
    if key.len() != 32 {
        return Err(OpaqueFailure);
    }
    let ciphertext = BASE64.decode(ciphertext_b64).map_err(|_| OpaqueFailure)?;
    let nonce = BASE64.decode(nonce_b64).map_err(|_| OpaqueFailure)?;
    if nonce.len() != NONCE_LEN {
        return Err(OpaqueFailure);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| OpaqueFailure)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| OpaqueFailure)?;
    String::from_utf8(plaintext).map_err(|_| OpaqueFailure)
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
