// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Registration and identity lifecycle.
//!
//! First boot: resolve a bootstrap token, generate a Curve25519 keypair,
//! register with bounded retry, persist the issued identity, and swap the
//! client's bearer token to the node secret key. Subsequent boots load the
//! identity from disk without touching the network. A 401 anywhere later
//! drives re-registration through [`AuthRecovery`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use plexd_client::{Backoff, ClientError, ControlPlaneClient, ErrorClass};
use plexd_core::NodeIdentity;
use plexd_storage::{IdentityError, IdentityStore};
use plexd_wire::{RegisterRequest, RegisterResponse};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::token::{resolve_token, MetadataTokenProvider, TokenError, TokenSources};

/// Control-plane surface the registrar needs; lets tests swap the client.
#[async_trait]
pub trait RegistrationApi: Send + Sync {
    fn set_auth_token(&self, token: String);
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError>;
    async fn deregister(&self, node_id: &str) -> Result<(), ClientError>;
}

#[async_trait]
impl RegistrationApi for ControlPlaneClient {
    fn set_auth_token(&self, token: String) {
        ControlPlaneClient::set_auth_token(self, token);
    }

    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        ControlPlaneClient::register(self, req).await
    }

    async fn deregister(&self, node_id: &str) -> Result<(), ClientError> {
        ControlPlaneClient::deregister(self, node_id).await
    }
}

/// Invoked when the control plane stops honoring the bearer token.
/// The lifecycle wires this to a re-registration attempt.
#[async_trait]
pub trait AuthRecovery: Send + Sync {
    async fn recover_auth(&self);
}

#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    pub token_sources: TokenSources,
    pub hostname_override: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
    /// Registration retry budget; the loop aborts once this much wall
    /// time has passed.
    pub max_retry_duration: Duration,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            token_sources: TokenSources::default(),
            hostname_override: None,
            metadata: BTreeMap::new(),
            capabilities: Vec::new(),
            max_retry_duration: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("registration rejected by control plane: {0}")]
    Rejected(ClientError),

    #[error("control plane returned an incomplete identity: missing {0}")]
    IncompleteResponse(&'static str),

    #[error("registration deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("registration cancelled")]
    Cancelled,
}

pub struct Registrar {
    store: IdentityStore,
    api: Arc<dyn RegistrationApi>,
    config: RegistrarConfig,
    metadata_provider: Option<Arc<dyn MetadataTokenProvider>>,
}

impl Registrar {
    pub fn new(store: IdentityStore, api: Arc<dyn RegistrationApi>, config: RegistrarConfig) -> Self {
        Self { store, api, config, metadata_provider: None }
    }

    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataTokenProvider>) -> Self {
        self.metadata_provider = Some(provider);
        self
    }

    /// Whether a complete identity exists on disk.
    pub fn is_registered(&self) -> bool {
        self.store.is_registered()
    }

    /// Load the persisted identity, or register for the first time. Either
    /// way the client's bearer token is the node secret key on return.
    pub async fn register(
        &self,
        cancel: &CancellationToken,
    ) -> Result<NodeIdentity, RegistrationError> {
        match self.store.load() {
            Ok(identity) => {
                info!(node_id = %identity.node_id, "loaded existing identity");
                self.api.set_auth_token(identity.node_secret_key.clone());
                return Ok(identity);
            }
            Err(IdentityError::NotRegistered) => {}
            Err(e) => return Err(e.into()),
        }
        self.register_fresh(cancel).await
    }

    /// Drop the stored identity and run a fresh registration. Used when the
    /// control plane rejects the node secret key.
    pub async fn reregister(
        &self,
        cancel: &CancellationToken,
    ) -> Result<NodeIdentity, RegistrationError> {
        warn!("discarding stored identity for re-registration");
        self.store.remove()?;
        self.register_fresh(cancel).await
    }

    /// Deregister with the control plane and remove the identity files.
    pub async fn deregister(&self) -> Result<(), RegistrationError> {
        let identity = self.store.load()?;
        self.api
            .deregister(&identity.node_id)
            .await
            .map_err(RegistrationError::Rejected)?;
        self.store.remove()?;
        info!(node_id = %identity.node_id, "node deregistered");
        Ok(())
    }

    async fn register_fresh(
        &self,
        cancel: &CancellationToken,
    ) -> Result<NodeIdentity, RegistrationError> {
        let token =
            resolve_token(&self.config.token_sources, self.metadata_provider.as_deref()).await?;
        let (private_key, public_key) = generate_keypair();
        let hostname = self.hostname();

        self.api.set_auth_token(token.value.clone());
        let request = RegisterRequest {
            token: token.value.clone(),
            public_key,
            hostname,
            metadata: self.config.metadata.clone(),
            capabilities: self.config.capabilities.clone(),
        };

        let response = self.register_with_retry(&request, cancel).await?;
        if response.node_id.is_empty() {
            return Err(RegistrationError::IncompleteResponse("node_id"));
        }
        if response.mesh_ip.is_empty() {
            return Err(RegistrationError::IncompleteResponse("mesh_ip"));
        }

        let identity = NodeIdentity {
            node_id: response.node_id,
            mesh_ip: response.mesh_ip,
            signing_public_key: response.signing_public_key,
            registered_at: Utc::now(),
            private_key,
            node_secret_key: response.node_secret_key,
        };
        self.store.save(&identity)?;

        // The bootstrap token is single-use; drop the file now that the
        // durable identity exists. Failure here is not worth dying over.
        if let Some(path) = token.file_path {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to delete bootstrap token file");
            }
        }

        self.api.set_auth_token(identity.node_secret_key.clone());
        info!(node_id = %identity.node_id, mesh_ip = %identity.mesh_ip, "node registered");
        Ok(identity)
    }

    async fn register_with_retry(
        &self,
        request: &RegisterRequest,
        cancel: &CancellationToken,
    ) -> Result<RegisterResponse, RegistrationError> {
        let started = Instant::now();
        let mut backoff = Backoff::new();

        loop {
            if cancel.is_cancelled() {
                return Err(RegistrationError::Cancelled);
            }
            let err = match self.api.register(request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            match err.class() {
                ErrorClass::RetryAuth | ErrorClass::Permanent => {
                    return Err(RegistrationError::Rejected(err));
                }
                ErrorClass::RetryBackoff | ErrorClass::RespectServer => {
                    if started.elapsed() >= self.config.max_retry_duration {
                        return Err(RegistrationError::DeadlineExceeded(
                            self.config.max_retry_duration,
                        ));
                    }
                    let delay = backoff.delay_for(&err);
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "registration failed; retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RegistrationError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn hostname(&self) -> String {
        self.config.hostname_override.clone().unwrap_or_else(os_hostname)
    }
}

/// Generate a Curve25519 keypair with the private scalar clamped before it
/// is stored: clear the low three bits of byte 0, clear the top bit and
/// set bit 6 of byte 31.
fn generate_keypair() -> (Vec<u8>, String) {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0xf8;
    bytes[31] &= 0x7f;
    bytes[31] |= 0x40;

    let secret = StaticSecret::from(bytes);
    let public = PublicKey::from(&secret);
    (bytes.to_vec(), BASE64.encode(public.as_bytes()))
}

#[cfg(unix)]
fn os_hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(not(unix))]
fn os_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
#[path = "registrar_tests.rs"]
mod tests;
