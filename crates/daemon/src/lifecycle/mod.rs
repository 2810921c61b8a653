// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Daemon lifecycle: configuration, wiring, and the shutdown protocol.

mod handlers;
mod startup;

pub use handlers::{
    reconcile_requested_handler, state_updated_handler, CacheUpdateHandler, SigningKeyHandler,
    RECONCILE_REQUESTED, STATE_UPDATED,
};
pub use startup::run;

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use plexd_client::ClientError;
use plexd_storage::{CacheError, IdentityError};
use thiserror::Error;

use crate::api::ApiServerError;
use crate::env;
use crate::registrar::RegistrationError;
use crate::token::TokenSources;
use crate::verifier::VerifyError;

/// Daemon configuration. Defaults mirror the environment accessors in
/// [`crate::env`]; the CLI layer may construct this directly instead.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    pub control_plane_url: String,
    pub tcp_listen: Option<SocketAddr>,
    pub tcp_token_file: Option<PathBuf>,
    pub bootstrap: TokenSources,
    pub hostname_override: Option<String>,
    pub node_metadata: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
    pub heartbeat_interval: Duration,
    pub reconcile_interval: Duration,
    pub report_debounce: Duration,
    pub register_timeout: Duration,
    pub drain_timeout: Duration,
    pub api_shutdown_timeout: Duration,
    pub secrets_group: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Build a configuration from the environment.
    pub fn from_env() -> Result<Self, LifecycleError> {
        let control_plane_url = env::control_plane_url().ok_or_else(|| {
            LifecycleError::InvalidConfig("PLEXD_CONTROL_PLANE_URL is required".into())
        })?;
        Ok(Self {
            data_dir: env::data_dir(),
            socket_path: env::socket_path(),
            control_plane_url,
            tcp_listen: env::tcp_listen(),
            tcp_token_file: env::tcp_token_file(),
            bootstrap: TokenSources {
                value: None,
                file: Some(env::bootstrap_token_file()),
                env_var: Some(env::BOOTSTRAP_TOKEN_ENV.to_string()),
                use_metadata: false,
            },
            hostname_override: env::hostname_override(),
            node_metadata: BTreeMap::new(),
            capabilities: vec!["secrets".to_string(), "reports".to_string()],
            heartbeat_interval: env::heartbeat_interval(),
            reconcile_interval: env::reconcile_interval(),
            report_debounce: env::report_debounce(),
            register_timeout: env::register_timeout(),
            drain_timeout: env::drain_timeout(),
            api_shutdown_timeout: env::api_shutdown_timeout(),
            secrets_group: env::secrets_group(),
            log_file: env::log_file(),
        })
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.control_plane_url.is_empty() {
            return Err(LifecycleError::InvalidConfig("control plane URL is empty".into()));
        }
        if !self.control_plane_url.starts_with("http://")
            && !self.control_plane_url.starts_with("https://")
        {
            return Err(LifecycleError::InvalidConfig(
                "control plane URL must be http(s)".into(),
            ));
        }
        if self.reconcile_interval < Duration::from_secs(1) {
            return Err(LifecycleError::InvalidConfig(
                "reconcile interval must be at least 1s".into(),
            ));
        }
        if self.heartbeat_interval < Duration::from_secs(1) {
            return Err(LifecycleError::InvalidConfig(
                "heartbeat interval must be at least 1s".into(),
            ));
        }
        if self.socket_path.file_name().is_none() {
            return Err(LifecycleError::InvalidConfig("socket path has no file name".into()));
        }
        if self.tcp_listen.is_some() && self.tcp_token_file.is_none() {
            return Err(LifecycleError::InvalidConfig(
                "tcp listener requires a bearer token file".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to acquire lock: another plexd instance running?")]
    LockFailed(#[source] io::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("control plane client: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Api(#[from] ApiServerError),

    #[error("verifier: {0}")]
    Verifier(#[from] VerifyError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
