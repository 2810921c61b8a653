// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Centralized environment variable access for the daemon.
//!
//! Structured configuration arrives from the CLI layer; these accessors
//! cover the knobs operators set directly on the unit file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Agent version reported in heartbeats.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data directory: `PLEXD_DATA_DIR`, default `/var/lib/plexd`.
pub fn data_dir() -> PathBuf {
    std::env::var("PLEXD_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/plexd"))
}

/// Local API socket: `PLEXD_SOCKET_PATH`, default `/var/run/plexd/api.sock`.
pub fn socket_path() -> PathBuf {
    std::env::var("PLEXD_SOCKET_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/plexd/api.sock"))
}

/// Control plane base URL: `PLEXD_CONTROL_PLANE_URL`. Required.
pub fn control_plane_url() -> Option<String> {
    std::env::var("PLEXD_CONTROL_PLANE_URL").ok().filter(|s| !s.is_empty())
}

/// Optional TCP listener for the local API. When set, `PLEXD_TCP_TOKEN_FILE`
/// must point at the expected bearer token.
pub fn tcp_listen() -> Option<SocketAddr> {
    std::env::var("PLEXD_TCP_LISTEN").ok().and_then(|s| s.parse().ok())
}

pub fn tcp_token_file() -> Option<PathBuf> {
    std::env::var("PLEXD_TCP_TOKEN_FILE").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

/// Bootstrap token file: `PLEXD_BOOTSTRAP_TOKEN_FILE`,
/// default `/etc/plexd/bootstrap-token`.
pub fn bootstrap_token_file() -> PathBuf {
    std::env::var("PLEXD_BOOTSTRAP_TOKEN_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/plexd/bootstrap-token"))
}

/// Environment variable consulted as the third bootstrap token source.
pub const BOOTSTRAP_TOKEN_ENV: &str = "PLEXD_BOOTSTRAP_TOKEN";

pub fn hostname_override() -> Option<String> {
    std::env::var("PLEXD_HOSTNAME").ok().filter(|s| !s.is_empty())
}

pub fn heartbeat_interval() -> Duration {
    secs("PLEXD_HEARTBEAT_INTERVAL_SECS", 30)
}

pub fn reconcile_interval() -> Duration {
    secs("PLEXD_RECONCILE_INTERVAL_SECS", 60)
}

pub fn report_debounce() -> Duration {
    secs("PLEXD_REPORT_DEBOUNCE_SECS", 5)
}

/// Registration retry budget (default 5 minutes).
pub fn register_timeout() -> Duration {
    secs("PLEXD_REGISTER_TIMEOUT_SECS", 300)
}

/// Shutdown drain window (default 30s).
pub fn drain_timeout() -> Duration {
    secs("PLEXD_DRAIN_TIMEOUT_SECS", 30)
}

/// Bounded timeout for the local API's shutdown (default 5s).
pub fn api_shutdown_timeout() -> Duration {
    secs("PLEXD_API_SHUTDOWN_TIMEOUT_SECS", 5)
}

/// Admin group admitted by the secret-access gate. `PLEXD_SECRETS_GROUP`
/// overrides the name; `PLEXD_DISABLE_SECRETS_GATE=1` turns the gate off.
pub fn secrets_group() -> Option<String> {
    if std::env::var("PLEXD_DISABLE_SECRETS_GATE").is_ok_and(|v| v == "1" || v == "true") {
        return None;
    }
    Some(std::env::var("PLEXD_SECRETS_GROUP").unwrap_or_else(|_| "plexd-secrets".to_string()))
}

/// Optional log file; stderr when unset.
pub fn log_file() -> Option<PathBuf> {
    std::env::var("PLEXD_LOG_FILE").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

fn secs(var: &str, default: u64) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default))
}
