// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! plexd-client: typed HTTP client for the control plane.
//!
//! Holds a swappable bearer token so re-registration can race safely with
//! in-flight requests from other tasks. The client performs no retrying of
//! its own; callers act on [`ErrorClass`].

pub mod backoff;
pub mod error;
pub mod stream;

pub use backoff::Backoff;
pub use error::{ClientError, ErrorClass};
pub use stream::{open_event_stream, EventStream, StreamError};

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use plexd_core::DesiredState;
use plexd_wire::{
    DriftReport, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    ReportSyncRequest, SecretResponse,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("plexd/", env!("CARGO_PKG_VERSION"));

/// Typed control-plane client. All operations attach the current bearer
/// token; during bootstrap that token is the registration token, afterwards
/// the node secret key.
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Mutex<Option<String>>,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url, auth_token: Mutex::new(None) })
    }

    /// Swap the bearer token. In-flight requests keep whichever token they
    /// read; a 401 on the old token simply triggers another swap.
    pub fn set_auth_token(&self, token: impl Into<String>) {
        *self.auth_token.lock() = Some(token.into());
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.lock().clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket endpoint for the signed event stream.
    pub fn events_url(&self, node_id: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/v1/nodes/{node_id}/events")
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        self.request(Method::POST, "/v1/register", Some(req)).await
    }

    pub async fn deregister(&self, node_id: &str) -> Result<(), ClientError> {
        self.request_no_body(Method::POST, &format!("/v1/nodes/{node_id}/deregister")).await
    }

    pub async fn fetch_state(&self, node_id: &str) -> Result<DesiredState, ClientError> {
        self.request::<(), _>(Method::GET, &format!("/v1/nodes/{node_id}/state"), None).await
    }

    pub async fn report_drift(
        &self,
        node_id: &str,
        report: &DriftReport,
    ) -> Result<(), ClientError> {
        self.request_unit(Method::POST, &format!("/v1/nodes/{node_id}/drift"), Some(report)).await
    }

    pub async fn heartbeat(
        &self,
        node_id: &str,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ClientError> {
        self.request(Method::POST, &format!("/v1/nodes/{node_id}/heartbeat"), Some(req)).await
    }

    pub async fn fetch_secret(
        &self,
        node_id: &str,
        key: &str,
    ) -> Result<SecretResponse, ClientError> {
        self.request::<(), _>(Method::GET, &format!("/v1/nodes/{node_id}/secrets/{key}"), None)
            .await
    }

    pub async fn sync_reports(
        &self,
        node_id: &str,
        req: &ReportSyncRequest,
    ) -> Result<(), ClientError> {
        self.request_unit(Method::POST, &format!("/v1/nodes/{node_id}/reports"), Some(req)).await
    }

    async fn request<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let resp = self.send(method, path, body).await?;
        Ok(resp.json().await?)
    }

    async fn request_unit<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), ClientError> {
        self.send(method, path, body).await?;
        Ok(())
    }

    async fn request_no_body(&self, method: Method, path: &str) -> Result<(), ClientError> {
        self.request_unit::<()>(method, path, None).await
    }

    /// Issue the request and map non-success statuses through the error
    /// classification. Success responses are returned for body decoding.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = self.auth_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let retry_after = parse_retry_after(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        Err(ClientError::from_status(status.as_u16(), retry_after, &body))
    }
}

/// Parse `Retry-After`: either delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at: DateTime<Utc> = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
