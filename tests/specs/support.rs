// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! In-process mock control plane plus a raw HTTP client for the agent's
//! Unix socket.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Path as AxPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{SubsecRound, Utc};
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use plexd_core::{DesiredState, SignedEnvelope};
use plexd_wire::{
    DriftReport, HeartbeatResponse, RegisterRequest, RegisterResponse, ReportSyncRequest,
    SecretResponse,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::broadcast;

/// 32 printable bytes so the node secret key doubles as an AES-256 key.
pub const NODE_SECRET_KEY: &str = "0123456789abcdef0123456789abcdef";
pub const NODE_ID: &str = "n1";
pub const MESH_IP: &str = "100.64.0.1";

pub struct MockPlane {
    pub signing: SigningKey,
    pub registrations: Mutex<Vec<RegisterRequest>>,
    pub heartbeats: AtomicUsize,
    pub drifts: Mutex<Vec<DriftReport>>,
    pub report_batches: Mutex<Vec<ReportSyncRequest>>,
    pub desired: Mutex<DesiredState>,
    pub secrets: Mutex<Vec<(String, SecretResponse)>>,
    pub events: broadcast::Sender<String>,
}

impl MockPlane {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            signing: SigningKey::from_bytes(&[11u8; 32]),
            registrations: Mutex::new(Vec::new()),
            heartbeats: AtomicUsize::new(0),
            drifts: Mutex::new(Vec::new()),
            report_batches: Mutex::new(Vec::new()),
            desired: Mutex::new(DesiredState::default()),
            secrets: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn signing_public_key_b64(&self) -> String {
        BASE64.encode(self.signing.verifying_key().to_bytes())
    }

    /// Sign an envelope with the plane's current stream key.
    pub fn sign_envelope(&self, event_type: &str, event_id: &str, payload: &[u8]) -> String {
        sign_envelope_with(&self.signing, event_type, event_id, payload)
    }

    /// Push one already-serialized envelope to every stream subscriber.
    pub fn push_event(&self, envelope_json: String) {
        let _ = self.events.send(envelope_json);
    }

    /// Serve `plaintext` as an AES-256-GCM secret under `key`.
    pub fn add_secret(&self, key: &str, plaintext: &[u8], version: u64) {
        let cipher = Aes256Gcm::new_from_slice(NODE_SECRET_KEY.as_bytes()).unwrap();
        let nonce = [3u8; 12];
        let ciphertext = cipher.encrypt(Nonce::from_slice(&nonce), plaintext).unwrap();
        self.secrets.lock().push((
            key.to_string(),
            SecretResponse {
                ciphertext: BASE64.encode(ciphertext),
                nonce: BASE64.encode(nonce),
                version,
            },
        ));
    }
}

pub fn sign_envelope_with(
    signing: &SigningKey,
    event_type: &str,
    event_id: &str,
    payload: &[u8],
) -> String {
    let mut envelope = SignedEnvelope {
        event_type: event_type.to_string(),
        event_id: event_id.to_string(),
        issued_at: Utc::now().trunc_subsecs(0),
        payload: payload.to_vec(),
        signature: String::new(),
    };
    envelope.signature = BASE64.encode(signing.sign(&envelope.signed_bytes()).to_bytes());
    serde_json::to_string(&envelope).unwrap()
}

/// Bind the mock plane on a loopback port; returns its base URL.
pub async fn spawn_plane(plane: Arc<MockPlane>) -> String {
    let app = Router::new()
        .route("/v1/register", post(register))
        .route("/v1/nodes/:id/state", get(fetch_state))
        .route("/v1/nodes/:id/heartbeat", post(heartbeat))
        .route("/v1/nodes/:id/drift", post(drift))
        .route("/v1/nodes/:id/reports", post(reports))
        .route("/v1/nodes/:id/secrets/:key", get(secret))
        .route("/v1/nodes/:id/events", get(events))
        .with_state(plane);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn register(
    State(plane): State<Arc<MockPlane>>,
    Json(req): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    let response = RegisterResponse {
        node_id: NODE_ID.to_string(),
        mesh_ip: MESH_IP.to_string(),
        signing_public_key: plane.signing_public_key_b64(),
        node_secret_key: NODE_SECRET_KEY.to_string(),
    };
    plane.registrations.lock().push(req);
    Json(response)
}

async fn fetch_state(State(plane): State<Arc<MockPlane>>) -> Json<DesiredState> {
    Json(plane.desired.lock().clone())
}

async fn heartbeat(State(plane): State<Arc<MockPlane>>) -> Json<HeartbeatResponse> {
    plane.heartbeats.fetch_add(1, Ordering::SeqCst);
    Json(HeartbeatResponse::default())
}

async fn drift(
    State(plane): State<Arc<MockPlane>>,
    Json(report): Json<DriftReport>,
) -> StatusCode {
    plane.drifts.lock().push(report);
    StatusCode::NO_CONTENT
}

async fn reports(
    State(plane): State<Arc<MockPlane>>,
    Json(req): Json<ReportSyncRequest>,
) -> StatusCode {
    plane.report_batches.lock().push(req);
    StatusCode::NO_CONTENT
}

async fn secret(
    State(plane): State<Arc<MockPlane>>,
    AxPath((_id, key)): AxPath<(String, String)>,
) -> axum::response::Response {
    let secrets = plane.secrets.lock();
    match secrets.iter().find(|(k, _)| *k == key) {
        Some((_, response)) => Json(response.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no such secret"})),
        )
            .into_response(),
    }
}

async fn events(State(plane): State<Arc<MockPlane>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let mut rx = plane.events.subscribe();
    ws.on_upgrade(move |mut socket| async move {
        while let Ok(envelope) = rx.recv().await {
            if socket.send(Message::Text(envelope)).await.is_err() {
                return;
            }
        }
    })
}

/// Minimal HTTP/1.1 client over the agent's Unix socket.
pub async fn uds_request(
    socket: &Path,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> (u16, String) {
    let mut stream = UnixStream::connect(socket).await.unwrap();

    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    match body {
        Some(body) => request.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )),
        None => request.push_str("\r\n"),
    }
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8_lossy(&raw).into_owned();

    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or_else(|| panic!("malformed response: {raw:?}"));
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
    (status, body)
}

/// Poll until `check` passes or a few seconds elapse.
pub async fn wait_for(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}
