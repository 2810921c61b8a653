// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Scenario: cold start from an empty data directory, then warm start.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use plexd_client::ControlPlaneClient;
use plexd_core::NodeIdentity;
use plexd_daemon::api::{ApiCtx, LocalApiConfig, LocalApiServer};
use plexd_daemon::events::EventStreamManager;
use plexd_daemon::heartbeat::HeartbeatService;
use plexd_daemon::lifecycle::{state_updated_handler, CacheUpdateHandler, STATE_UPDATED};
use plexd_daemon::reconciler::Reconciler;
use plexd_daemon::registrar::{AuthRecovery, Registrar, RegistrarConfig};
use plexd_daemon::syncer::ReportSyncer;
use plexd_daemon::token::TokenSources;
use plexd_daemon::verifier::SignatureVerifier;
use plexd_storage::{IdentityStore, StateCache};
use plexd_wire::HeartbeatRequest;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use super::support::{
    spawn_plane, uds_request, wait_for, MockPlane, MESH_IP, NODE_ID, NODE_SECRET_KEY,
};

pub(crate) struct NoRecovery;

#[async_trait]
impl AuthRecovery for NoRecovery {
    async fn recover_auth(&self) {}
}

#[tokio::test]
async fn cold_start_brings_every_subsystem_to_first_success() {
    let plane = MockPlane::new();
    plane.desired.lock().metadata.insert("region".into(), "eu".into());
    let base = spawn_plane(Arc::clone(&plane)).await;

    let data_dir = tempdir().unwrap();
    let token_file = data_dir.path().join("bootstrap-token");
    std::fs::write(&token_file, "boot-token-123\n").unwrap();

    let client = Arc::new(ControlPlaneClient::new(&base).unwrap());
    let registrar = Arc::new(Registrar::new(
        IdentityStore::new(data_dir.path()),
        Arc::clone(&client) as _,
        RegistrarConfig {
            token_sources: TokenSources { file: Some(token_file.clone()), ..Default::default() },
            hostname_override: Some("web-1".into()),
            ..Default::default()
        },
    ));
    let cancel = CancellationToken::new();

    // Registration: identity issued and persisted, bootstrap token burned,
    // bearer swapped to the node secret key.
    let identity = registrar.register(&cancel).await.unwrap();
    assert_eq!(identity.node_id, NODE_ID);
    assert_eq!(identity.mesh_ip, MESH_IP);
    assert_eq!(identity.node_secret_key, NODE_SECRET_KEY);
    assert!(!token_file.exists(), "bootstrap token file should be deleted");
    assert_eq!(client.auth_token().as_deref(), Some(NODE_SECRET_KEY));
    {
        let registrations = plane.registrations.lock();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].token, "boot-token-123");
        assert_eq!(registrations[0].hostname, "web-1");
        assert_eq!(BASE64.decode(&registrations[0].public_key).unwrap().len(), 32);
    }
    assert!(IdentityStore::new(data_dir.path()).is_registered());

    // Wire the rest of the agent the way the integrator does.
    let verifier = Arc::new(SignatureVerifier::new(&identity.signing_public_key).unwrap());
    let cache = Arc::new(StateCache::load(data_dir.path()).unwrap());
    let syncer = Arc::new(ReportSyncer::new(
        Arc::clone(&client) as _,
        NODE_ID,
        Duration::from_millis(100),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&client) as _,
        Some(Arc::clone(&client) as _),
        Duration::from_secs(1),
    ));
    reconciler.register_handler(Arc::new(CacheUpdateHandler::new(Arc::clone(&cache))));

    let heartbeat = Arc::new(HeartbeatService::new(
        Arc::clone(&client) as _,
        NODE_ID,
        Duration::from_secs(1),
        Box::new(|| HeartbeatRequest { health: "ok".into(), ..Default::default() }),
        Arc::new(|| {}),
        Arc::new(|| {}),
        Arc::new(NoRecovery),
    ));

    let events = Arc::new(EventStreamManager::new(
        Arc::clone(&client),
        Arc::clone(&verifier),
        Arc::new(NoRecovery),
    ));
    events.register_handler(STATE_UPDATED, state_updated_handler(Arc::clone(&cache)));

    let socket_path = data_dir.path().join("api.sock");
    let api = LocalApiServer::bind(LocalApiConfig {
        socket_path: socket_path.clone(),
        tcp_listen: None,
        tcp_token_file: None,
        shutdown_timeout: Duration::from_secs(5),
    })
    .await
    .unwrap();
    let api_ctx = ApiCtx {
        cache: Arc::clone(&cache),
        secrets: Arc::clone(&client) as _,
        syncer: Arc::clone(&syncer),
        node_id: NODE_ID.into(),
        node_secret_key: Arc::new(NODE_SECRET_KEY.as_bytes().to_vec()),
        secrets_group: None,
    };

    tokio::spawn({
        let reconciler = Arc::clone(&reconciler);
        let cancel = cancel.clone();
        async move { reconciler.run(cancel, NODE_ID).await.unwrap() }
    });
    tokio::spawn({
        let heartbeat = Arc::clone(&heartbeat);
        let cancel = cancel.clone();
        async move { heartbeat.run(cancel).await }
    });
    tokio::spawn({
        let events = Arc::clone(&events);
        let cancel = cancel.clone();
        async move { events.run(cancel, NODE_ID).await }
    });
    tokio::spawn({
        let cancel = cancel.clone();
        async move { api.run(api_ctx, cancel).await }
    });

    // Reconciler: first fetch mirrors metadata into the cache and reports
    // the drift.
    wait_for("first reconcile to land", || cache.metadata_value("region").is_some()).await;
    assert!(!plane.drifts.lock().is_empty(), "non-empty diff should produce a drift report");

    // Heartbeat: first ping is immediate.
    wait_for("first heartbeat", || plane.heartbeats.load(Ordering::SeqCst) >= 1).await;

    // Event stream: a pushed envelope lands in the same cache.
    wait_for("stream subscription", || plane.events.receiver_count() >= 1).await;
    let mut pushed = plane.desired.lock().clone();
    pushed.metadata.insert("pushed".into(), "yes".into());
    let payload = serde_json::to_vec(&pushed).unwrap();
    plane.push_event(plane.sign_envelope(STATE_UPDATED, "evt-1", &payload));
    wait_for("stream push to land", || cache.metadata_value("pushed").is_some()).await;

    // Local API: first successful request over the Unix socket.
    let (status, body) = uds_request(&socket_path, "GET", "/v1/state", &[], None).await;
    assert_eq!(status, 200);
    assert!(body.contains("region"), "summary should carry metadata: {body}");

    cancel.cancel();
}

#[tokio::test]
async fn warm_start_loads_identity_without_registering() {
    let plane = MockPlane::new();
    let base = spawn_plane(Arc::clone(&plane)).await;

    let data_dir = tempdir().unwrap();
    IdentityStore::new(data_dir.path())
        .save(&NodeIdentity {
            node_id: NODE_ID.into(),
            mesh_ip: MESH_IP.into(),
            signing_public_key: plane.signing_public_key_b64(),
            registered_at: Utc::now(),
            private_key: vec![1u8; 32],
            node_secret_key: NODE_SECRET_KEY.into(),
        })
        .unwrap();

    let client = Arc::new(ControlPlaneClient::new(&base).unwrap());
    let registrar = Arc::new(Registrar::new(
        IdentityStore::new(data_dir.path()),
        Arc::clone(&client) as _,
        RegistrarConfig::default(),
    ));

    let identity = registrar.register(&CancellationToken::new()).await.unwrap();
    assert_eq!(identity.node_id, NODE_ID);
    assert!(plane.registrations.lock().is_empty(), "warm start must not call /v1/register");
    assert_eq!(client.auth_token().as_deref(), Some(NODE_SECRET_KEY));
}
