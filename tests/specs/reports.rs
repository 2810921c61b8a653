// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Scenario: report CRUD through the local API with outward sync.

use std::sync::Arc;
use std::time::Duration;

use plexd_client::ControlPlaneClient;
use plexd_daemon::api::{ApiCtx, LocalApiConfig, LocalApiServer};
use plexd_daemon::syncer::ReportSyncer;
use plexd_storage::StateCache;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use super::support::{spawn_plane, uds_request, wait_for, MockPlane, NODE_ID, NODE_SECRET_KEY};

struct Agent {
    socket_path: std::path::PathBuf,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

async fn agent_with_api(base: &str) -> Agent {
    let dir = tempdir().unwrap();
    let client = Arc::new(ControlPlaneClient::new(base).unwrap());
    client.set_auth_token(NODE_SECRET_KEY);
    let cache = Arc::new(StateCache::load(dir.path()).unwrap());
    let syncer =
        Arc::new(ReportSyncer::new(Arc::clone(&client) as _, NODE_ID, Duration::from_millis(100)));
    let cancel = CancellationToken::new();

    tokio::spawn({
        let syncer = Arc::clone(&syncer);
        let cancel = cancel.clone();
        async move { syncer.run(cancel).await.unwrap() }
    });

    let socket_path = dir.path().join("api.sock");
    let api = LocalApiServer::bind(LocalApiConfig {
        socket_path: socket_path.clone(),
        tcp_listen: None,
        tcp_token_file: None,
        shutdown_timeout: Duration::from_secs(5),
    })
    .await
    .unwrap();
    let ctx = ApiCtx {
        cache,
        secrets: Arc::clone(&client) as _,
        syncer,
        node_id: NODE_ID.into(),
        node_secret_key: Arc::new(NODE_SECRET_KEY.as_bytes().to_vec()),
        secrets_group: None,
    };
    tokio::spawn({
        let cancel = cancel.clone();
        async move { api.run(ctx, cancel).await }
    });

    Agent { socket_path, cancel, _dir: dir }
}

#[tokio::test]
async fn report_crud_round_trip_reaches_the_control_plane() {
    let plane = MockPlane::new();
    let base = spawn_plane(Arc::clone(&plane)).await;
    let agent = agent_with_api(&base).await;

    // Create.
    let (status, body) = uds_request(
        &agent.socket_path,
        "PUT",
        "/v1/state/report/health",
        &[],
        Some(r#"{"content_type": "application/json", "payload": {"ok": true}}"#),
    )
    .await;
    assert_eq!(status, 200, "{body}");
    let created: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(created["version"], 1);
    assert_eq!(created["payload"]["ok"], true);

    // Read back the same content.
    let (status, body) =
        uds_request(&agent.socket_path, "GET", "/v1/state/report/health", &[], None).await;
    assert_eq!(status, 200);
    let fetched: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(fetched["payload"], created["payload"]);
    assert_eq!(fetched["version"], 1);

    // Update bumps the version.
    let (status, body) = uds_request(
        &agent.socket_path,
        "PUT",
        "/v1/state/report/health",
        &[],
        Some(r#"{"content_type": "application/json", "payload": {"ok": false}}"#),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(serde_json::from_str::<serde_json::Value>(&body).unwrap()["version"], 2);

    // Delete, then 404.
    let (status, _) =
        uds_request(&agent.socket_path, "DELETE", "/v1/state/report/health", &[], None).await;
    assert_eq!(status, 204);
    let (status, _) =
        uds_request(&agent.socket_path, "GET", "/v1/state/report/health", &[], None).await;
    assert_eq!(status, 404);

    // The syncer pushed at least one batch outward.
    wait_for("report sync push", || !plane.report_batches.lock().is_empty()).await;
    let batches = plane.report_batches.lock();
    let saw_health = batches
        .iter()
        .any(|b| b.entries.iter().any(|e| e.key == "health") || b.deleted.contains(&"health".to_string()));
    assert!(saw_health, "sync batches should mention the health report");

    agent.cancel.cancel();
}

#[tokio::test]
async fn conditional_put_conflicts_surface_as_409() {
    let plane = MockPlane::new();
    let base = spawn_plane(Arc::clone(&plane)).await;
    let agent = agent_with_api(&base).await;
    let body = r#"{"content_type": "application/json", "payload": {}}"#;

    let (status, _) =
        uds_request(&agent.socket_path, "PUT", "/v1/state/report/k", &[], Some(body)).await;
    assert_eq!(status, 200);

    let (status, _) = uds_request(
        &agent.socket_path,
        "PUT",
        "/v1/state/report/k",
        &[("If-Match", "9")],
        Some(body),
    )
    .await;
    assert_eq!(status, 409);

    let (status, _) = uds_request(
        &agent.socket_path,
        "PUT",
        "/v1/state/report/k",
        &[("If-Match", "1")],
        Some(body),
    )
    .await;
    assert_eq!(status, 200);

    agent.cancel.cancel();
}
