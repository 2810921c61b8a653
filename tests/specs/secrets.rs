// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Scenario: secret retrieval with on-host decryption.

use std::sync::Arc;
use std::time::Duration;

use plexd_client::ControlPlaneClient;
use plexd_daemon::api::{ApiCtx, LocalApiConfig, LocalApiServer};
use plexd_daemon::syncer::ReportSyncer;
use plexd_storage::StateCache;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use super::support::{spawn_plane, uds_request, MockPlane, NODE_ID, NODE_SECRET_KEY};

async fn api_socket(
    base: &str,
    node_secret_key: &[u8],
) -> (std::path::PathBuf, CancellationToken, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let client = Arc::new(ControlPlaneClient::new(base).unwrap());
    client.set_auth_token(NODE_SECRET_KEY);
    let cache = Arc::new(StateCache::load(dir.path()).unwrap());
    let syncer =
        Arc::new(ReportSyncer::new(Arc::clone(&client) as _, NODE_ID, Duration::from_secs(5)));
    let cancel = CancellationToken::new();

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
        node_secret_key: Arc::new(node_secret_key.to_vec()),
        secrets_group: None,
    };
    tokio::spawn({
        let cancel = cancel.clone();
        async move { api.run(ctx, cancel).await }
    });

    (socket_path, cancel, dir)
}

#[tokio::test]
async fn secret_is_fetched_and_decrypted_with_the_node_secret_key() {
    let plane = MockPlane::new();
    plane.add_secret("db-password", b"super-secret", 7);
    let base = spawn_plane(Arc::clone(&plane)).await;
    let (socket, cancel, _dir) = api_socket(&base, NODE_SECRET_KEY.as_bytes()).await;

    let (status, body) =
        uds_request(&socket, "GET", "/v1/state/secrets/db-password", &[], None).await;
    assert_eq!(status, 200, "{body}");
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["key"], "db-password");
    assert_eq!(json["value"], "super-secret");
    assert_eq!(json["version"], 7);

    cancel.cancel();
}

#[tokio::test]
async fn unknown_secret_is_a_404() {
    let plane = MockPlane::new();
    let base = spawn_plane(Arc::clone(&plane)).await;
    let (socket, cancel, _dir) = api_socket(&base, NODE_SECRET_KEY.as_bytes()).await;

    let (status, _) = uds_request(&socket, "GET", "/v1/state/secrets/absent", &[], None).await;
    assert_eq!(status, 404);

    cancel.cancel();
}

#[tokio::test]
async fn wrong_node_secret_key_yields_a_generic_500() {
    let plane = MockPlane::new();
    plane.add_secret("db-password", b"super-secret", 1);
    let base = spawn_plane(Arc::clone(&plane)).await;
    let (socket, cancel, _dir) = api_socket(&base, &[9u8; 32]).await;

    let (status, body) =
        uds_request(&socket, "GET", "/v1/state/secrets/db-password", &[], None).await;
    assert_eq!(status, 500);
    let lowered = body.to_lowercase();
    for word in ["aes", "gcm", "cipher", "nonce", "key", "authentication"] {
        assert!(!lowered.contains(word), "error body leaks {word:?}: {body}");
    }

    cancel.cancel();
}
