// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Scenario: signing-key rotation delivered over the event stream.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use plexd_client::ControlPlaneClient;
use plexd_daemon::events::EventStreamManager;
use plexd_daemon::lifecycle::{state_updated_handler, STATE_UPDATED};
use plexd_daemon::verifier::SignatureVerifier;
use plexd_storage::StateCache;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use super::cold_start::NoRecovery;
use super::support::{sign_envelope_with, spawn_plane, wait_for, MockPlane, NODE_SECRET_KEY};

fn state_payload(key: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "metadata": { key: "yes" }
    }))
    .unwrap()
}

#[tokio::test]
async fn rotated_keys_apply_atomically_with_a_transition_window() {
    let plane = MockPlane::new();
    let base = spawn_plane(Arc::clone(&plane)).await;

    let old_public = plane.signing_public_key_b64();
    let new_signing = SigningKey::from_bytes(&[22u8; 32]);
    let new_public = BASE64.encode(new_signing.verifying_key().to_bytes());

    let dir = tempdir().unwrap();
    let client = Arc::new(ControlPlaneClient::new(&base).unwrap());
    client.set_auth_token(NODE_SECRET_KEY);
    let verifier = Arc::new(SignatureVerifier::new(&old_public).unwrap());
    let cache = Arc::new(StateCache::load(dir.path()).unwrap());

    let events = Arc::new(EventStreamManager::new(
        Arc::clone(&client),
        Arc::clone(&verifier),
        Arc::new(NoRecovery),
    ));
    events.register_handler(STATE_UPDATED, state_updated_handler(Arc::clone(&cache)));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let events = Arc::clone(&events);
        let cancel = cancel.clone();
        async move { events.run(cancel, "n1").await }
    });
    wait_for("stream subscription", || plane.events.receiver_count() >= 1).await;

    // Rotation envelope, signed by the still-current old key.
    let expires = Utc::now() + chrono::Duration::hours(1);
    let rotation = serde_json::to_vec(&serde_json::json!({
        "current": new_public,
        "previous": old_public,
        "transition_expires": expires,
    }))
    .unwrap();
    plane.push_event(plane.sign_envelope("signing_key_rotated", "rot-1", &rotation));

    // An envelope signed by the new key verifies.
    plane.push_event(sign_envelope_with(
        &new_signing,
        STATE_UPDATED,
        "evt-new",
        &state_payload("signed-by-new"),
    ));
    wait_for("new-key envelope to land", || cache.metadata_value("signed-by-new").is_some()).await;

    // One signed by the previous key still verifies inside the window.
    plane.push_event(plane.sign_envelope(STATE_UPDATED, "evt-old", &state_payload("signed-by-old")));
    wait_for("old-key envelope to land", || cache.metadata_value("signed-by-old").is_some()).await;

    cancel.cancel();
    events.shutdown();
}

#[tokio::test]
async fn forged_envelopes_are_dropped() {
    let plane = MockPlane::new();
    let base = spawn_plane(Arc::clone(&plane)).await;

    let dir = tempdir().unwrap();
    let client = Arc::new(ControlPlaneClient::new(&base).unwrap());
    client.set_auth_token(NODE_SECRET_KEY);
    let verifier = Arc::new(SignatureVerifier::new(&plane.signing_public_key_b64()).unwrap());
    let cache = Arc::new(StateCache::load(dir.path()).unwrap());

    let events = Arc::new(EventStreamManager::new(
        Arc::clone(&client),
        Arc::clone(&verifier),
        Arc::new(NoRecovery),
    ));
    events.register_handler(STATE_UPDATED, state_updated_handler(Arc::clone(&cache)));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let events = Arc::clone(&events);
        let cancel = cancel.clone();
        async move { events.run(cancel, "n1").await }
    });
    wait_for("stream subscription", || plane.events.receiver_count() >= 1).await;

    // Forged first; the genuine envelope after it proves delivery order.
    let forger = SigningKey::from_bytes(&[33u8; 32]);
    plane.push_event(sign_envelope_with(
        &forger,
        STATE_UPDATED,
        "evt-forged",
        &state_payload("forged"),
    ));
    plane.push_event(plane.sign_envelope(STATE_UPDATED, "evt-real", &state_payload("real")));

    wait_for("genuine envelope to land", || cache.metadata_value("real").is_some()).await;
    assert_eq!(cache.metadata_value("forged"), None, "forged envelope must be dropped");

    cancel.cancel();
    events.shutdown();
}
