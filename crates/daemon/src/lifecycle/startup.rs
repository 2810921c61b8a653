// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Startup wiring and the shutdown drain.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use plexd_client::ControlPlaneClient;
use plexd_storage::{fsio, IdentityStore, StateCache};
use plexd_wire::HeartbeatRequest;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{ApiCtx, LocalApiConfig, LocalApiServer};
use crate::events::EventStreamManager;
use crate::heartbeat::{binary_checksum, HeartbeatService};
use crate::reconciler::Reconciler;
use crate::registrar::{AuthRecovery, Registrar, RegistrarConfig, RegistrationError};
use crate::syncer::ReportSyncer;
use crate::verifier::SignatureVerifier;
use crate::{env, lifecycle::handlers};

use super::{Config, LifecycleError};

/// Run the agent until SIGTERM/SIGINT.
pub async fn run(config: Config) -> Result<(), LifecycleError> {
    config.validate()?;

    // 1. Data directory and single-instance lock.
    fsio::create_private_dir(&config.data_dir)?;
    let _lock_file = acquire_lock(&config)?;

    // Root cancellation, driven by the termination signals.
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    // 2. Control-plane client.
    let client = Arc::new(ControlPlaneClient::new(&config.control_plane_url)?);

    // 3. Identity: load or register. Sets the client's bearer token.
    let registrar = Arc::new(Registrar::new(
        IdentityStore::new(&config.data_dir),
        Arc::clone(&client) as _,
        RegistrarConfig {
            token_sources: config.bootstrap.clone(),
            hostname_override: config.hostname_override.clone(),
            metadata: config.node_metadata.clone(),
            capabilities: config.capabilities.clone(),
            max_retry_duration: config.register_timeout,
        },
    ));
    let identity = registrar.register(&cancel).await?;
    let node_id = identity.node_id.clone();

    // 4. Verifier, seeded from the identity's signing key.
    let verifier = Arc::new(SignatureVerifier::new(&identity.signing_public_key)?);

    // 5. State cache.
    let cache = Arc::new(StateCache::load(&config.data_dir)?);

    // 6. Report syncer.
    let syncer = Arc::new(ReportSyncer::new(
        Arc::clone(&client) as _,
        node_id.clone(),
        config.report_debounce,
    ));

    // 7. Reconciler: cache mirror plus signing-key pickup.
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&client) as _,
        Some(Arc::clone(&client) as _),
        config.reconcile_interval,
    ));
    reconciler.register_handler(Arc::new(handlers::CacheUpdateHandler::new(Arc::clone(&cache))));
    reconciler.register_handler(Arc::new(handlers::SigningKeyHandler::new(Arc::clone(&verifier))));

    // 8. Event stream: same cache mutators as the reconcile path, plus the
    // reserved key-rotation event handled by the manager itself.
    let reauth = Arc::new(ReauthGuard::new(Arc::clone(&registrar), cancel.clone()));
    let events = Arc::new(EventStreamManager::new(
        Arc::clone(&client),
        Arc::clone(&verifier),
        Arc::clone(&reauth) as _,
    ));
    events.register_handler(
        handlers::STATE_UPDATED,
        handlers::state_updated_handler(Arc::clone(&cache)),
    );
    events.register_handler(
        handlers::RECONCILE_REQUESTED,
        handlers::reconcile_requested_handler(Arc::clone(&reconciler)),
    );

    // 9. Heartbeat, with directives wired to the reconciler. A rotate_keys
    // directive also just triggers a reconcile: the fresh state response
    // carries the new keys.
    let heartbeat = Arc::new(HeartbeatService::new(
        Arc::clone(&client) as _,
        node_id.clone(),
        config.heartbeat_interval,
        heartbeat_builder(),
        {
            let reconciler = Arc::clone(&reconciler);
            Arc::new(move || reconciler.trigger_reconcile())
        },
        {
            let reconciler = Arc::clone(&reconciler);
            Arc::new(move || reconciler.trigger_reconcile())
        },
        Arc::clone(&reauth) as _,
    ));

    // 10. Local API: bind now so failures are fatal, serve as a task.
    let api = LocalApiServer::bind(LocalApiConfig {
        socket_path: config.socket_path.clone(),
        tcp_listen: config.tcp_listen,
        tcp_token_file: config.tcp_token_file.clone(),
        shutdown_timeout: config.api_shutdown_timeout,
    })
    .await?;
    let api_ctx = ApiCtx {
        cache: Arc::clone(&cache),
        secrets: Arc::clone(&client) as _,
        syncer: Arc::clone(&syncer),
        node_id: node_id.clone(),
        node_secret_key: Arc::new(identity.node_secret_key.clone().into_bytes()),
        secrets_group: config.secrets_group.clone(),
    };

    // Launch the long-running subsystems.
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
    tasks.push((
        "event-stream",
        tokio::spawn({
            let events = Arc::clone(&events);
            let cancel = cancel.clone();
            let node_id = node_id.clone();
            async move { events.run(cancel, &node_id).await }
        }),
    ));
    tasks.push((
        "reconciler",
        tokio::spawn({
            let reconciler = Arc::clone(&reconciler);
            let cancel = cancel.clone();
            let node_id = node_id.clone();
            async move {
                if let Err(e) = reconciler.run(cancel, &node_id).await {
                    error!(error = %e, "reconciler refused to start");
                }
            }
        }),
    ));
    tasks.push((
        "heartbeat",
        tokio::spawn({
            let heartbeat = Arc::clone(&heartbeat);
            let cancel = cancel.clone();
            async move { heartbeat.run(cancel).await }
        }),
    ));
    tasks.push((
        "report-syncer",
        tokio::spawn({
            let syncer = Arc::clone(&syncer);
            let cancel = cancel.clone();
            async move {
                if let Err(e) = syncer.run(cancel).await {
                    error!(error = %e, "report syncer refused to start");
                }
            }
        }),
    ));
    tasks.push((
        "local-api",
        tokio::spawn({
            let cancel = cancel.clone();
            async move { api.run(api_ctx, cancel).await }
        }),
    ));

    info!(node_id = %node_id, "plexd started");

    // Wait for termination, then drain within the bounded window.
    cancel.cancelled().await;
    info!("termination signal received; draining");
    events.shutdown();

    let drain = async {
        for (name, task) in tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "task ended abnormally");
            }
        }
    };
    if tokio::time::timeout(config.drain_timeout, drain).await.is_err() {
        warn!(timeout_secs = config.drain_timeout.as_secs(), "drain timeout exceeded; forcing exit");
    }

    info!("shutdown complete");
    Ok(())
}

/// Re-registration hook shared by the heartbeat and the event stream.
/// Attempts are serialized so a 401 burst cannot stack registrations.
struct ReauthGuard {
    registrar: Arc<Registrar>,
    cancel: CancellationToken,
    serializer: tokio::sync::Mutex<()>,
}

impl ReauthGuard {
    fn new(registrar: Arc<Registrar>, cancel: CancellationToken) -> Self {
        Self { registrar, cancel, serializer: tokio::sync::Mutex::new(()) }
    }
}

#[async_trait::async_trait]
impl AuthRecovery for ReauthGuard {
    async fn recover_auth(&self) {
        let _guard = self.serializer.lock().await;
        match self.registrar.reregister(&self.cancel).await {
            Ok(identity) => {
                info!(node_id = %identity.node_id, "re-registered after auth failure");
            }
            Err(RegistrationError::Cancelled) => {}
            Err(e) => {
                // Surfaced for operators: the node is currently locked out.
                error!(error = %e, "re-registration failed; node remains unauthorized");
            }
        }
    }
}

fn heartbeat_builder() -> crate::heartbeat::RequestBuilder {
    let started = Instant::now();
    let checksum = binary_checksum();
    Box::new(move || HeartbeatRequest {
        health: "ok".to_string(),
        version: Some(env::VERSION.to_string()),
        uptime_secs: Some(started.elapsed().as_secs()),
        binary_checksum: checksum.clone(),
    })
}

fn acquire_lock(config: &Config) -> Result<std::fs::File, LifecycleError> {
    let lock_path = config.data_dir.join("plexd.lock");
    // Avoid truncating before the lock is held: the file may belong to a
    // running instance.
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    Ok(lock_file)
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_termination().await;
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = term.recv() => info!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received");
}
