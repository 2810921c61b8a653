// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Local node API: HTTP over the always-on Unix socket plus an optional
//! bearer-authenticated TCP listener, both sharing one handler tree.
//!
//! Unix connections are served by driving hyper's connection builder over
//! accepted streams so each request carries the connection's peer
//! credentials; the secret-access gate reads them from request extensions.

mod auth;
mod gate;
mod routes;
mod secrets;

pub use auth::BearerAuth;
pub use gate::PeerCreds;
pub use routes::router;
pub use secrets::SecretFetcher;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use plexd_storage::StateCache;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::util::ServiceExt;
use tracing::{debug, error, info, warn};

use crate::syncer::ReportSyncer;

/// Shared context for every request handler.
#[derive(Clone)]
pub struct ApiCtx {
    pub cache: Arc<StateCache>,
    pub secrets: Arc<dyn SecretFetcher>,
    pub syncer: Arc<ReportSyncer>,
    pub node_id: String,
    /// Raw node secret key bytes; must be exactly 32 for decryption.
    pub node_secret_key: Arc<Vec<u8>>,
    /// Admin group admitted by the secret-access gate; `None` disables it.
    pub secrets_group: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocalApiConfig {
    pub socket_path: PathBuf,
    pub tcp_listen: Option<SocketAddr>,
    pub tcp_token_file: Option<PathBuf>,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ApiServerError {
    #[error("failed to bind local socket {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },

    #[error("failed to bind tcp listener {addr}: {source}")]
    TcpBind { addr: SocketAddr, source: io::Error },

    #[error("tcp listener configured without a bearer token file")]
    MissingTokenFile,

    #[error("local api io error: {0}")]
    Io(#[from] io::Error),
}

/// The local API with its listeners bound. Binding is separated from
/// serving so a bind failure is fatal at startup rather than inside a
/// background task.
pub struct LocalApiServer {
    config: LocalApiConfig,
    unix: UnixListener,
    tcp: Option<(TcpListener, PathBuf)>,
}

impl LocalApiServer {
    pub async fn bind(config: LocalApiConfig) -> Result<Self, ApiServerError> {
        if let Some(parent) = config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A stale socket file from a previous run blocks the bind.
        match std::fs::remove_file(&config.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ApiServerError::Io(e)),
        }
        let unix = UnixListener::bind(&config.socket_path)
            .map_err(|source| ApiServerError::Bind { path: config.socket_path.clone(), source })?;

        let tcp = match config.tcp_listen {
            Some(addr) => {
                let token_file =
                    config.tcp_token_file.clone().ok_or(ApiServerError::MissingTokenFile)?;
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|source| ApiServerError::TcpBind { addr, source })?;
                Some((listener, token_file))
            }
            None => None,
        };

        info!(socket = %config.socket_path.display(), "local API bound");
        Ok(Self { config, unix, tcp })
    }

    /// Serve until cancelled, then drain connections within the bounded
    /// shutdown timeout and unlink the socket file.
    pub async fn run(self, ctx: ApiCtx, cancel: CancellationToken) {
        let app = routes::router(ctx);

        let tcp_task = self.tcp.map(|(listener, token_file)| {
            let tcp_app = app.clone().layer(axum::middleware::from_fn_with_state(
                BearerAuth::new(token_file),
                auth::require_bearer,
            ));
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let shutdown = cancel.cancelled_owned();
                if let Err(e) =
                    axum::serve(listener, tcp_app).with_graceful_shutdown(shutdown).await
                {
                    error!(error = %e, "tcp listener failed");
                }
            })
        });

        serve_unix(self.unix, app, cancel, self.config.shutdown_timeout).await;

        match std::fs::remove_file(&self.config.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to unlink socket file"),
        }

        if let Some(task) = tcp_task {
            if tokio::time::timeout(self.config.shutdown_timeout, task).await.is_err() {
                warn!("tcp listener still draining past shutdown timeout; abandoning");
            }
        }
    }
}

async fn serve_unix(
    listener: UnixListener,
    app: Router,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
) {
    let tracker = TaskTracker::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let app = app.clone();
                    tracker.spawn(serve_connection(stream, app));
                }
                Err(e) => error!(error = %e, "unix accept failed"),
            }
        }
    }

    tracker.close();
    if tokio::time::timeout(shutdown_timeout, tracker.wait()).await.is_err() {
        warn!("local API connections still open past shutdown timeout; abandoning");
    }
}

/// Serve one Unix connection, tagging every request with the connection's
/// peer credentials for the secret-access gate.
async fn serve_connection(stream: UnixStream, app: Router) {
    let peer = stream.peer_cred().ok().map(|cred| PeerCreds {
        uid: cred.uid(),
        gid: cred.gid(),
        pid: cred.pid(),
    });

    let io = TokioIo::new(stream);
    let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
        if let Some(peer) = peer.clone() {
            req.extensions_mut().insert(peer);
        }
        app.clone().oneshot(req)
    });

    if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(io, service)
        .await
    {
        debug!(error = %e, "local API connection error");
    }
}
