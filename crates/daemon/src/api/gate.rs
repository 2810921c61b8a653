// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Peer-credential gate for secret reads on the local socket.
//!
//! Unix connections carry SO_PEERCRED into request extensions; requests
//! under `/v1/state/secrets` are admitted only for root or members of the
//! administrative group. Requests without peer credentials (the TCP
//! listener, which has bearer auth instead) bypass the gate, as do all
//! other routes.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::routes::error_response;
use super::ApiCtx;

const SECRETS_PREFIX: &str = "/v1/state/secrets";

/// Peer credentials captured from the Unix socket at accept time.
#[derive(Debug, Clone)]
pub struct PeerCreds {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

pub(crate) async fn secret_gate(State(ctx): State<ApiCtx>, req: Request, next: Next) -> Response {
    if !req.uri().path().starts_with(SECRETS_PREFIX) {
        return next.run(req).await;
    }
    let Some(group) = &ctx.secrets_group else {
        return next.run(req).await;
    };
    let Some(peer) = req.extensions().get::<PeerCreds>() else {
        return next.run(req).await;
    };

    if peer_allowed(peer, group) {
        next.run(req).await
    } else {
        debug!(uid = peer.uid, gid = peer.gid, "secret access denied by peer-credential gate");
        error_response(StatusCode::FORBIDDEN, "forbidden")
    }
}

/// Root always passes; otherwise the peer's primary or supplementary
/// groups must include the administrative group.
pub(crate) fn peer_allowed(peer: &PeerCreds, admin_group: &str) -> bool {
    if peer.uid == 0 {
        return true;
    }

    let Ok(Some(group)) = nix::unistd::Group::from_name(admin_group) else {
        return false;
    };
    if peer.gid == group.gid.as_raw() {
        return true;
    }

    let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(peer.uid)) else {
        return false;
    };
    let Ok(name) = std::ffi::CString::new(user.name) else {
        return false;
    };
    match nix::unistd::getgrouplist(&name, user.gid) {
        Ok(groups) => groups.contains(&group.gid),
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
