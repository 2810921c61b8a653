// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Bearer-token middleware for the optional TCP listener.
//!
//! The expected token lives in a root-owned file and is re-read per
//! request so rotation needs no restart; comparison is constant-time.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::routes::error_response;

#[derive(Clone)]
pub struct BearerAuth {
    token_file: Arc<PathBuf>,
}

impl BearerAuth {
    pub fn new(token_file: impl Into<PathBuf>) -> Self {
        Self { token_file: Arc::new(token_file.into()) }
    }
}

pub(crate) async fn require_bearer(
    State(auth): State<BearerAuth>,
    req: Request,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(provided) = provided else {
        return unauthorized();
    };

    let expected = match std::fs::read_to_string(auth.token_file.as_ref()) {
        Ok(expected) => expected,
        Err(e) => {
            warn!(path = %auth.token_file.display(), error = %e, "cannot read tcp token file");
            return unauthorized();
        }
    };
    let expected = expected.trim();
    if expected.is_empty() {
        return unauthorized();
    }

    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        next.run(req).await
    } else {
        unauthorized()
    }
}

fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized")
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
