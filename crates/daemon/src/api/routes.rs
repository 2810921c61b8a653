// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Route table and handlers for the local node API.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::IF_MATCH;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use plexd_core::{validate_report_key, KeyVersion};
use plexd_storage::CacheError;
use plexd_wire::{ErrorBody, MetadataValue, PutReportBody, StateSummary};
use std::collections::BTreeMap;

use super::{gate, secrets, ApiCtx};

/// Report bodies over this size are rejected with 400.
pub const MAX_REPORT_BODY: usize = 1024 * 1024;

pub fn router(ctx: ApiCtx) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/state", get(state_summary))
        .route("/v1/state/metadata", get(metadata))
        .route("/v1/state/metadata/:key", get(metadata_value))
        .route("/v1/state/data", get(data_index))
        .route("/v1/state/data/:key", get(data_value))
        .route("/v1/state/secrets", get(secret_index))
        .route("/v1/state/secrets/:key", get(secrets::secret_value))
        .route("/v1/state/report", get(report_index))
        .route(
            "/v1/state/report/:key",
            get(report_get).put(report_put).delete(report_delete),
        )
        .layer(middleware::from_fn_with_state(ctx.clone(), gate::secret_gate))
        .layer(middleware::map_response(remap_payload_too_large))
        // Slack above the documented limit so the handler can return the
        // spec'd 400 instead of hyper's 413 for bodies just over the line.
        .layer(DefaultBodyLimit::max(MAX_REPORT_BODY + 64 * 1024))
        .with_state(ctx)
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

/// Bodies large enough to trip the transport limit still surface as a 400
/// on this API.
async fn remap_payload_too_large(resp: Response) -> Response {
    if resp.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return error_response(StatusCode::BAD_REQUEST, "request body too large");
    }
    resp
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn state_summary(State(ctx): State<ApiCtx>) -> Json<StateSummary> {
    let summary = ctx.cache.summary();
    Json(StateSummary {
        metadata: summary.metadata,
        data: summary.data,
        secrets: summary.secrets,
        reports: summary.reports,
    })
}

async fn metadata(State(ctx): State<ApiCtx>) -> Json<BTreeMap<String, String>> {
    Json(ctx.cache.metadata())
}

async fn metadata_value(State(ctx): State<ApiCtx>, Path(key): Path<String>) -> Response {
    match ctx.cache.metadata_value(&key) {
        Some(value) => Json(MetadataValue { key, value }).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "metadata key not found"),
    }
}

async fn data_index(State(ctx): State<ApiCtx>) -> Json<Vec<KeyVersion>> {
    Json(ctx.cache.summary().data)
}

async fn data_value(State(ctx): State<ApiCtx>, Path(key): Path<String>) -> Response {
    match ctx.cache.data_entry(&key) {
        Some(entry) => Json(entry).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "data key not found"),
    }
}

async fn secret_index(State(ctx): State<ApiCtx>) -> Response {
    Json(ctx.cache.secret_index()).into_response()
}

async fn report_index(State(ctx): State<ApiCtx>) -> Json<Vec<KeyVersion>> {
    Json(ctx.cache.summary().reports)
}

async fn report_get(State(ctx): State<ApiCtx>, Path(key): Path<String>) -> Response {
    if validate_report_key(&key).is_err() {
        return error_response(StatusCode::BAD_REQUEST, "invalid report key");
    }
    match ctx.cache.report(&key) {
        Some(entry) => Json(entry).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "report not found"),
    }
}

async fn report_put(
    State(ctx): State<ApiCtx>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > MAX_REPORT_BODY {
        return error_response(StatusCode::BAD_REQUEST, "request body too large");
    }
    let parsed: PutReportBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid report body"),
    };
    if parsed.content_type.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "content_type is required");
    }

    let if_match = match headers.get(IF_MATCH) {
        None => None,
        Some(value) => match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
            Some(version) => Some(version),
            None => return error_response(StatusCode::BAD_REQUEST, "invalid If-Match header"),
        },
    };

    match ctx.cache.put_report(&key, &parsed.content_type, parsed.payload, if_match) {
        Ok(entry) => {
            ctx.syncer.notify_change(vec![entry.clone()], vec![]);
            (StatusCode::OK, Json(entry)).into_response()
        }
        Err(CacheError::VersionConflict { current, .. }) => error_response(
            StatusCode::CONFLICT,
            format!("version conflict: current version is {current}"),
        ),
        Err(CacheError::InvalidKey(e)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn report_delete(State(ctx): State<ApiCtx>, Path(key): Path<String>) -> Response {
    match ctx.cache.delete_report(&key) {
        Ok(()) => {
            ctx.syncer.notify_change(vec![], vec![key]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(CacheError::NotFound { .. }) => {
            error_response(StatusCode::NOT_FOUND, "report not found")
        }
        Err(CacheError::InvalidKey(e)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
#[path = "routes_tests.rs"]
pub(crate) mod tests;
