// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Signed event stream over WebSocket.
//!
//! The opener performs the handshake with the bearer token and the resume
//! hint; the returned stream yields decoded envelopes until the server
//! closes or the transport fails. Reconnection policy lives with the
//! stream manager in the daemon, not here.

use futures_util::{SinkExt, StreamExt};
use plexd_core::SignedEnvelope;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Header carrying the last delivered event id on reconnect.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-Id";

#[derive(Debug, Error)]
pub enum StreamError {
    /// The server refused the handshake with 401; the caller should
    /// re-register before reconnecting.
    #[error("event stream authentication rejected")]
    Auth,

    #[error("event stream handshake failed: {0}")]
    Handshake(Box<WsError>),

    #[error("event stream transport error: {0}")]
    Transport(Box<WsError>),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid event stream request: {0}")]
    Request(String),
}

/// An open subscription to the control plane's signed event stream.
pub struct EventStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Open the stream against `events_url` with the current bearer token.
pub async fn open_event_stream(
    events_url: &str,
    token: Option<&str>,
    last_event_id: Option<&str>,
) -> Result<EventStream, StreamError> {
    let mut request = events_url
        .into_client_request()
        .map_err(|e| StreamError::Request(e.to_string()))?;

    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| StreamError::Request(e.to_string()))?;
        request.headers_mut().insert("Authorization", value);
    }
    if let Some(id) = last_event_id {
        let value =
            HeaderValue::from_str(id).map_err(|e| StreamError::Request(e.to_string()))?;
        request.headers_mut().insert(LAST_EVENT_ID_HEADER, value);
    }

    match connect_async(request).await {
        Ok((inner, _response)) => Ok(EventStream { inner }),
        Err(WsError::Http(resp)) if resp.status().as_u16() == 401 => Err(StreamError::Auth),
        Err(e) => Err(StreamError::Handshake(Box::new(e))),
    }
}

impl EventStream {
    /// Next envelope, or `None` when the stream ended. A malformed frame
    /// is an `Err` item; the connection stays usable.
    pub async fn next_envelope(&mut self) -> Option<Result<SignedEnvelope, StreamError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(
                        serde_json::from_str::<SignedEnvelope>(text.as_str())
                            .map_err(StreamError::from),
                    );
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "event stream closed by server");
                    return None;
                }
                // Ping/Pong are answered by the transport; binary frames
                // are not part of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(StreamError::Transport(Box::new(e)))),
            }
        }
    }

    /// Close the connection; safe to call on an already-failed stream.
    pub async fn close(&mut self) {
        let _ = self.inner.close(None).await;
        let _ = self.inner.flush().await;
    }
}
