// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Drives one socket through its lifecycle: unauthenticated, authenticated,
//! closed. A fresh connection gets one bounded window to present a valid
//! `auth` frame and pass verification; afterwards the handler multiplexes
//! inbound frames against the connection's outbound room queue until the
//! socket closes or the registry evicts it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::metrics::RelayMetrics;
use crate::profile::ProfileResolver;
use crate::protocol::{self, ClientFrame, ServerFrame};
use crate::relay::{Identity, RelayCore};
use crate::token::TokenVerifier;

/// Shared dependencies for handling a WebSocket connection.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub core: Arc<RelayCore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub profiles: Arc<dyn ProfileResolver>,
    /// Window covering both receipt of the auth frame and the external
    /// verification calls.
    pub auth_window: Duration,
    pub max_frame_size: usize,
    pub multi_location: bool,
    pub metrics: RelayMetrics,
}

/// Handles one WebSocket connection to completion.
pub async fn handle_connection<S>(ws_stream: WebSocketStream<S>, deps: ConnectionDeps)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Short random label for log correlation. Tokens are never logged.
    let session = uuid::Uuid::new_v4().to_string()[..8].to_string();

    let (mut write, mut read) = ws_stream.split();

    let deadline = Instant::now() + deps.auth_window;
    let identity = match authenticate(&mut read, &deps, deadline).await {
        Ok(identity) => identity,
        Err(AuthError::ConnectionClosed) => {
            debug!("[{}] closed before authentication", session);
            return;
        }
        Err(err) => {
            warn!("[{}] authentication failed: {}", session, err);
            deps.metrics.auth_failures.inc();
            send_frame(
                &mut write,
                &ServerFrame::AuthError {
                    message: err.client_message().to_string(),
                },
            )
            .await;
            let _ = write.send(Message::Close(None)).await;
            return;
        }
    };

    let email = identity.email.clone();
    let tenant_key = identity.tenant_key.clone();
    let registration = deps.core.register(identity);
    let conn_id = registration.id;
    let mut room_rx = registration.receiver;
    if !registration.evicted.is_empty() {
        deps.metrics
            .evictions
            .inc_by(registration.evicted.len() as u64);
    }
    info!("[{}] {} joined room {}", session, email, tenant_key);

    let mut evicted = false;
    loop {
        tokio::select! {
            queued = room_rx.recv() => match queued {
                Some(msg) => {
                    if write.send(Message::text(msg.data)).await.is_err() {
                        break;
                    }
                }
                None => {
                    // The registry dropped our channel: a newer session for
                    // this identity took over. Close without a leave
                    // broadcast.
                    evicted = true;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > deps.max_frame_size {
                        debug!("[{}] oversized frame dropped ({} bytes)", session, text.len());
                        deps.metrics.frames_dropped.inc();
                        continue;
                    }
                    match protocol::decode_client_frame(&text) {
                        Ok(ClientFrame::Message { payload, iv }) => {
                            if deps.core.relay_message(conn_id, payload, iv) {
                                deps.metrics.messages_relayed.inc();
                            }
                        }
                        Ok(ClientFrame::Auth { .. }) => {
                            debug!("[{}] duplicate auth frame ignored", session);
                        }
                        Err(err) => {
                            debug!("[{}] malformed frame dropped: {}", session, err);
                            deps.metrics.frames_dropped.inc();
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("[{}] client closed", session);
                    break;
                }
                Some(Ok(_)) => {
                    // Binary and pong frames are not part of the protocol.
                    deps.metrics.frames_dropped.inc();
                }
                Some(Err(err)) => {
                    debug!("[{}] connection error: {}", session, err);
                    break;
                }
                None => break,
            }
        }
    }

    if evicted {
        let _ = write.send(Message::Close(None)).await;
        debug!("[{}] {} evicted by a newer session", session, email);
    }

    // Exactly once: a no-op when an eviction already removed the entry.
    if deps.core.disconnect(conn_id) {
        info!("[{}] {} left room {}", session, email, tenant_key);
    }
}

/// Runs the unauthenticated phase: waits for a well-formed `auth` frame and
/// verifies it, all within `deadline`. Frames other than `auth` are dropped.
/// A socket close at any point cancels the in-flight verification and its
/// result is discarded.
async fn authenticate<S>(
    read: &mut SplitStream<WebSocketStream<S>>,
    deps: &ConnectionDeps,
    deadline: Instant,
) -> Result<Identity, AuthError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = loop {
        let msg = match timeout_at(deadline, read.next()).await {
            Err(_) => return Err(AuthError::Timeout),
            Ok(None) => return Err(AuthError::ConnectionClosed),
            Ok(Some(Err(_))) => return Err(AuthError::ConnectionClosed),
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Text(text) => match protocol::decode_client_frame(&text) {
                Ok(ClientFrame::Auth { token }) => break token,
                // Anything else before authentication is dropped.
                _ => continue,
            },
            Message::Close(_) => return Err(AuthError::ConnectionClosed),
            _ => continue,
        }
    };

    let verify = verify_identity(&token, deps);
    tokio::pin!(verify);
    loop {
        tokio::select! {
            outcome = timeout_at(deadline, &mut verify) => {
                return match outcome {
                    Ok(result) => result,
                    Err(_) => Err(AuthError::Timeout),
                };
            }
            side = read.next() => match side {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {
                    return Err(AuthError::ConnectionClosed);
                }
                // Frames sent while verification is in flight are dropped.
                Some(Ok(_)) => continue,
            }
        }
    }
}

async fn verify_identity(token: &str, deps: &ConnectionDeps) -> Result<Identity, AuthError> {
    let claims = deps.verifier.verify(token).await?;
    let profile = deps.profiles.resolve(token).await?;

    // The profile is the canonical identity source; the verified token only
    // proves authenticity.
    if let Some(claim_email) = &claims.email {
        if *claim_email != profile.email {
            debug!(
                claim = %claim_email,
                profile = %profile.email,
                "claim email differs from profile email; using profile"
            );
        }
    }

    let display_name = profile
        .display_name
        .clone()
        .unwrap_or_else(|| profile.email.clone());
    Ok(Identity {
        email: profile.email.clone(),
        display_name,
        tenant_key: profile.tenant_key(deps.multi_location),
    })
}

async fn send_frame<S>(write: &mut SplitSink<WebSocketStream<S>, Message>, frame: &ServerFrame)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = write.send(Message::text(json)).await;
    }
}
