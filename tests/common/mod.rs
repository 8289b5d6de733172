// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for relay integration tests.
//!
//! Provides static in-memory stand-ins for the token verifier and profile
//! resolver plus a helper that runs a full relay (accept loop, handler,
//! core) on an ephemeral port.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use orgchat_relay::error::AuthError;
use orgchat_relay::handler::ConnectionDeps;
use orgchat_relay::listener::{self, ListenerCtx};
use orgchat_relay::metrics::RelayMetrics;
use orgchat_relay::profile::{Profile, ProfileResolver};
use orgchat_relay::relay::RelayCore;
use orgchat_relay::token::{TokenClaims, TokenVerifier};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long any single test await is allowed to take.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Token verifier that accepts exactly the tokens it was seeded with.
#[derive(Default)]
pub struct StaticVerifier {
    claims: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, token: &str, claim_email: &str) -> Self {
        self.claims
            .insert(token.to_string(), Some(claim_email.to_string()));
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        match self.claims.get(token) {
            Some(email) => Ok(TokenClaims {
                email: email.clone(),
                sub: None,
            }),
            None => Err(AuthError::InvalidSignature),
        }
    }
}

/// Profile resolver backed by a static token → profile map.
#[derive(Default)]
pub struct StaticProfiles {
    profiles: HashMap<String, Profile>,
}

#[allow(dead_code)]
impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: &str, profile: Profile) -> Self {
        self.profiles.insert(token.to_string(), profile);
        self
    }
}

#[async_trait]
impl ProfileResolver for StaticProfiles {
    async fn resolve(&self, token: &str) -> Result<Profile, AuthError> {
        self.profiles
            .get(token)
            .cloned()
            .ok_or(AuthError::ProfileNotFound)
    }
}

/// Builds a profile value the way the profile service would return it.
#[allow(dead_code)]
pub fn profile(email: &str, display_name: &str, org: &str) -> Profile {
    serde_json::from_value(json!({
        "email": email,
        "displayName": display_name,
        "orgId": org,
    }))
    .unwrap()
}

pub struct TestRelay {
    pub url: String,
    pub core: Arc<RelayCore>,
    #[allow(dead_code)]
    pub metrics: RelayMetrics,
}

/// Starts a relay with the given doubles on an ephemeral port and returns
/// its ws:// URL plus handles on the shared state.
#[allow(dead_code)]
pub async fn spawn_relay(
    verifier: StaticVerifier,
    profiles: StaticProfiles,
    auth_window: Duration,
) -> TestRelay {
    let core = Arc::new(RelayCore::new());
    let metrics = RelayMetrics::new();
    let deps = ConnectionDeps {
        core: core.clone(),
        verifier: Arc::new(verifier),
        profiles: Arc::new(profiles),
        auth_window,
        max_frame_size: 1_048_576,
        multi_location: false,
        metrics: metrics.clone(),
    };

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let ctx = Arc::new(ListenerCtx {
        deps,
        permits: Arc::new(Semaphore::new(64)),
        service_port: addr.port(),
    });
    tokio::spawn(async move {
        listener::serve_plain(tcp, ctx).await;
    });

    TestRelay {
        url: format!("ws://127.0.0.1:{}", addr.port()),
        core,
        metrics,
    }
}

#[allow(dead_code)]
pub async fn connect(url: &str) -> WsClient {
    let (ws, _) = connect_async(url).await.expect("websocket connect");
    ws
}

#[allow(dead_code)]
pub async fn send_json(ws: &mut WsClient, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

#[allow(dead_code)]
pub async fn send_raw(ws: &mut WsClient, text: &str) {
    ws.send(Message::text(text.to_string())).await.unwrap();
}

/// Receives the next text frame as JSON, skipping pings and pongs.
#[allow(dead_code)]
pub async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended while waiting for a frame: {:?}", other),
        }
    }
}

/// Asserts the socket closes without delivering further text frames.
#[allow(dead_code)]
pub async fn expect_closed(ws: &mut WsClient) {
    loop {
        match timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
        {
            None => return,
            Some(Ok(Message::Close(_))) => return,
            Some(Err(_)) => return,
            Some(Ok(Message::Text(text))) => panic!("unexpected frame before close: {}", text),
            Some(Ok(_)) => continue,
        }
    }
}

/// Asserts no text frame arrives within the given window.
#[allow(dead_code)]
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    match timeout(window, ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {}", text),
        Ok(_) => {}
    }
}

#[allow(dead_code)]
pub fn auth_frame(token: &str) -> Value {
    json!({"type": "auth", "token": token})
}

#[allow(dead_code)]
pub fn message_frame(payload: &str, iv: &str) -> Value {
    json!({"type": "message", "payload": payload, "iv": iv})
}

/// Authenticates a fresh client and returns it along with its `user_list`.
#[allow(dead_code)]
pub async fn join(url: &str, token: &str) -> (WsClient, Value) {
    let mut ws = connect(url).await;
    send_json(&mut ws, &auth_frame(token)).await;

    let first = recv_json(&mut ws).await;
    assert_eq!(first["type"], "auth_success", "expected auth_success first");
    let second = recv_json(&mut ws).await;
    assert_eq!(second["type"], "user_list", "expected user_list second");

    (ws, second)
}
