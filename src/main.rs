// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Orgchat Relay Server
//!
//! A multi-tenant real-time message relay. Provides:
//! - WebSocket endpoints (plaintext and TLS) for room-scoped message
//!   forwarding with presence tracking
//! - Bearer-token authentication against an external identity provider
//! - HTTP endpoints for health checks and Prometheus metrics

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info};

use orgchat_relay::config::RelayConfig;
use orgchat_relay::handler::ConnectionDeps;
use orgchat_relay::http::{create_router, HttpState};
use orgchat_relay::listener::{self, ListenerCtx};
use orgchat_relay::metrics::RelayMetrics;
use orgchat_relay::profile::{HttpProfileResolver, ProfileResolver};
use orgchat_relay::relay::RelayCore;
use orgchat_relay::tls;
use orgchat_relay::token::{JwksVerifier, TokenVerifier};

/// Timeout for the outbound identity-provider and profile-service calls.
/// Kept under the auth window so a hung upstream maps to a clean failure.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(8);

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orgchat_relay=info".parse().unwrap()),
        )
        .init();

    // Load configuration
    let config = RelayConfig::from_env();

    info!(
        "Starting Orgchat Relay Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("WebSocket: {}", config.listen_addr);
    info!("WebSocket (TLS): {}", config.tls_listen_addr);
    info!("Admin endpoint: {}", config.http_addr);
    info!("Issuer: {}", config.issuer_url);
    info!("Profile API: {}", config.profile_api_url);
    info!("Auth window: {}s", config.auth_window_secs);
    if config.multi_location {
        info!("Multi-location mode: rooms are scoped per location");
    }

    // Initialize metrics and shared state
    let metrics = RelayMetrics::new();
    let core = Arc::new(RelayCore::new());

    let http_client = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .expect("Failed to build HTTP client");

    let verifier: Arc<dyn TokenVerifier> =
        Arc::new(JwksVerifier::new(&config.issuer_url, http_client.clone()));
    let profiles: Arc<dyn ProfileResolver> = Arc::new(HttpProfileResolver::new(
        &config.profile_api_url,
        http_client,
    ));

    let deps = ConnectionDeps {
        core: core.clone(),
        verifier,
        profiles,
        auth_window: config.auth_window(),
        max_frame_size: config.max_frame_size,
        multi_location: config.multi_location,
        metrics: metrics.clone(),
    };

    // Start the admin HTTP server for health/metrics
    let http_state = HttpState {
        core: core.clone(),
        metrics: metrics.clone(),
        service_port: config.listen_addr.port(),
    };
    let http_router = create_router(http_state);
    let http_listener = TcpListener::bind(config.http_addr)
        .await
        .expect("Failed to bind admin HTTP listener");
    let http_addr = config.http_addr;
    tokio::spawn(async move {
        info!("Admin HTTP server listening on {}", http_addr);
        if let Err(err) = axum::serve(http_listener, http_router).await {
            error!("Admin HTTP server failed: {}", err);
        }
    });

    let ctx = Arc::new(ListenerCtx {
        deps,
        permits: Arc::new(Semaphore::new(config.max_connections)),
        service_port: config.listen_addr.port(),
    });

    // Start the TLS listener. Certificate or bind trouble disables secure
    // sockets only; the plaintext listener serves regardless.
    match tls::load_or_generate(&config.data_dir, &["localhost".to_string()]) {
        Ok(acceptor) => match TcpListener::bind(config.tls_listen_addr).await {
            Ok(tls_tcp) => {
                info!("TLS WebSocket server listening on {}", config.tls_listen_addr);
                let tls_ctx = ctx.clone();
                tokio::spawn(async move {
                    listener::serve_tls(tls_tcp, acceptor, tls_ctx).await;
                });
            }
            Err(err) => {
                error!(
                    "TLS listener unavailable (bind {}: {}); continuing with plaintext only",
                    config.tls_listen_addr, err
                );
            }
        },
        Err(err) => {
            error!(
                "TLS listener unavailable ({}); continuing with plaintext only",
                err
            );
        }
    }

    // Start the plaintext listener
    let plain_tcp = TcpListener::bind(config.listen_addr)
        .await
        .expect("Failed to bind WebSocket listener");
    info!("WebSocket server listening on {}", config.listen_addr);

    listener::serve_plain(plain_tcp, ctx).await;
}
