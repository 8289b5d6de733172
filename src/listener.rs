// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transport Listeners
//!
//! Two accept loops share one relay core: a plaintext listener and a TLS
//! listener. Both answer plain HTTP GETs in-band — `/health` with the
//! liveness payload, anything else with a small pointer (the TLS side
//! serves an HTML page so browser users can complete the one-time trust
//! step for the self-signed certificate) — and hand WebSocket upgrades to
//! the connection handler. A shared semaphore caps concurrent sockets
//! across both listeners.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, warn};

use crate::handler::{self, ConnectionDeps};
use crate::http::health_json;

/// Everything an accept loop needs.
pub struct ListenerCtx {
    pub deps: ConnectionDeps,
    /// Connection permits shared by the plaintext and TLS listeners.
    pub permits: Arc<Semaphore>,
    /// Port advertised in the health payload.
    pub service_port: u16,
}

/// Request heads are sniffed from the first bytes only; enough to capture
/// the request line and the Upgrade header.
const HEAD_SNIFF_SIZE: usize = 512;

const TRUST_PAGE: &str = "<html><body style=\"font-family:sans-serif;text-align:center;\
padding:4rem\"><h2>Certificate accepted!</h2><p>You can close this tab and return to chat.\
</p></body></html>";

/// Accept loop for the plaintext endpoint.
pub async fn serve_plain(listener: TcpListener, ctx: Arc<ListenerCtx>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("accept failed: {}", err);
                continue;
            }
        };
        let Ok(permit) = ctx.permits.clone().try_acquire_owned() else {
            warn!("connection rejected: at capacity");
            ctx.deps.metrics.connection_errors.inc();
            drop(stream);
            continue;
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            handle_plain(stream, ctx).await;
        });
    }
}

/// Accept loop for the TLS endpoint.
pub async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, ctx: Arc<ListenerCtx>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("tls accept failed: {}", err);
                continue;
            }
        };
        let Ok(permit) = ctx.permits.clone().try_acquire_owned() else {
            warn!("connection rejected: at capacity");
            ctx.deps.metrics.connection_errors.inc();
            drop(stream);
            continue;
        };
        let acceptor = acceptor.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let tls_stream = match timeout(ctx.deps.auth_window, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => tls_stream,
                Ok(Err(err)) => {
                    debug!("tls handshake failed: {}", err);
                    ctx.deps.metrics.connection_errors.inc();
                    return;
                }
                Err(_) => {
                    warn!("tls handshake timeout");
                    ctx.deps.metrics.connection_errors.inc();
                    return;
                }
            };
            handle_tls(tls_stream, ctx).await;
        });
    }
}

async fn handle_plain(stream: TcpStream, ctx: Arc<ListenerCtx>) {
    // Peek at the first bytes to tell a plain HTTP request from a
    // WebSocket upgrade without consuming the stream. A connection that
    // sends nothing is dropped when the window expires.
    let mut sniff = [0u8; HEAD_SNIFF_SIZE];
    let peeked = match timeout(ctx.deps.auth_window, stream.peek(&mut sniff)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("connection sent no data before the auth window expired");
            ctx.deps.metrics.connection_errors.inc();
            return;
        }
    };
    match peeked {
        Ok(n) if n > 0 => {
            let head = String::from_utf8_lossy(&sniff[..n]).to_ascii_lowercase();
            if is_plain_get(&head) {
                respond_http(stream, &head, &ctx, false).await;
                return;
            }
        }
        _ => {}
    }
    accept_ws(stream, ctx).await;
}

async fn handle_tls(mut tls_stream: TlsStream<TcpStream>, ctx: Arc<ListenerCtx>) {
    // TLS streams cannot peek; read the head and replay it for the
    // WebSocket handshake.
    let mut sniff = vec![0u8; HEAD_SNIFF_SIZE];
    let n = match timeout(ctx.deps.auth_window, tls_stream.read(&mut sniff)).await {
        Ok(Ok(0)) | Ok(Err(_)) => return,
        Ok(Ok(n)) => n,
        Err(_) => {
            warn!("tls connection sent no data before the auth window expired");
            ctx.deps.metrics.connection_errors.inc();
            return;
        }
    };
    sniff.truncate(n);

    let head = String::from_utf8_lossy(&sniff).to_ascii_lowercase();
    if is_plain_get(&head) {
        respond_http(tls_stream, &head, &ctx, true).await;
        return;
    }
    accept_ws(PrefixedStream::new(sniff, tls_stream), ctx).await;
}

/// True for an HTTP GET that is not a WebSocket upgrade.
fn is_plain_get(head_lower: &str) -> bool {
    head_lower.starts_with("get ")
        && !(head_lower.contains("upgrade: websocket") && head_lower.contains("connection:"))
}

async fn respond_http<S>(mut stream: S, head_lower: &str, ctx: &ListenerCtx, over_tls: bool)
where
    S: AsyncWrite + Unpin,
{
    let (content_type, body) = if head_lower.starts_with("get /health") {
        (
            "application/json",
            health_json(&ctx.deps.core, ctx.service_port).to_string(),
        )
    } else if over_tls {
        // Browsers land here after accepting the self-signed certificate.
        ("text/html", TRUST_PAGE.to_string())
    } else {
        (
            "application/json",
            r#"{"error":"This is a WebSocket relay endpoint"}"#.to_string(),
        )
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn accept_ws<S>(stream: S, ctx: Arc<ListenerCtx>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(ctx.deps.auth_window, accept_async(stream)).await {
        Ok(Ok(ws_stream)) => {
            ctx.deps.metrics.connections_total.inc();
            ctx.deps.metrics.connections_active.inc();
            handler::handle_connection(ws_stream, ctx.deps.clone()).await;
            ctx.deps.metrics.connections_active.dec();
        }
        Ok(Err(err)) => {
            debug!("websocket handshake failed: {}", err);
            ctx.deps.metrics.connection_errors.inc();
        }
        Err(_) => {
            warn!("websocket handshake timeout");
            ctx.deps.metrics.connection_errors.inc();
        }
    }
}

/// Replays bytes consumed while sniffing the request head, then delegates
/// to the inner stream.
struct PrefixedStream<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> PrefixedStream<S> {
    fn new(prefix: Vec<u8>, inner: S) -> Self {
        PrefixedStream {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let remaining = &this.prefix[this.pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
