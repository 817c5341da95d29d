//! Connection layer: the accept loop and the upgrade allow-list.
//!
//! `axum::serve` answers every request it accepts, so a refused upgrade would
//! still see a status line. The gateway runs its own hyper accept loop
//! instead. Each request first passes [`UpgradeGate::admit`]; a refusal is
//! returned as a service error, which makes hyper drop the connection before
//! anything is written. Admitted requests get `ConnectInfo` and go through
//! the router unchanged.

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{header, HeaderMap, Request},
    Router,
};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tracing::{debug, warn};

/// An upgrade request for a path other than the tunnel path.
#[derive(Debug, thiserror::Error)]
#[error("upgrade refused for path {path}")]
pub struct UpgradeRejected {
    pub path: String,
}

/// `true` when the request asks for a protocol switch.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::UPGRADE) {
        return true;
    }
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Allow-list for upgrade requests: exactly one path may upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeGate {
    path: String,
}

impl UpgradeGate {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Normal requests always pass. Upgrades pass only for the exact tunnel
    /// path; the query string is ignored.
    pub fn admit<B>(&self, request: &Request<B>) -> Result<(), UpgradeRejected> {
        if !is_upgrade(request.headers()) || request.uri().path() == self.path {
            return Ok(());
        }
        Err(UpgradeRejected {
            path: request.uri().path().to_string(),
        })
    }
}

/// Accept connections on `listener` until `shutdown` resolves.
///
/// Each connection runs on its own task. Connections already accepted keep
/// running after shutdown; they are not drained.
pub async fn serve<F>(listener: TcpListener, app: Router, gate: UpgradeGate, shutdown: F)
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            },
        };

        let app = app.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let app = app.clone();
                let admitted = gate.admit(&request);
                async move {
                    if let Err(rejected) = admitted {
                        debug!(%peer, path = %rejected.path, "closing connection on refused upgrade");
                        return Err(rejected);
                    }
                    let mut request = request;
                    request.extensions_mut().insert(ConnectInfo(peer));
                    match app.oneshot(request).await {
                        Ok(response) => Ok(response),
                        Err(never) => match never {},
                    }
                }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await
            {
                debug!(%peer, "connection ended: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::NotFoundPage;
    use crate::config::Config;
    use crate::router::build_router;
    use crate::state::GatewayState;
    use crate::tunnel::{TunnelHandler, TunnelPeer};
    use async_trait::async_trait;
    use axum::{body::Body, extract::ws::WebSocket, http::HeaderValue};
    use base64::Engine;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn detects_upgrade_headers() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade(&headers));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_upgrade(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!is_upgrade(&headers));
    }

    #[test]
    fn gate_allows_only_exact_tunnel_path() {
        let gate = UpgradeGate::new("/wisp/");
        assert!(gate.admit(&upgrade_request("/wisp/")).is_ok());
        assert!(gate.admit(&upgrade_request("/wisp/?v=2")).is_ok());
        assert!(gate.admit(&upgrade_request("/wisp")).is_err());
        assert!(gate.admit(&upgrade_request("/wisp/extra")).is_err());
        assert!(gate.admit(&upgrade_request("/other/")).is_err());

        let plain = Request::builder().uri("/other/").body(Body::empty()).unwrap();
        assert!(gate.admit(&plain).is_ok());
    }

    struct ReportingTunnel(mpsc::UnboundedSender<TunnelPeer>);

    #[async_trait]
    impl TunnelHandler for ReportingTunnel {
        async fn serve(&self, _socket: WebSocket, peer: TunnelPeer) {
            let _ = self.0.send(peer);
        }
    }

    async fn spawn_gateway() -> (SocketAddr, mpsc::UnboundedReceiver<TunnelPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = Config::default();
        config.auth.username = Some("alice".to_string());
        config.auth.password = Some("hunter2".to_string());
        let state = GatewayState::from_parts(
            config,
            Arc::new(ReportingTunnel(tx)),
            Arc::new(NotFoundPage::builtin()),
        );
        let app = build_router(&state);
        let gate = UpgradeGate::new(state.config.tunnel.path.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, app, gate, std::future::pending()));
        (addr, rx)
    }

    fn basic() -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("alice:hunter2")
        )
    }

    #[tokio::test]
    async fn refused_upgrade_closes_without_bytes() {
        let (addr, _rx) = spawn_gateway().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /elsewhere/ HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Authorization: {}\r\n\r\n",
            basic()
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut received = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
            .await
            .expect("connection should close promptly");
        // A reset is as good as an orderly close here.
        if read.is_ok() {
            assert!(received.is_empty(), "got {:?}", String::from_utf8_lossy(&received));
        }
    }

    #[tokio::test]
    async fn tunnel_upgrade_reaches_handler() {
        let (addr, mut rx) = spawn_gateway().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut request = format!("ws://{addr}/wisp/").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("authorization", basic().parse().unwrap());

        let (_socket, response) = tokio_tungstenite::client_async(request, stream)
            .await
            .unwrap();
        assert_eq!(response.status(), 101);
        assert_eq!(
            response.headers()["cross-origin-opener-policy"],
            "same-origin"
        );

        let peer = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(peer.addr.is_some());
    }

    #[tokio::test]
    async fn tunnel_upgrade_without_credentials_is_unauthorized() {
        let (addr, mut rx) = spawn_gateway().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("ws://{addr}/wisp/").into_client_request().unwrap();

        let err = tokio_tungstenite::client_async(request, stream)
            .await
            .unwrap_err();
        match err {
            tokio_tungstenite::tungstenite::Error::Http(response) => {
                assert_eq!(response.status(), 401);
            }
            other => panic!("expected HTTP error, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn normal_requests_still_served() {
        let (addr, _rx) = spawn_gateway().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /nowhere HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nAuthorization: {}\r\n\r\n",
            basic()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("HTTP/1.1 404"), "{text}");
    }
}
