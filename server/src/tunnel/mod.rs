//! Tunnel endpoint.
//!
//! The gateway only *routes* tunnel connections: once the WebSocket
//! handshake on the tunnel path completes, the socket is handed to a
//! [`TunnelHandler`] and the gateway takes no further part in its lifetime.
//! The handler receives the operator's [`TunnelOptions`] verbatim.
//!
//! - `relay.rs` — [`relay::RelayTunnel`], forwards frames to an upstream
//!   tunnel-protocol server

pub mod relay;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{ws::WebSocket, ConnectInfo, FromRequestParts, Request, State, WebSocketUpgrade},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::config::TunnelConfig;
use crate::serve::is_upgrade;
use crate::state::GatewayState;

/// Options the tunnel handler is configured with. The gateway never
/// interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelOptions {
    pub allow_udp_streams: bool,
    pub hostname_blacklist: Vec<String>,
    pub dns_servers: Vec<String>,
}

impl From<&TunnelConfig> for TunnelOptions {
    fn from(config: &TunnelConfig) -> Self {
        Self {
            allow_udp_streams: config.allow_udp_streams,
            hostname_blacklist: config.hostname_blacklist.clone(),
            dns_servers: config.dns_servers.clone(),
        }
    }
}

/// Identity of one tunnel connection, for the handler's logging.
#[derive(Debug, Clone)]
pub struct TunnelPeer {
    pub id: Uuid,
    pub addr: Option<SocketAddr>,
    pub origin: Option<String>,
}

/// Terminates an upgraded tunnel connection.
#[async_trait]
pub trait TunnelHandler: Send + Sync + 'static {
    /// Own `socket` until the tunnel closes.
    async fn serve(&self, socket: WebSocket, peer: TunnelPeer);
}

/// `GET <tunnel path>` with `Upgrade: websocket`: complete the handshake and
/// hand the socket to the tunnel handler.
///
/// Only reachable for requests that passed the connection-level upgrade
/// allow-list and the whole middleware pipeline. A plain (non-upgrade) request
/// for the tunnel path gets the 404 page, like any other unknown URL.
pub async fn tunnel_upgrade(State(state): State<GatewayState>, request: Request) -> Response {
    if !is_upgrade(request.headers()) {
        return state.not_found.response();
    }

    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let peer = TunnelPeer {
        id: Uuid::new_v4(),
        addr: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
        origin: parts
            .headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    let handler = Arc::clone(&state.tunnel);
    let span = info_span!("tunnel", id = %peer.id);
    ws.on_upgrade(move |socket| async move { handler.serve(socket, peer).await }.instrument(span))
}
