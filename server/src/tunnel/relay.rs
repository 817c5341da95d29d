//! Tunnel relay: forwards every tunnel frame to an upstream server.
//!
//! The tunnel wire protocol is terminated upstream, so frames are copied
//! verbatim in both directions. The relay stops when either side closes or
//! errors; the other side is then closed too.
//!
//! The upstream applies the operator's [`TunnelOptions`]; they travel as JSON
//! in the `x-tunnel-options` header of every upstream handshake.

use async_trait::async_trait;
use axum::extract::ws::{self, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::HeaderValue,
    protocol::{frame::coding::CloseCode, CloseFrame},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{TunnelHandler, TunnelOptions, TunnelPeer};

/// WebSocket close code sent when the tunnel cannot be served.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Handshake header carrying the serialised [`TunnelOptions`].
pub const OPTIONS_HEADER: &str = "x-tunnel-options";

pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no upstream tunnel server configured")]
    NoUpstream,
    #[error("failed to encode tunnel options: {0}")]
    Options(#[from] serde_json::Error),
    #[error("tunnel options are not a valid header value")]
    OptionsHeader,
    #[error("upstream handshake failed: {0}")]
    Handshake(Box<tungstenite::Error>),
}

/// [`TunnelHandler`] that relays to `upstream_url`.
pub struct RelayTunnel {
    upstream_url: Option<String>,
    options: TunnelOptions,
}

impl RelayTunnel {
    pub fn new(upstream_url: Option<String>, options: TunnelOptions) -> Self {
        Self {
            upstream_url,
            options,
        }
    }

    pub fn options(&self) -> &TunnelOptions {
        &self.options
    }

    /// Open the upstream socket, announcing the tunnel options.
    pub async fn connect_upstream(&self) -> Result<UpstreamStream, RelayError> {
        let url = self.upstream_url.as_deref().ok_or(RelayError::NoUpstream)?;
        let mut request = url
            .into_client_request()
            .map_err(|e| RelayError::Handshake(Box::new(e)))?;
        let options = serde_json::to_string(&self.options)?;
        let value = HeaderValue::from_str(&options).map_err(|_| RelayError::OptionsHeader)?;
        request.headers_mut().insert(OPTIONS_HEADER, value);

        let (upstream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RelayError::Handshake(Box::new(e)))?;
        Ok(upstream)
    }
}

#[async_trait]
impl TunnelHandler for RelayTunnel {
    async fn serve(&self, mut socket: WebSocket, peer: TunnelPeer) {
        debug!(addr = ?peer.addr, origin = ?peer.origin, options = ?self.options, "tunnel opened");

        let upstream = match self.connect_upstream().await {
            Ok(upstream) => upstream,
            Err(RelayError::NoUpstream) => {
                warn!("no upstream tunnel server configured, closing tunnel");
                close_with(&mut socket, CLOSE_INTERNAL_ERROR, "no upstream tunnel server").await;
                return;
            }
            Err(e) => {
                warn!(upstream = ?self.upstream_url, "upstream connect failed: {e}");
                close_with(&mut socket, CLOSE_INTERNAL_ERROR, "upstream unavailable").await;
                return;
            }
        };

        let (mut client_tx, mut client_rx) = socket.split();
        let (mut upstream_tx, mut upstream_rx) = upstream.split();

        let to_upstream = async {
            while let Some(Ok(msg)) = client_rx.next().await {
                let closing = matches!(msg, ws::Message::Close(_));
                if upstream_tx.send(to_upstream_message(msg)).await.is_err() || closing {
                    break;
                }
            }
            let _ = upstream_tx.close().await;
        };

        let to_client = async {
            while let Some(Ok(msg)) = upstream_rx.next().await {
                let closing = matches!(msg, tungstenite::Message::Close(_));
                let Some(msg) = to_client_message(msg) else {
                    continue;
                };
                if client_tx.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = client_tx.close().await;
        };

        tokio::select! {
            () = to_upstream => {}
            () = to_client => {}
        }
        info!(addr = ?peer.addr, "tunnel closed");
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(ws::Message::Close(Some(ws::CloseFrame {
            code,
            reason: ws::Utf8Bytes::from_static(reason),
        })))
        .await;
}

fn to_upstream_message(msg: ws::Message) -> tungstenite::Message {
    match msg {
        ws::Message::Text(text) => tungstenite::Message::Text(text.as_str().to_owned().into()),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => tungstenite::Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

/// Raw frames never surface from a read; they map to `None`.
fn to_client_message(msg: tungstenite::Message) -> Option<ws::Message> {
    Some(match msg {
        tungstenite::Message::Text(text) => ws::Message::Text(text.as_str().to_owned().into()),
        tungstenite::Message::Binary(data) => ws::Message::Binary(data),
        tungstenite::Message::Ping(data) => ws::Message::Ping(data),
        tungstenite::Message::Pong(data) => ws::Message::Pong(data),
        tungstenite::Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
        tungstenite::Message::Frame(_) => return None,
    })
}
