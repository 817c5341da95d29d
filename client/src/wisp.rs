//! Tunnel transport over the gateway's WebSocket endpoint.
//!
//! [`WispTransport`] is the [`TransportController`] this binary ships.
//! Setting a transport dials the first endpoint with the gateway's Basic
//! credentials and keeps the socket open as the active transport. A socket
//! that closes makes the transport unset again, so the binder reconfigures
//! on the next navigation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::transport::{EndpointDescriptor, TransportController, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct ActiveTransport {
    id: String,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

pub struct WispTransport {
    authorization: Option<String>,
    active: Mutex<Option<ActiveTransport>>,
}

impl WispTransport {
    pub fn new(credentials: Option<(&str, &str)>) -> Self {
        let authorization = credentials.map(|(user, pass)| {
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
            )
        });
        Self {
            authorization,
            active: Mutex::new(None),
        }
    }

    async fn dial(&self, endpoint: &EndpointDescriptor) -> Result<WsStream, TransportError> {
        let mut request = endpoint
            .websocket
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if let Some(auth) = &self.authorization {
            let value = HeaderValue::from_str(auth)
                .map_err(|e| TransportError::Connect(format!("bad credentials: {e}")))?;
            request.headers_mut().insert("authorization", value);
        }

        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(stream)
    }
}

#[async_trait]
impl TransportController for WispTransport {
    async fn get_transport(&self) -> Option<String> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|t| t.alive.load(Ordering::SeqCst))
            .map(|t| t.id.clone())
    }

    async fn set_transport(
        &self,
        transport_id: &str,
        endpoints: &[EndpointDescriptor],
    ) -> Result<(), TransportError> {
        let endpoint = endpoints.first().ok_or(TransportError::NoEndpoint)?;
        let stream = self.dial(endpoint).await?;
        info!(transport = transport_id, endpoint = %endpoint.websocket, "tunnel transport open");

        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(drain(stream, Arc::clone(&alive)));

        let previous = self.active.lock().await.replace(ActiveTransport {
            id: transport_id.to_string(),
            alive,
            reader,
        });
        if let Some(previous) = previous {
            previous.reader.abort();
        }
        Ok(())
    }
}

impl Drop for WispTransport {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.reader.abort();
        }
    }
}

/// Keep the socket serviced until the gateway closes it.
async fn drain(mut stream: WsStream, alive: Arc<AtomicBool>) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    alive.store(false, Ordering::SeqCst);
    debug!("tunnel transport closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    /// Accepts one WebSocket, reports its Authorization header, then closes
    /// it when `close` fires.
    async fn tunnel_server() -> (String, mpsc::UnboundedReceiver<Option<String>>, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let report = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = tx.send(auth);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, report)
                .await
                .unwrap();
            let _ = close_rx.await;
            let _ = ws.close(None).await;
        });
        (format!("ws://{addr}/wisp/"), rx, close_tx)
    }

    #[tokio::test]
    async fn set_transport_dials_with_credentials() {
        let (url, mut auth, _close) = tunnel_server().await;
        let transport = WispTransport::new(Some(("alice", "hunter2")));
        assert_eq!(transport.get_transport().await, None);

        transport
            .set_transport("/libcurl/index.mjs", &[EndpointDescriptor { websocket: url }])
            .await
            .unwrap();

        assert_eq!(
            auth.recv().await.unwrap().as_deref(),
            Some("Basic YWxpY2U6aHVudGVyMg==")
        );
        assert_eq!(
            transport.get_transport().await.as_deref(),
            Some("/libcurl/index.mjs")
        );
    }

    #[tokio::test]
    async fn closed_socket_unsets_transport() {
        let (url, _auth, close) = tunnel_server().await;
        let transport = WispTransport::new(None);
        transport
            .set_transport("/libcurl/index.mjs", &[EndpointDescriptor { websocket: url }])
            .await
            .unwrap();

        close.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.get_transport().await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WispTransport::new(None);
        let err = transport
            .set_transport(
                "/libcurl/index.mjs",
                &[EndpointDescriptor {
                    websocket: format!("ws://{addr}/wisp/"),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
        assert_eq!(transport.get_transport().await, None);

        let err = transport.set_transport("id", &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::NoEndpoint));
    }
}
