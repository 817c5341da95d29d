//! Transport binder.
//!
//! Every page load travels through one tunnel transport. Before a tab
//! navigates, [`TransportBinder::ensure_transport`] makes sure the transport
//! controller is bound to the configured transport module and tunnel
//! endpoint, configuring it lazily on first use.
//!
//! The binder holds its state mutex across the whole read-check-set
//! sequence. A second caller arriving while a configuration attempt is in
//! flight waits for it and then sees the configured transport, so the
//! controller is configured at most once per change.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid gateway url {url}: {source}")]
    InvalidGateway {
        url: String,
        source: url::ParseError,
    },
    #[error("unsupported gateway scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("no tunnel endpoint given")]
    NoEndpoint,
    #[error("tunnel connect failed: {0}")]
    Connect(String),
}

/// One endpoint the transport may dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDescriptor {
    pub websocket: String,
}

/// The transport a tab needs before it may navigate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTarget {
    pub transport_id: String,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl TransportTarget {
    /// Target for the tunnel of the gateway at `base_url`: `ws://` for an
    /// `http` gateway, `wss://` for `https`, same host and port.
    pub fn for_gateway(
        base_url: &str,
        transport_id: &str,
        tunnel_path: &str,
    ) -> Result<Self, TransportError> {
        let mut url = url::Url::parse(base_url).map_err(|source| TransportError::InvalidGateway {
            url: base_url.to_string(),
            source,
        })?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(TransportError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| TransportError::UnsupportedScheme(scheme.to_string()))?;
        url.set_path(tunnel_path);
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self {
            transport_id: transport_id.to_string(),
            endpoints: vec![EndpointDescriptor {
                websocket: url.to_string(),
            }],
        })
    }
}

/// Transport negotiation library.
#[async_trait]
pub trait TransportController: Send + Sync {
    /// Identifier of the transport currently in use, if any.
    async fn get_transport(&self) -> Option<String>;

    /// Switch to `transport_id`, dialing `endpoints`.
    async fn set_transport(
        &self,
        transport_id: &str,
        endpoints: &[EndpointDescriptor],
    ) -> Result<(), TransportError>;
}

/// What the binder last observed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportState {
    pub current_transport_id: Option<String>,
    pub configured: bool,
}

struct BinderInner {
    controller: Box<dyn TransportController>,
    state: Mutex<TransportState>,
}

/// Guards navigation behind a configured transport. Cheap to clone.
#[derive(Clone)]
pub struct TransportBinder {
    inner: Arc<BinderInner>,
}

impl TransportBinder {
    pub fn new(controller: Box<dyn TransportController>) -> Self {
        Self {
            inner: Arc::new(BinderInner {
                controller,
                state: Mutex::new(TransportState::default()),
            }),
        }
    }

    /// Make sure `target` is the active transport.
    ///
    /// No-op when the controller already reports `target.transport_id`.
    /// Otherwise configures it once and awaits the result. Failures are
    /// returned unchanged and leave the state untouched; there is no retry.
    pub async fn ensure_transport(&self, target: &TransportTarget) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;

        let current = self.inner.controller.get_transport().await;
        if current.as_deref() == Some(target.transport_id.as_str()) {
            state.current_transport_id = current;
            state.configured = true;
            return Ok(());
        }

        debug!(transport = %target.transport_id, ?current, "configuring transport");
        self.inner
            .controller
            .set_transport(&target.transport_id, &target.endpoints)
            .await?;

        info!(transport = %target.transport_id, "transport configured");
        state.current_transport_id = Some(target.transport_id.clone());
        state.configured = true;
        Ok(())
    }

    /// Snapshot of the binder's state.
    pub async fn state(&self) -> TransportState {
        self.inner.state.lock().await.clone()
    }
}
