//! Shared gateway state passed to handlers and middleware.

use std::sync::Arc;

use crate::assets::NotFoundPage;
use crate::config::Config;
use crate::cors::OriginPolicy;
use crate::ratelimit::RateLimiter;
use crate::tunnel::relay::RelayTunnel;
use crate::tunnel::{TunnelHandler, TunnelOptions};

/// Shared application state for the gateway.
///
/// Cloneable; everything mutable lives behind an `Arc`.
#[derive(Clone)]
pub struct GatewayState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Per-client request counters.
    pub limiter: Arc<RateLimiter>,
    /// Origin allow-list shared by the CORS layer and the enforcement stage.
    pub origins: Arc<OriginPolicy>,
    /// 404 document, read once.
    pub not_found: Arc<NotFoundPage>,
    /// Receives every upgraded tunnel connection.
    pub tunnel: Arc<dyn TunnelHandler>,
}

impl GatewayState {
    /// Build state with the relay tunnel handler described by `config.tunnel`.
    pub fn new(config: Config) -> Self {
        let tunnel = Arc::new(RelayTunnel::new(
            config.tunnel.upstream_url.clone(),
            TunnelOptions::from(&config.tunnel),
        ));
        Self::with_tunnel(config, tunnel)
    }

    /// Build state around a caller-supplied tunnel handler.
    pub fn with_tunnel(config: Config, tunnel: Arc<dyn TunnelHandler>) -> Self {
        let not_found = Arc::new(NotFoundPage::load(&config.assets.not_found_page));
        Self::from_parts(config, tunnel, not_found)
    }

    pub fn from_parts(
        config: Config,
        tunnel: Arc<dyn TunnelHandler>,
        not_found: Arc<NotFoundPage>,
    ) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            origins: Arc::new(OriginPolicy::new(
                &config.cors.allowed_hosts,
                config.cors.enforce,
            )),
            not_found,
            tunnel,
            config: Arc::new(config),
        }
    }
}
