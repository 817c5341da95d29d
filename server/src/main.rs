#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # tabgate
//!
//! Authenticated gateway in front of a same-origin rewriting proxy.
//!
//! tabgate serves the proxy's static asset trees and routes exactly one
//! WebSocket upgrade path to the tunnel handler. Every request passes the
//! same pipeline: origin policy, per-client rate limit, HTTP Basic auth.
//!
//! ## Surface
//!
//! | Method  | Path            | Description                                   |
//! |---------|-----------------|-----------------------------------------------|
//! | GET     | `/uidfhsuid/*`  | Front-end and service worker (cross-origin)   |
//! | GET     | `/scram/*`      | Rewriting engine bundle                       |
//! | GET     | `/libcurl/*`    | Transport module                              |
//! | GET     | `/baremux/*`    | Transport multiplexer                         |
//! | GET     | `/wisp/`        | Tunnel upgrade (any other upgrade is dropped) |
//!
//! Anything else gets the 404 page.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, tracing, listener, sweep task, shutdown
//! config.rs        — TOML + env-var configuration
//! serve.rs         — hyper accept loop, upgrade allow-list
//! router.rs        — pipeline assembly
//! cors.rs          — origin policy
//! ratelimit.rs     — per-client fixed window, bans
//! auth.rs          — HTTP Basic middleware, constant-time comparison
//! assets.rs        — asset mounts, cross-origin headers, 404 page
//! tunnel/
//!   mod.rs         — upgrade handler, TunnelHandler trait
//!   relay.rs       — relays tunnel frames to an upstream server
//! ```

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use tabgate::{build_router, serve, Config, GatewayState, UpgradeGate};

/// Authenticated gateway for a same-origin rewriting proxy.
#[derive(Parser)]
#[command(name = "tabgate", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tabgate: {e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!(
            "{},tabgate::tunnel={}",
            config.logging.level, config.tunnel.log_level
        )
    });
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("tabgate v{} starting", env!("CARGO_PKG_VERSION"));

    if !config.has_credentials() {
        warn!("No credentials configured; every request will be rejected; set PROXY_USER and PROXY_PASS");
    }
    if config.tunnel.upstream_url.is_none() {
        warn!("No upstream tunnel server configured; tunnel connections will be closed");
    }

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let state = GatewayState::new(config);
    let app = build_router(&state);
    let gate = UpgradeGate::new(state.config.tunnel.path.clone());

    let listener = match TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {bind}: {e}");
            std::process::exit(1);
        }
    };
    if let Ok(addr) = listener.local_addr() {
        log_listening(addr);
    }

    // Periodic sweep: forget clients whose window has lapsed
    let limiter = state.limiter.clone();
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window());
        loop {
            interval.tick().await;
            let dropped = limiter.sweep(std::time::Instant::now());
            if dropped > 0 {
                tracing::debug!(dropped, remaining = limiter.tracked(), "rate-limit sweep");
            }
        }
    });

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Failed to register SIGTERM: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("signal received: closing HTTP server");
    };

    serve(listener, app, gate, shutdown).await;

    sweep_task.abort();
    std::process::exit(0);
}

fn log_listening(addr: SocketAddr) {
    let port = addr.port();
    info!("Listening on:");
    info!("\thttp://localhost:{port}");
    if let Some(host) = hostname() {
        info!("\thttp://{host}:{port}");
    }
    match addr {
        SocketAddr::V6(v6) => info!("\thttp://[{}]:{port}", v6.ip()),
        SocketAddr::V4(v4) => info!("\thttp://{}:{port}", v4.ip()),
    }
}

fn hostname() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}
