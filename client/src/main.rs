//! # tabgate-client
//!
//! Headless multi-tab browsing session for a tabgate gateway. Reads one JSON
//! command per line on stdin and writes state snapshots and frame events to
//! stdout; logs go to stderr.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, config loading, boot tab, dispatch loop
//! config.rs        — JSON file / env-var configuration loading
//! events.rs        — stdin command dispatch, stdout writer
//! navigation.rs    — Browser: navigate, back/forward, submit guard
//! tabs.rs          — tab history and the session registry
//! chrome.rs        — selectors, address field, theme, status line
//! frame.rs         — render surface traits, headless frames
//! transport.rs     — transport binder with in-flight guard
//! wisp.rs          — tunnel WebSocket transport
//! readiness.rs     — worker script readiness probe
//! search.rs        — address input → URL
//! ```

mod chrome;
mod config;
mod events;
mod frame;
mod navigation;
mod readiness;
mod search;
mod tabs;
mod transport;
mod wisp;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Cli;
use frame::HeadlessFrames;
use navigation::{Browser, BrowserParts};
use readiness::AssetProbe;
use search::{SearchEngines, SearchResolver};
use transport::{TransportBinder, TransportTarget};
use wisp::WispTransport;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match config::load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("tabgate-client: configuration error: {e}");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let target = match TransportTarget::for_gateway(
        &config.gateway_url,
        &config.transport_id,
        &config.tunnel_path,
    ) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("tabgate-client: configuration error: {e}");
            std::process::exit(1);
        }
    };

    let credentials = config
        .credentials()
        .map(|(u, p)| (u.to_string(), p.to_string()));
    if credentials.is_none() {
        warn!("no gateway credentials configured; the gateway will answer 401");
    }
    let registrar = match AssetProbe::new(config.worker_url(), credentials) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("tabgate-client: failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    let (out, events) = mpsc::unbounded_channel();
    let writer = tokio::spawn(events::write_events(events, tokio::io::stdout()));

    let mut browser = Browser::new(BrowserParts {
        frames: Box::new(HeadlessFrames::new(out.clone())),
        registrar: Box::new(registrar),
        binder: TransportBinder::new(Box::new(WispTransport::new(config.credentials()))),
        target,
        resolver: Box::new(SearchResolver),
        engines: SearchEngines::new(config.search_engines.clone(), config.default_engine.clone()),
    });

    info!(gateway = %config.gateway_url, "booting");
    if let Err(e) = browser.open_tab(Some(&config.home_url)).await {
        warn!("boot tab failed: {e}");
    }
    let transport = browser.transport_state().await;
    let _ = out.send(events::snapshot(&browser, &transport));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    events::run(&mut browser, stdin, &out).await;

    // Closing the outbox lets the writer drain and finish.
    drop(browser);
    drop(out);
    let _ = writer.await;
}
