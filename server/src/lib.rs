#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::unused_async)]

//! tabgate library: the gateway's building blocks, exposed so the binary
//! and integration harnesses assemble the same pipeline.
//!
//! - `config` — TOML + env-var configuration
//! - `auth` — HTTP Basic authentication middleware
//! - `cors` — origin policy and CORS layer
//! - `ratelimit` — fixed-window per-client limiter with bans
//! - `assets` — static asset trees and the 404 page
//! - `tunnel` — tunnel hand-off after the WebSocket handshake
//! - `router` — pipeline assembly
//! - `serve` — accept loop and upgrade allow-list

pub mod assets;
pub mod auth;
pub mod config;
pub mod cors;
pub mod ratelimit;
pub mod router;
pub mod serve;
pub mod state;
pub mod tunnel;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use router::build_router;
pub use serve::{serve, UpgradeGate};
pub use state::GatewayState;
