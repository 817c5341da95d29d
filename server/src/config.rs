//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `PORT`, `PROXY_USER`, `PROXY_PASS`,
//!    `TABGATE_UPSTREAM`
//! 2. **Config file** — path via `--config <path>`, or `tabgate.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [auth]
//! username = "admin"
//! password = "secret"
//!
//! [cors]
//! allowed_hosts = ["pythonanywhere.com"]
//!
//! [rate_limit]
//! max_requests = 30
//! window_secs = 60
//! ban_after = 5
//!
//! [[assets.mounts]]
//! prefix = "/uidfhsuid/"
//! root = "public"
//! policy = "service-worker"
//!
//! [tunnel]
//! path = "/wisp/"
//! upstream_url = "ws://127.0.0.1:6001/"
//! allow_udp_streams = false
//! hostname_blacklist = ["example\\.com"]
//! dns_servers = ["1.1.1.3", "1.0.0.3"]
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("asset prefix '{0}' must start and end with '/'")]
    InvalidPrefix(String),
    #[error("asset prefix '/' would shadow every route; mount under a named prefix")]
    RootMount,
    #[error("path '{0}' contains route syntax ('{{', '}}' or '*')")]
    RouteSyntax(String),
    #[error("asset mounts '{0}' and '{1}' overlap")]
    OverlappingMounts(String, String),
    #[error("tunnel path '{0}' must start with '/'")]
    InvalidTunnelPath(String),
    #[error("rate_limit.window_secs must be greater than zero")]
    ZeroWindow,
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind (default `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port (default 8080). Override with `PORT`.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// HTTP Basic credentials every request must carry.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Override with `PROXY_USER`. `None` rejects every request.
    pub username: Option<String>,
    /// Override with `PROXY_PASS`. `None` rejects every request.
    pub password: Option<String>,
    /// Realm sent in the `WWW-Authenticate` challenge (default `tabgate`).
    #[serde(default = "default_realm")]
    pub realm: String,
}

/// Origin policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Hostname patterns allowed to make credentialed cross-origin requests.
    /// `*` matches any run of characters; a bare domain also matches its
    /// subdomains.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
    /// Reject disallowed origins with 403 instead of only withholding the
    /// CORS headers (default true).
    #[serde(default = "default_true")]
    pub enforce: bool,
}

/// Per-client fixed-window rate limiting.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window (default 30).
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window length in seconds (default 60).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Over-limit requests tolerated within one window before a ban (default 5).
    #[serde(default = "default_ban_after")]
    pub ban_after: u32,
    /// Ban length in seconds (default: one window).
    pub ban_secs: Option<u64>,
    /// Key clients by the first `X-Forwarded-For` hop instead of the peer
    /// address (default false).
    #[serde(default)]
    pub trust_proxy: bool,
}

/// Cross-origin header policy attached to a mount's responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetPolicy {
    /// `Cross-Origin-Resource-Policy: cross-origin`; service-worker scripts
    /// must be fetchable cross-origin.
    ServiceWorker,
    /// `Cross-Origin-Resource-Policy: same-origin`.
    SameOrigin,
}

/// One URL prefix served from one directory.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetMount {
    /// URL prefix, with leading and trailing `/`.
    pub prefix: String,
    /// Directory the prefix maps to.
    pub root: PathBuf,
    pub policy: AssetPolicy,
}

/// Static asset trees.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_mounts")]
    pub mounts: Vec<AssetMount>,
    /// HTML document served for unmatched requests (default `public/404.html`).
    #[serde(default = "default_not_found_page")]
    pub not_found_page: PathBuf,
}

/// Tunnel endpoint and the options handed to the tunnel handler verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// The only path accepted for protocol upgrades (default `/wisp/`).
    #[serde(default = "default_tunnel_path")]
    pub path: String,
    /// Upstream tunnel-protocol server. Override with `TABGATE_UPSTREAM`.
    pub upstream_url: Option<String>,
    #[serde(default)]
    pub allow_udp_streams: bool,
    #[serde(default = "default_hostname_blacklist")]
    pub hostname_blacklist: Vec<String>,
    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<String>,
    /// tracing level for the `tabgate::tunnel` target (default `off`).
    #[serde(default = "default_tunnel_log_level")]
    pub log_level: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_realm() -> String {
    "tabgate".to_string()
}
fn default_allowed_hosts() -> Vec<String> {
    vec!["pythonanywhere.com".to_string()]
}
fn default_true() -> bool {
    true
}
fn default_max_requests() -> u32 {
    30
}
fn default_window_secs() -> u64 {
    60
}
fn default_ban_after() -> u32 {
    5
}
fn default_mounts() -> Vec<AssetMount> {
    vec![
        AssetMount {
            prefix: "/uidfhsuid/".to_string(),
            root: PathBuf::from("public"),
            policy: AssetPolicy::ServiceWorker,
        },
        AssetMount {
            prefix: "/scram/".to_string(),
            root: PathBuf::from("vendor/scramjet"),
            policy: AssetPolicy::SameOrigin,
        },
        AssetMount {
            prefix: "/libcurl/".to_string(),
            root: PathBuf::from("vendor/libcurl"),
            policy: AssetPolicy::SameOrigin,
        },
        AssetMount {
            prefix: "/baremux/".to_string(),
            root: PathBuf::from("vendor/baremux"),
            policy: AssetPolicy::SameOrigin,
        },
    ]
}
fn default_not_found_page() -> PathBuf {
    PathBuf::from("public/404.html")
}
fn default_tunnel_path() -> String {
    "/wisp/".to_string()
}
fn default_hostname_blacklist() -> Vec<String> {
    vec![r"example\.com".to_string()]
}
fn default_dns_servers() -> Vec<String> {
    vec!["1.1.1.3".to_string(), "1.0.0.3".to_string()]
}
fn default_tunnel_log_level() -> String {
    "off".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            realm: default_realm(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: default_allowed_hosts(),
            enforce: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            ban_after: default_ban_after(),
            ban_secs: None,
            trust_proxy: false,
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            mounts: default_mounts(),
            not_found_page: default_not_found_page(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            path: default_tunnel_path(),
            upstream_url: None,
            allow_udp_streams: false,
            hostname_blacklist: default_hostname_blacklist(),
            dns_servers: default_dns_servers(),
            log_level: default_tunnel_log_level(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RateLimitConfig {
    /// Effective ban length, falling back to one window.
    pub fn ban_secs(&self) -> u64 {
        self.ban_secs.unwrap_or(self.window_secs)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `tabgate.toml` in
    /// the current directory is used when present, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = if let Some(p) = path {
            Self::from_file(Path::new(p))?
        } else if Path::new("tabgate.toml").exists() {
            Self::from_file(Path::new("tabgate.toml"))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides. `PORT` is ignored unless it parses as a port.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(user) = var("PROXY_USER") {
            self.auth.username = Some(user);
        }
        if let Some(pass) = var("PROXY_PASS") {
            self.auth.password = Some(pass);
        }
        if let Some(upstream) = var("TABGATE_UPSTREAM") {
            self.tunnel.upstream_url = Some(upstream);
        }
    }

    /// Check mount prefixes are well-formed and disjoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for mount in &self.assets.mounts {
            if !mount.prefix.starts_with('/') || !mount.prefix.ends_with('/') {
                return Err(ConfigError::InvalidPrefix(mount.prefix.clone()));
            }
            if mount.prefix == "/" {
                return Err(ConfigError::RootMount);
            }
            if has_route_syntax(&mount.prefix) {
                return Err(ConfigError::RouteSyntax(mount.prefix.clone()));
            }
        }
        for (i, a) in self.assets.mounts.iter().enumerate() {
            for b in &self.assets.mounts[i + 1..] {
                if a.prefix.starts_with(&b.prefix) || b.prefix.starts_with(&a.prefix) {
                    return Err(ConfigError::OverlappingMounts(
                        a.prefix.clone(),
                        b.prefix.clone(),
                    ));
                }
            }
        }
        if !self.tunnel.path.starts_with('/') {
            return Err(ConfigError::InvalidTunnelPath(self.tunnel.path.clone()));
        }
        if has_route_syntax(&self.tunnel.path) {
            return Err(ConfigError::RouteSyntax(self.tunnel.path.clone()));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(())
    }

    /// Whether basic-auth credentials are configured at all.
    pub fn has_credentials(&self) -> bool {
        self.auth.username.is_some() && self.auth.password.is_some()
    }
}

/// Paths become literal axum routes; captures and wildcards are not allowed.
fn has_route_syntax(path: &str) -> bool {
    path.contains(['{', '}', '*'])
}
