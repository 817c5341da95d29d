//! Configuration loading for tabgate-client.
//!
//! Configuration is resolved from three fallback sources (tried in order):
//!
//! 1. **JSON file** via `--config <path>` CLI flag
//! 2. **JSON file** via `TABGATE_CONFIG` environment variable
//! 3. **Environment variables** — `TABGATE_URL`, plus optional
//!    `TABGATE_USER` / `TABGATE_PASS` for the gateway's Basic auth
//!
//! Every field except `gateway_url` has a default matching the stock
//! gateway layout, so a config file only needs the URL and credentials.

use std::path::{Path, PathBuf};

use clap::Parser;
use indexmap::IndexMap;
use serde::Deserialize;

/// CLI arguments parsed by `clap`.
#[derive(Parser)]
#[command(name = "tabgate-client", about = "Multi-tab session driver for a tabgate gateway")]
pub struct Cli {
    /// Path to client config file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no config file and {0} not set")]
    MissingEnv(&'static str),
    #[error("{0}")]
    Invalid(String),
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway base URL, e.g. `https://me.pythonanywhere.com`.
    pub gateway_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// First-party asset prefix the service worker lives under.
    pub asset_prefix: String,
    pub worker_script: String,
    /// Identifier of the transport module handed to the transport controller.
    pub transport_id: String,
    pub tunnel_path: String,
    /// URL the boot tab opens.
    pub home_url: String,
    /// Engine name → query template with `%s` standing for the input.
    pub search_engines: IndexMap<String, String>,
    pub default_engine: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut search_engines = IndexMap::new();
        search_engines.insert(
            "duckduckgo".to_string(),
            "https://duckduckgo.com/?q=%s".to_string(),
        );
        search_engines.insert(
            "google".to_string(),
            "https://www.google.com/search?q=%s".to_string(),
        );
        search_engines.insert(
            "bing".to_string(),
            "https://www.bing.com/search?q=%s".to_string(),
        );
        Self {
            gateway_url: String::new(),
            username: None,
            password: None,
            asset_prefix: "/uidfhsuid/".to_string(),
            worker_script: "sw.js".to_string(),
            transport_id: "/libcurl/index.mjs".to_string(),
            tunnel_path: "/wisp/".to_string(),
            home_url: "https://example.com".to_string(),
            search_engines,
            default_engine: "duckduckgo".to_string(),
        }
    }
}

impl ClientConfig {
    /// Basic-auth credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    /// URL of the service-worker script on the gateway.
    pub fn worker_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.gateway_url.trim_end_matches('/'),
            self.asset_prefix.trim_matches('/'),
            self.worker_script.trim_start_matches('/')
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway_url.is_empty() {
            return Err(ConfigError::Invalid("gateway_url is empty".into()));
        }
        if self.search_engines.is_empty() {
            return Err(ConfigError::Invalid("no search engines configured".into()));
        }
        if !self.search_engines.contains_key(&self.default_engine) {
            return Err(ConfigError::Invalid(format!(
                "default_engine '{}' not found in search_engines",
                self.default_engine
            )));
        }
        for (name, template) in &self.search_engines {
            if !template.contains("%s") {
                return Err(ConfigError::Invalid(format!(
                    "search engine '{name}' template has no %s placeholder"
                )));
            }
        }
        Ok(())
    }
}

/// Load and validate configuration from CLI args, env vars, or config file.
pub fn load_config(cli: &Cli) -> Result<ClientConfig, ConfigError> {
    load_with(cli, |name| std::env::var(name).ok())
}

fn load_with(cli: &Cli, var: impl Fn(&str) -> Option<String>) -> Result<ClientConfig, ConfigError> {
    let config = if let Some(path) = &cli.config {
        load_from_file(&expand_tilde(path, &var))?
    } else if let Some(path) = var("TABGATE_CONFIG") {
        load_from_file(&expand_tilde(Path::new(&path), &var))?
    } else {
        load_from_env(&var)?
    };
    config.validate()?;
    Ok(config)
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &Path, var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn load_from_file(path: &Path) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn load_from_env(var: &impl Fn(&str) -> Option<String>) -> Result<ClientConfig, ConfigError> {
    let gateway_url = var("TABGATE_URL").ok_or(ConfigError::MissingEnv("TABGATE_URL"))?;
    Ok(ClientConfig {
        gateway_url,
        username: var("TABGATE_USER").filter(|v| !v.is_empty()),
        password: var("TABGATE_PASS").filter(|v| !v.is_empty()),
        ..ClientConfig::default()
    })
}
