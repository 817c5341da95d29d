//! Per-client fixed-window rate limiting with ban escalation.
//!
//! Each client identity (peer IP, or the first `X-Forwarded-For` hop when the
//! gateway sits behind a trusted proxy) gets `max_requests` per window.
//! Requests past the ceiling are answered with `429`. Every over-limit request
//! counts as a violation; once a client's violations within one window exceed
//! `ban_after`, the client is banned (`403`) for `ban_secs`, regardless of
//! window resets.
//!
//! The counter table sits behind a single `std::sync::Mutex`: the
//! increment-and-check for one request is a few arithmetic operations and
//! never awaits, so the lock is never held across a suspension point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{info, warn};

use crate::config::RateLimitConfig;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Outcome of counting one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32, reset_after: Duration },
    Limited { retry_after: Duration },
    Banned { retry_after: Duration },
}

#[derive(Debug)]
struct ClientWindow {
    window_start: Instant,
    count: u32,
    violations: u32,
    banned_until: Option<Instant>,
}

/// Shared rate-limit table.
pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientWindow>>,
    max_requests: u32,
    window: Duration,
    ban_after: u32,
    ban: Duration,
    trust_proxy: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            ban_after: config.ban_after,
            ban: Duration::from_secs(config.ban_secs()),
            trust_proxy: config.trust_proxy,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request from `client` at `now`.
    pub fn check(&self, client: &str, now: Instant) -> Decision {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = clients.entry(client.to_string()).or_insert(ClientWindow {
            window_start: now,
            count: 0,
            violations: 0,
            banned_until: None,
        });

        if let Some(until) = entry.banned_until {
            if now < until {
                return Decision::Banned {
                    retry_after: until - now,
                };
            }
            entry.banned_until = None;
        }

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
            entry.violations = 0;
        }
        let reset_after = self.window.saturating_sub(now.duration_since(entry.window_start));

        entry.count = entry.count.saturating_add(1);
        if entry.count <= self.max_requests {
            return Decision::Allowed {
                remaining: self.max_requests - entry.count,
                reset_after,
            };
        }

        entry.violations = entry.violations.saturating_add(1);
        if entry.violations > self.ban_after {
            warn!(client, "rate limit ban");
            entry.banned_until = Some(now + self.ban);
            return Decision::Banned {
                retry_after: self.ban,
            };
        }
        Decision::Limited {
            retry_after: reset_after,
        }
    }

    /// Drop entries whose window and ban have both lapsed. Returns how many.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = clients.len();
        clients.retain(|_, c| {
            let banned = c.banned_until.is_some_and(|until| now < until);
            banned || now.duration_since(c.window_start) < self.window
        });
        before - clients.len()
    }

    /// Number of tracked clients.
    pub fn tracked(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Client identity for a request: the first `X-Forwarded-For` hop when
    /// proxies are trusted, else the peer IP, else `"unknown"`.
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(hop) = forwarded {
                return hop.to_string();
            }
        }
        peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
    }

    fn limit_headers(&self, headers: &mut HeaderMap, remaining: u32, reset_after: Duration) {
        headers.insert(LIMIT_HEADER, HeaderValue::from(self.max_requests));
        headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
        headers.insert(RESET_HEADER, HeaderValue::from(ceil_secs(reset_after)));
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Axum middleware applying [`RateLimiter::check`] to every request.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = limiter.client_key(request.headers(), peer);

    match limiter.check(&client, Instant::now()) {
        Decision::Allowed {
            remaining,
            reset_after,
        } => {
            let mut response = next.run(request).await;
            limiter.limit_headers(response.headers_mut(), remaining, reset_after);
            response
        }
        Decision::Limited { retry_after } => {
            info!(%client, "rate limited");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "statusCode": 429,
                    "error": "Too Many Requests",
                    "message": "Slow down.",
                })),
            )
                .into_response();
            limiter.limit_headers(response.headers_mut(), 0, retry_after);
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(ceil_secs(retry_after)),
            );
            response
        }
        Decision::Banned { retry_after } => {
            let mut response = (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "statusCode": 403,
                    "error": "Forbidden",
                    "message": "Banned.",
                })),
            )
                .into_response();
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(ceil_secs(retry_after)),
            );
            response
        }
    }
}
