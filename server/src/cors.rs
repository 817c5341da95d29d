//! Origin policy: the first stage of the gateway pipeline.
//!
//! A request is allowed when it has no `Origin` header (same-origin
//! navigation, CLI clients) or when the origin's hostname matches one of the
//! configured host patterns. Allowed origins receive credentialed CORS
//! headers from tower-http's [`CorsLayer`]; disallowed origins never do, and
//! in enforcing mode they are rejected outright by [`enforce_origin`].

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::debug;

/// Compiled hostname allow-list.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    patterns: Vec<String>,
    enforce: bool,
}

impl OriginPolicy {
    pub fn new(allowed_hosts: &[String], enforce: bool) -> Self {
        Self {
            patterns: allowed_hosts
                .iter()
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            enforce,
        }
    }

    pub fn enforcing(&self) -> bool {
        self.enforce
    }

    /// Decide on an optional `Origin` header value.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        match origin_hostname(origin) {
            Some(host) => self.allows_host(&host),
            None => false,
        }
    }

    fn allows_host(&self, host: &str) -> bool {
        self.patterns.iter().any(|p| host_matches(p, host))
    }
}

/// Extract the lowercase hostname from an origin such as `https://a.b.com:8443`.
/// IPv6 brackets are stripped.
fn origin_hostname(origin: &str) -> Option<String> {
    let uri: Uri = origin.parse().ok()?;
    uri.scheme()?;
    let host = uri.host()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// A pattern without `*` matches the host itself and any subdomain of it.
/// Otherwise `*` matches any run of characters.
fn host_matches(pattern: &str, host: &str) -> bool {
    if !pattern.contains('*') {
        let pattern = pattern.trim_start_matches('.');
        return host == pattern
            || host
                .strip_suffix(pattern)
                .is_some_and(|rest| rest.ends_with('.'));
    }
    glob_match(pattern, host)
}

/// Simple glob matching where `*` matches any sequence of characters.
fn glob_match(pattern: &str, value: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == value;
    }

    let mut remaining = value;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match remaining.strip_prefix(segment) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return remaining.ends_with(segment);
        } else {
            match remaining.find(segment) {
                Some(pos) => remaining = &remaining[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Build the credentialed CORS layer for allowed origins.
pub fn cors_layer(policy: Arc<OriginPolicy>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _parts| {
            policy.allows(origin.to_str().ok())
        }))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// Reject requests from disallowed origins when the policy enforces.
/// With enforcement off the request continues without CORS headers.
pub async fn enforce_origin(
    State(policy): State<Arc<OriginPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    if policy.enforcing() {
        let origin = request
            .headers()
            .get(header::ORIGIN)
            .map(|v| v.to_str().unwrap_or_default());
        if !policy.allows(origin) {
            debug!(origin = origin.unwrap_or_default(), "origin rejected");
            return (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "statusCode": 403,
                    "error": "Forbidden",
                    "message": "Origin not allowed",
                })),
            )
                .into_response();
        }
    }
    next.run(request).await
}
