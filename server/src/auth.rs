//! HTTP Basic authentication.
//!
//! Every route, static assets and the tunnel endpoint alike, requires an
//! `Authorization: Basic <base64(user:pass)>` header matching the configured
//! credentials. There are no unauthenticated routes.

use axum::{
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use serde_json::json;
use tracing::debug;

/// Expected credentials, injected into the router as an extension so
/// [`require_basic_auth`] can access them without touching the gateway state.
///
/// Either half being `None` means no request can ever authenticate.
#[derive(Clone)]
pub struct BasicCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub realm: String,
}

/// Axum middleware that rejects requests without valid Basic credentials.
///
/// # Error responses
///
/// - `401 Unauthorized` with a `WWW-Authenticate: Basic` challenge when the header is
///   missing, malformed, or credentials wrong
/// - `500 Internal Server Error` when [`BasicCredentials`] extension not found
///   (misconfiguration)
pub async fn require_basic_auth(request: Request, next: Next) -> Response {
    let Some(expected) = request.extensions().get::<BasicCredentials>().cloned() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Server configuration error"})),
        )
            .into_response();
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic);

    let Some((user, pass)) = provided else {
        return challenge(&expected.realm, "Missing or invalid Authorization header");
    };

    let (Some(exp_user), Some(exp_pass)) = (&expected.username, &expected.password) else {
        return challenge(&expected.realm, "Unauthorized");
    };

    // Evaluate both halves so the outcome doesn't leak which one was wrong.
    let user_ok = constant_time_eq(exp_user.as_bytes(), user.as_bytes());
    let pass_ok = constant_time_eq(exp_pass.as_bytes(), pass.as_bytes());
    if !(user_ok & pass_ok) {
        debug!(path = %request.uri().path(), "rejected basic credentials");
        return challenge(&expected.realm, "Unauthorized");
    }

    next.run(request).await
}

/// Decode an `Authorization` header value of the form `Basic <base64>`.
///
/// Returns `None` for other schemes, invalid base64, non-UTF-8 payloads or a
/// payload without a `:` separator. The password may itself contain `:`.
pub fn parse_basic(header_value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn challenge(realm: &str, message: &str) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "statusCode": 401,
            "error": "Unauthorized",
            "message": message,
        })),
    )
        .into_response();
    let value = HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, value);
    response
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of `provided`
/// length, so an attacker cannot determine the credential length from
/// response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for i in 0..expected.len() {
        let p = if i < provided.len() {
            provided[i]
        } else {
            0xff
        };
        diff |= expected[i] ^ p;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn encode(user: &str, pass: &str) -> String {
        let raw = format!("{user}:{pass}");
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }

    fn app(username: Option<&str>, password: Option<&str>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(require_basic_auth))
            .layer(Extension(BasicCredentials {
                username: username.map(str::to_string),
                password: password.map(str::to_string),
                realm: "test".to_string(),
            }))
    }

    async fn status_for(app: Router, auth: Option<String>) -> (StatusCode, Option<String>) {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(a) = auth {
            builder = builder.header("authorization", a);
        }
        let resp = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let challenge = resp
            .headers()
            .get("www-authenticate")
            .map(|v| v.to_str().unwrap().to_string());
        (resp.status(), challenge)
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-longer"));
        assert!(!constant_time_eq(b"secret", b""));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_parse_basic() {
        assert_eq!(
            parse_basic(&encode("alice", "pa:ss")),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(
            parse_basic(&encode("alice", "x").replace("Basic", "basic")),
            Some(("alice".to_string(), "x".to_string()))
        );
        assert!(parse_basic("Bearer abc").is_none());
        assert!(parse_basic("Basic !!!notbase64").is_none());
        // "nocolon" base64-encoded
        assert!(parse_basic("Basic bm9jb2xvbg==").is_none());
    }

    #[tokio::test]
    async fn valid_credentials_pass() {
        let (status, _) = status_for(
            app(Some("alice"), Some("hunter2")),
            Some(encode("alice", "hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_challenged() {
        let (status, challenge) = status_for(app(Some("alice"), Some("hunter2")), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(challenge.as_deref(), Some("Basic realm=\"test\""));
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let (status, challenge) = status_for(
            app(Some("alice"), Some("hunter2")),
            Some(encode("alice", "hunter3")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(challenge.is_some());
    }

    #[tokio::test]
    async fn unconfigured_credentials_reject_everything() {
        let (status, _) = status_for(app(None, None), Some(encode("", ""))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
