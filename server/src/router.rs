//! Router assembly: the gateway pipeline in front of the asset trees and the
//! tunnel route.
//!
//! Layers, outermost first:
//!
//! ```text
//! COOP / COEP response headers     every response, rejections included
//! TraceLayer
//! enforce_origin                   403 for disallowed origins (enforcing mode)
//! CorsLayer                        credentialed CORS headers, preflights
//! rate_limit                       429 / 403 ban
//! require_basic_auth               401 + challenge
//! routes                           tunnel path, asset mounts, 404 fallback
//! ```

use std::sync::Arc;

use axum::{http::HeaderValue, middleware, routing::get, Extension, Router};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::assets::{self, COEP, COOP};
use crate::auth::{self, BasicCredentials};
use crate::cors;
use crate::ratelimit;
use crate::state::GatewayState;
use crate::tunnel;

/// Build the complete gateway router.
pub fn build_router(state: &GatewayState) -> Router {
    let config = &state.config;

    let tunnel_route = Router::new()
        .route(&config.tunnel.path, get(tunnel::tunnel_upgrade))
        .with_state(state.clone());

    let asset_routes = assets::asset_router(&config.assets.mounts, Arc::clone(&state.not_found));

    tunnel_route
        .merge(asset_routes)
        .layer(middleware::from_fn(auth::require_basic_auth))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.limiter),
            ratelimit::rate_limit,
        ))
        .layer(cors::cors_layer(Arc::clone(&state.origins)))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.origins),
            cors::enforce_origin,
        ))
        .layer(Extension(BasicCredentials {
            username: config.auth.username.clone(),
            password: config.auth.password.clone(),
            realm: config.auth.realm.clone(),
        }))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            COEP,
            HeaderValue::from_static("require-corp"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            COOP,
            HeaderValue::from_static("same-origin"),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{NotFoundPage, CORP};
    use crate::config::{AssetMount, AssetPolicy, Config};
    use crate::tunnel::{TunnelHandler, TunnelPeer};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        extract::ws::WebSocket,
        http::{Request, StatusCode},
        response::Response,
    };
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct CountingTunnel(AtomicUsize);

    #[async_trait]
    impl TunnelHandler for CountingTunnel {
        async fn serve(&self, _socket: WebSocket, _peer: TunnelPeer) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        state: GatewayState,
    }

    fn fixture(max_requests: u32) -> Fixture {
        fixture_with(|config| config.rate_limit.max_requests = max_requests)
    }

    fn fixture_with(tweak: impl FnOnce(&mut Config)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(&public).unwrap();
        std::fs::write(public.join("index.html"), "<p>home</p>").unwrap();

        let mut config = Config::default();
        config.auth.username = Some("alice".to_string());
        config.auth.password = Some("hunter2".to_string());
        config.assets.mounts = vec![AssetMount {
            prefix: "/uidfhsuid/".to_string(),
            root: public,
            policy: AssetPolicy::ServiceWorker,
        }];
        tweak(&mut config);

        let state = GatewayState::from_parts(
            config,
            Arc::new(CountingTunnel(AtomicUsize::new(0))),
            Arc::new(NotFoundPage::builtin()),
        );
        Fixture { _dir: dir, state }
    }

    fn basic(user: &str, pass: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
        )
    }

    fn request(uri: &str, auth: Option<&str>, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(a) = auth {
            builder = builder.header("authorization", a);
        }
        if let Some(o) = origin {
            builder = builder.header("origin", o);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn send(router: &Router, req: Request<Body>) -> Response {
        router.clone().oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn all_preconditions_met_reaches_files() {
        let f = fixture(30);
        let router = build_router(&f.state);
        let resp = send(
            &router,
            request(
                "/uidfhsuid/index.html",
                Some(&basic("alice", "hunter2")),
                Some("https://me.pythonanywhere.com"),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(
            headers["access-control-allow-origin"],
            "https://me.pythonanywhere.com"
        );
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert_eq!(headers[&COOP], "same-origin");
        assert_eq!(headers[&COEP], "require-corp");
        assert_eq!(headers[&CORP], "cross-origin");
        assert_eq!(headers["x-ratelimit-limit"], "30");
    }

    #[tokio::test]
    async fn missing_credentials_rejected_before_files() {
        let f = fixture(30);
        let router = build_router(&f.state);
        let resp = send(&router, request("/uidfhsuid/index.html", None, None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().get("www-authenticate").is_some());
        assert!(resp.headers().get(&CORP).is_none());
        assert_eq!(resp.headers()[&COOP], "same-origin");
    }

    #[tokio::test]
    async fn disallowed_origin_rejected_without_cors_headers() {
        let f = fixture(30);
        let router = build_router(&f.state);
        let resp = send(
            &router,
            request(
                "/uidfhsuid/index.html",
                Some(&basic("alice", "hunter2")),
                Some("https://evil.example"),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(resp.headers().get("access-control-allow-origin").is_none());
        assert!(resp.headers().get(&CORP).is_none());
    }

    #[tokio::test]
    async fn non_enforcing_policy_only_withholds_headers() {
        let mut f = fixture(30);
        let mut config = (*f.state.config).clone();
        config.cors.enforce = false;
        f.state = GatewayState::from_parts(
            config,
            Arc::clone(&f.state.tunnel),
            Arc::clone(&f.state.not_found),
        );
        let router = build_router(&f.state);
        let resp = send(
            &router,
            request(
                "/uidfhsuid/index.html",
                Some(&basic("alice", "hunter2")),
                Some("https://evil.example"),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn over_limit_rejected_with_structured_body() {
        let f = fixture(1);
        let router = build_router(&f.state);
        let auth = basic("alice", "hunter2");

        let first = send(&router, request("/uidfhsuid/index.html", Some(&auth), None)).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = send(&router, request("/uidfhsuid/index.html", Some(&auth), None)).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().get("retry-after").is_some());
        let body = axum::body::to_bytes(second.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({
                "statusCode": 429,
                "error": "Too Many Requests",
                "message": "Slow down.",
            })
        );
    }

    #[tokio::test]
    async fn ban_answers_forbidden_with_structured_body() {
        let f = fixture_with(|config| {
            config.rate_limit.max_requests = 1;
            config.rate_limit.ban_after = 0;
        });
        let router = build_router(&f.state);
        let auth = basic("alice", "hunter2");

        let first = send(&router, request("/uidfhsuid/index.html", Some(&auth), None)).await;
        assert_eq!(first.status(), StatusCode::OK);

        for _ in 0..2 {
            let banned = send(&router, request("/uidfhsuid/index.html", Some(&auth), None)).await;
            assert_eq!(banned.status(), StatusCode::FORBIDDEN);
            assert_eq!(banned.headers()["retry-after"], "60");
            assert_eq!(banned.headers()["cross-origin-opener-policy"], "same-origin");
            let body = axum::body::to_bytes(banned.into_body(), 10_000).await.unwrap();
            let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(
                parsed,
                serde_json::json!({
                    "statusCode": 403,
                    "error": "Forbidden",
                    "message": "Banned.",
                })
            );
        }
    }

    #[tokio::test]
    async fn unmatched_route_gets_404_document_when_authenticated() {
        let f = fixture(30);
        let router = build_router(&f.state);
        let resp = send(
            &router,
            request("/elsewhere", Some(&basic("alice", "hunter2")), None),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    #[tokio::test]
    async fn plain_get_on_tunnel_path_is_not_found() {
        let f = fixture(30);
        let router = build_router(&f.state);
        let resp = send(
            &router,
            request("/wisp/", Some(&basic("alice", "hunter2")), None),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preflight_from_allowed_origin_answered() {
        let f = fixture(30);
        let router = build_router(&f.state);
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/uidfhsuid/index.html")
            .header("origin", "https://me.pythonanywhere.com")
            .header("access-control-request-method", "GET")
            .header("access-control-request-headers", "authorization")
            .body(Body::empty())
            .unwrap();
        let resp = send(&router, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["access-control-allow-origin"],
            "https://me.pythonanywhere.com"
        );
        assert_eq!(resp.headers()["access-control-allow-headers"], "authorization");
    }
}
