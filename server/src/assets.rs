//! Static asset trees.
//!
//! Each [`AssetMount`] maps one URL prefix onto one directory and tags every
//! response from that tree with its cross-origin policy:
//!
//! | Policy           | `Cross-Origin-Resource-Policy` | `Cross-Origin-Embedder-Policy` |
//! |------------------|--------------------------------|--------------------------------|
//! | `service-worker` | `cross-origin`                 | `require-corp`                 |
//! | `same-origin`    | `same-origin`                  | `require-corp`                 |
//!
//! Requests matching no prefix, or naming a file that doesn't exist inside a
//! mount, get the 404 document.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    response::{Html, IntoResponse, Response},
    Router,
};
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};
use tracing::{info, warn};

use crate::config::{AssetMount, AssetPolicy};

pub const CORP: HeaderName = HeaderName::from_static("cross-origin-resource-policy");
pub const COEP: HeaderName = HeaderName::from_static("cross-origin-embedder-policy");
pub const COOP: HeaderName = HeaderName::from_static("cross-origin-opener-policy");

const BUILTIN_NOT_FOUND: &str = "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>404 Not Found</title></head>\n<body><h1>404</h1><p>The page you requested could not be found.</p></body>\n</html>\n";

impl AssetPolicy {
    pub fn resource_policy(self) -> HeaderValue {
        match self {
            Self::ServiceWorker => HeaderValue::from_static("cross-origin"),
            Self::SameOrigin => HeaderValue::from_static("same-origin"),
        }
    }
}

/// The 404 document, read once at startup.
pub struct NotFoundPage {
    html: String,
}

impl NotFoundPage {
    /// Read `path`, falling back to a built-in document when it can't be read.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(html) => {
                info!(path = %path.display(), "loaded 404 page");
                Self { html }
            }
            Err(e) => {
                warn!(path = %path.display(), "404 page unavailable ({e}), using built-in page");
                Self::builtin()
            }
        }
    }

    pub fn builtin() -> Self {
        Self {
            html: BUILTIN_NOT_FOUND.to_string(),
        }
    }

    pub fn response(&self) -> Response {
        (StatusCode::NOT_FOUND, Html(self.html.clone())).into_response()
    }
}

/// Build the router serving every mount, with the 404 page as fallback.
pub fn asset_router(mounts: &[AssetMount], not_found: Arc<NotFoundPage>) -> Router {
    let mut router = Router::new();

    for mount in mounts {
        let page = Arc::clone(&not_found);
        let missing = tower::service_fn(move |_req: Request<Body>| {
            let page = Arc::clone(&page);
            async move { Ok::<_, Infallible>(page.response()) }
        });
        let serve_dir = ServeDir::new(&mount.root).not_found_service(missing);

        let prefix = mount.prefix.trim_end_matches('/');
        let tree = Router::new()
            .nest_service(prefix, serve_dir)
            .layer(SetResponseHeaderLayer::overriding(
                CORP,
                mount.policy.resource_policy(),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                COEP,
                HeaderValue::from_static("require-corp"),
            ));
        info!(prefix = %mount.prefix, root = %mount.root.display(), "mounted asset tree");
        router = router.merge(tree);
    }

    router.fallback(move || {
        let page = Arc::clone(&not_found);
        async move { page.response() }
    })
}
