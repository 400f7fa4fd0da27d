//! HTTP middleware stack for the gateway.
//!
//! The timeout is derived from the processor call deadline so a call that
//! times out is still answered by its handler.

use std::time::Duration;

use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

/// Added to `request_timeout` for the HTTP timeout layer.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Wraps `router` in the gateway's HTTP middleware, outermost first:
///
/// - an `X-Request-Id` is assigned when missing and echoed on the response
/// - request and response spans via `TraceLayer`
/// - gzip compression of response bodies
/// - CORS for the configured origins, `GET` and `POST` only
/// - 408 once the request timeout plus [`TIMEOUT_GRACE`] has passed
pub fn with_http_layers<S>(router: Router<S>, config: &NetworkConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let request_id = HeaderName::from_static("x-request-id");
    let timeout = config.request_timeout + TIMEOUT_GRACE;

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
            .layer(build_cors_layer(&config.cors_origins))
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
            .layer(PropagateRequestIdLayer::new(request_id)),
    )
}

/// A `"*"` entry allows any origin; otherwise only the listed ones.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let router = with_http_layers(Router::new().route("/", get(|| async { "ok" })), &NetworkConfig::default());

        let resp = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn incoming_request_id_is_kept() {
        let router = with_http_layers(Router::new().route("/", get(|| async { "ok" })), &NetworkConfig::default());

        let resp = router
            .oneshot(
                Request::get("/")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.headers()["x-request-id"], "abc-123");
    }

    #[test]
    fn cors_accepts_explicit_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "not a header value\n".to_string(),
        ];
        let _cors = build_cors_layer(&origins);
    }
}
