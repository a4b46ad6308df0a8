use axum::http::{header, HeaderName, HeaderValue};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

const NOSNIFF: &str = "nosniff";
const DENY: &str = "DENY";
const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
const CSP_API_VALUE: &str = "default-src 'none'; frame-ancestors 'none'";
const REFERRER_POLICY_VALUE: &str = "strict-origin-when-cross-origin";
const PERMISSIONS_POLICY_VALUE: &str = "geolocation=(), microphone=(), camera=()";
// Hold, payment and ticket payloads are per-buyer and must never be cached.
const NO_STORE: &str = "no-store";

/// Stamps the API security headers on every response.
///
/// HSTS is only sent in production, where the service sits behind HTTPS.
pub fn apply_security_headers(router: Router, include_hsts: bool) -> Router {
    let router = router
        .layer(overriding(header::X_CONTENT_TYPE_OPTIONS, NOSNIFF))
        .layer(overriding(header::X_FRAME_OPTIONS, DENY))
        .layer(overriding(header::CONTENT_SECURITY_POLICY, CSP_API_VALUE))
        .layer(overriding(header::REFERRER_POLICY, REFERRER_POLICY_VALUE))
        .layer(overriding(
            HeaderName::from_static("permissions-policy"),
            PERMISSIONS_POLICY_VALUE,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static(NO_STORE),
        ));

    if include_hsts {
        tracing::info!("Security: HSTS header enabled (production mode)");
        router.layer(overriding(header::STRICT_TRANSPORT_SECURITY, HSTS_VALUE))
    } else {
        tracing::info!("Security: HSTS header disabled (development mode)");
        router
    }
}

fn overriding(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn headers_for(include_hsts: bool) -> axum::http::HeaderMap {
        let app = apply_security_headers(Router::new().route("/", get(|| async { "ok" })), include_hsts);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.headers().clone()
    }

    #[tokio::test]
    async fn api_headers_are_present() {
        let headers = headers_for(false).await;
        assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), NOSNIFF);
        assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), DENY);
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), NO_STORE);
        assert!(headers.get(header::STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[tokio::test]
    async fn hsts_only_in_production() {
        let headers = headers_for(true).await;
        assert_eq!(
            headers.get(header::STRICT_TRANSPORT_SECURITY).unwrap(),
            HSTS_VALUE
        );
    }
}
