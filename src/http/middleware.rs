//! Rate limit middleware for the request pipeline.
//!
//! Per request: exempt paths pass untouched; otherwise the governing rule
//! is resolved, the client identified, and every tier evaluated against
//! the counting backend. Denials become a structured 429; allowed
//! requests are forwarded unchanged and the real response is decorated
//! with the `X-RateLimit-*` header family plus a processing-time header.
//! The limiter itself never produces a 5xx: every internal failure path
//! degrades to an allowing decision inside the evaluator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::ratelimit::{identify, AuthenticatedUser, ClientKey, RateLimitDecision, RateLimiter};

/// Shared state for the middleware.
#[derive(Clone)]
pub struct RateLimitState {
    /// The limiter evaluating every request
    pub limiter: Arc<RateLimiter>,
    /// Whether X-Forwarded-For may be used for client identification
    pub trust_proxy_headers: bool,
}

/// Intercept a request, decide, and decorate.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let path = req.uri().path().to_string();

    if state.limiter.rules().is_exempt(&path) {
        return next.run(req).await;
    }

    let rule = state.limiter.rules().resolve(&path);
    let client = identify_request(&req, state.trust_proxy_headers);
    let decision = state.limiter.evaluate(&client, &rule).await;

    if !decision.allowed {
        return denial_response(&decision);
    }

    let mut response = next.run(req).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    response
        .headers_mut()
        .insert("x-process-time-ms", HeaderValue::from(elapsed_ms));
    response
}

/// Derive the client key from request context.
///
/// Precedence: the authenticated-user extension placed by the auth layer,
/// then the first trusted forwarded-for hop, then the peer address.
fn identify_request(req: &Request, trust_proxy_headers: bool) -> ClientKey {
    let user_id = req
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0.as_str());
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());
    let peer_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    identify(user_id, forwarded_for, peer_addr, trust_proxy_headers)
}

/// Structured 429 with the same header family as successful responses.
fn denial_response(decision: &RateLimitDecision) -> Response {
    let body = serde_json::json!({
        "detail": "rate limit exceeded",
        "limit": decision.limit,
        "window": decision.window_secs,
        "retry_after": decision.retry_after_secs,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_rate_limit_headers(response.headers_mut(), decision);
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after_secs),
    );
    response
}

/// Decorate a response with the decision that let it through (or not).
fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_epoch));
    headers.insert("x-ratelimit-window", HeaderValue::from(decision.window_secs));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{MemoryCounterStore, RuleTable};
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use axum::{middleware, Router};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    const RULES: &str = r#"
rules:
  - pattern: /api/quotes
    limit: 5
    window_secs: 60
"#;

    fn app(trust_proxy_headers: bool) -> Router {
        let rules = Arc::new(RuleTable::from_yaml(RULES).unwrap());
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            rules,
            Duration::from_millis(150),
            "rw".to_string(),
        ));
        let state = RateLimitState {
            limiter,
            trust_proxy_headers,
        };

        Router::new()
            .route("/api/quotes", get(|| async { "ok" }))
            .route("/health", get(|| async { "healthy" }))
            .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
    }

    fn request(path: &str, forwarded_for: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri(path);
        if let Some(chain) = forwarded_for {
            builder = builder.header("x-forwarded-for", chain);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn header_num(response: &Response, name: &str) -> u64 {
        response
            .headers()
            .get(name)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_response_is_decorated() {
        let app = app(false);

        let response = app.oneshot(request("/api/quotes", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_num(&response, "x-ratelimit-limit"), 5);
        assert_eq!(header_num(&response, "x-ratelimit-remaining"), 4);
        assert_eq!(header_num(&response, "x-ratelimit-window"), 60);
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        assert!(response.headers().contains_key("x-process-time-ms"));
    }

    #[tokio::test]
    async fn test_limit_exhaustion_yields_structured_429() {
        let app = app(false);

        for expected_remaining in (0..5).rev() {
            let response = app
                .clone()
                .oneshot(request("/api/quotes", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                header_num(&response, "x-ratelimit-remaining"),
                expected_remaining
            );
        }

        let response = app.oneshot(request("/api/quotes", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header_num(&response, "x-ratelimit-remaining"), 0);
        let retry_after = header_num(&response, "retry-after");
        assert!(retry_after >= 1 && retry_after <= 61);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["detail"], "rate limit exceeded");
        assert_eq!(body["limit"], 5);
        assert_eq!(body["window"], 60);
        assert!(body["retry_after"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_exempt_path_bypasses_limiting() {
        let app = app(false);

        // Far more requests than any limit; none are counted or decorated.
        for _ in 0..20 {
            let response = app.clone().oneshot(request("/health", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key("x-ratelimit-limit"));
        }
    }

    #[tokio::test]
    async fn test_forwarded_clients_are_tracked_separately() {
        let app = app(true);

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("/api/quotes", Some("203.0.113.7")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .clone()
            .oneshot(request("/api/quotes", Some("203.0.113.7")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // A different forwarded client still has its full quota.
        let response = app
            .oneshot(request("/api/quotes", Some("203.0.113.8")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_num(&response, "x-ratelimit-remaining"), 4);
    }

    #[tokio::test]
    async fn test_untrusted_forwarded_header_shares_one_bucket() {
        let app = app(false);

        // Without proxy trust (and without peer info) every request lands
        // in the shared unknown bucket, so spoofed headers cannot widen
        // the quota.
        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("/api/quotes", Some("203.0.113.7")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .oneshot(request("/api/quotes", Some("203.0.113.99")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_authenticated_user_takes_precedence() {
        let app = app(true);

        let mut req = request("/api/quotes", Some("203.0.113.7"));
        req.extensions_mut()
            .insert(AuthenticatedUser("u-42".to_string()));
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The forwarded address was not charged.
        let response = app
            .oneshot(request("/api/quotes", Some("203.0.113.7")))
            .await
            .unwrap();
        assert_eq!(header_num(&response, "x-ratelimit-remaining"), 4);
    }
}
