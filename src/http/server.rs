//! HTTP server wiring.
//!
//! Builds the router (health endpoint, admin routes, and the rate limit
//! layer around everything) and serves it with graceful shutdown. Admin
//! and health paths are exempt through the default exemption prefixes,
//! so operators are never locked out by the limits they are inspecting.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::middleware::{rate_limit_middleware, RateLimitState};
use crate::error::Result;
use crate::ratelimit::{AdminFacade, ClientKey, RateLimiter};

/// HTTP server for the rate-limited application surface.
pub struct HttpServer {
    addr: SocketAddr,
    state: RateLimitState,
    admin: AdminState,
}

#[derive(Clone)]
struct AdminState {
    facade: Arc<AdminFacade>,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(
        addr: SocketAddr,
        limiter: Arc<RateLimiter>,
        facade: Arc<AdminFacade>,
        trust_proxy_headers: bool,
    ) -> Self {
        Self {
            addr,
            state: RateLimitState {
                limiter,
                trust_proxy_headers,
            },
            admin: AdminState { facade },
        }
    }

    /// Build the application router.
    ///
    /// Embedding services merge their own routes into this router; the
    /// rate limit layer wraps everything mounted here.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .nest("/admin", admin_router(self.admin.clone()))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                rate_limit_middleware,
            ))
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server shuts down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await?;

        Ok(())
    }
}

fn admin_router(admin: AdminState) -> Router {
    Router::new()
        .route("/usage", get(usage))
        .route("/reset", post(reset))
        .route("/stats", get(stats))
        .with_state(admin)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct UsageParams {
    key: String,
    tier: String,
}

async fn usage(
    State(admin): State<AdminState>,
    Query(params): Query<UsageParams>,
) -> Response {
    let Ok(client) = params.key.parse::<ClientKey>() else {
        return invalid_key(&params.key);
    };

    let count = admin.facade.usage(&client, &params.tier).await;
    Json(json!({
        "key": params.key,
        "tier": params.tier,
        "count": count,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct ResetParams {
    key: String,
}

async fn reset(
    State(admin): State<AdminState>,
    Query(params): Query<ResetParams>,
) -> Response {
    let Ok(client) = params.key.parse::<ClientKey>() else {
        return invalid_key(&params.key);
    };

    let reset = admin.facade.reset(&client).await;
    Json(json!({
        "key": params.key,
        "reset": reset,
    }))
    .into_response()
}

async fn stats(State(admin): State<AdminState>) -> Response {
    Json(admin.facade.aggregate_stats().await).into_response()
}

fn invalid_key(key: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"detail": format!("invalid client key: {}", key)})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{CounterStore, MemoryCounterStore, RuleTable};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    const RULES: &str = r#"
rules:
  - pattern: /api/quotes
    limit: 5
    window_secs: 60
"#;

    async fn server_with_traffic() -> HttpServer {
        let store = Arc::new(MemoryCounterStore::new());
        let rules = Arc::new(RuleTable::from_yaml(RULES).unwrap());

        store
            .check_and_increment("rw:ip:10.0.0.1:sustained", 5, 60, 1_000)
            .await
            .unwrap();
        store
            .check_and_increment("rw:ip:10.0.0.1:sustained", 5, 60, 1_000)
            .await
            .unwrap();

        let limiter = Arc::new(RateLimiter::new(
            store.clone(),
            Arc::clone(&rules),
            Duration::from_millis(150),
            "rw".to_string(),
        ));
        let facade = Arc::new(AdminFacade::new(store, rules, "rw".to_string()));

        HttpServer::new(
            "127.0.0.1:0".parse().unwrap(),
            limiter,
            facade,
            false,
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = server_with_traffic().await;
        let response = server
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_admin_usage() {
        let server = server_with_traffic().await;
        let response = server
            .router()
            .oneshot(
                Request::get("/admin/usage?key=ip:10.0.0.1&tier=sustained")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["tier"], "sustained");
    }

    #[tokio::test]
    async fn test_admin_reset() {
        let server = server_with_traffic().await;
        let router = server.router();

        let response = router
            .clone()
            .oneshot(
                Request::post("/admin/reset?key=ip:10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["reset"], true);

        let response = router
            .oneshot(
                Request::get("/admin/usage?key=ip:10.0.0.1&tier=sustained")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["count"], 0);
    }

    #[tokio::test]
    async fn test_admin_stats() {
        let server = server_with_traffic().await;
        let response = server
            .router()
            .oneshot(Request::get("/admin/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["active_keys"], 1);
        assert_eq!(body["total_tracked_events"], 2);
        assert_eq!(body["backend_reachable"], true);
    }

    #[tokio::test]
    async fn test_admin_invalid_key_rejected() {
        let server = server_with_traffic().await;
        let response = server
            .router()
            .oneshot(
                Request::get("/admin/usage?key=whatever&tier=sustained")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
