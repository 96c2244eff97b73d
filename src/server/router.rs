use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderName, Method, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};

use super::admin::admin_router;
use super::auth::auth_router;
use super::storefront::storefront_router;
use crate::auth::SessionTokens;
use crate::config::ServerConfig;
use crate::email::Mailer;
use crate::ratelimit::{RateLimiter, rate_limit};
use crate::store::Store;

/// Header carrying the guest cart id between requests.
pub const CART_SESSION_HEADER: &str = "x-cart-session";

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<ServerConfig>,
    pub tokens: SessionTokens,
    pub mailer: Mailer,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: ServerConfig, mailer: Mailer) -> Self {
        Self {
            store,
            config: Arc::new(config),
            tokens: SessionTokens::new(),
            mailer,
            rate_limiter: RateLimiter::default(),
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "success": true, "data": { "status": "ok" } }))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CART_SESSION_HEADER),
        ])
        .expose_headers([HeaderName::from_static(CART_SESSION_HEADER)])
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/auth", auth_router())
        .nest("/api/admin", admin_router())
        .nest("/api", storefront_router())
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn(log_request))
        .layer(cors_layer())
        .with_state(state)
}
