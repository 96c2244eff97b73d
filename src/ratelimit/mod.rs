//! Fixed-window request limiting keyed by route class, client address and user agent.

mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};

pub use store::{MemoryRateLimitStore, RateLimitStore, Window};

use crate::server::AppState;
use crate::server::response::ApiError;

const USER_AGENT_PREFIX: usize = 50;
const EXPIRE_EVERY: u64 = 1024;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Auth,
    Api,
    Default,
}

impl RouteClass {
    #[must_use]
    pub fn for_path(path: &str) -> Self {
        if path.starts_with("/api/auth/") || path == "/api/auth" {
            Self::Auth
        } else if path.starts_with("/api/") || path == "/api" {
            Self::Api
        } else {
            Self::Default
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Api => "api",
            Self::Default => "default",
        }
    }

    #[must_use]
    pub const fn max_requests(self) -> u32 {
        match self {
            Self::Auth => 5,
            Self::Api => 60,
            Self::Default => 100,
        }
    }

    #[must_use]
    pub fn window(self) -> Duration {
        match self {
            Self::Auth => Duration::minutes(15),
            Self::Api | Self::Default => Duration::minutes(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        limit: u32,
        remaining: u32,
    },
    Limited {
        limit: u32,
        reset_at: DateTime<Utc>,
        retry_after_secs: i64,
    },
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    checks: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(MemoryRateLimitStore::new()))
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            checks: AtomicU64::new(0),
        }
    }

    pub fn check(&self, class: RouteClass, client: &str) -> Decision {
        self.check_at(class, client, Utc::now())
    }

    pub fn check_at(&self, class: RouteClass, client: &str, now: DateTime<Utc>) -> Decision {
        if self.checks.fetch_add(1, Ordering::Relaxed) % EXPIRE_EVERY == EXPIRE_EVERY - 1 {
            self.store.expire(now);
        }

        let key = format!("{}:{client}", class.as_str());
        let limit = class.max_requests();
        let window = self.store.incr(&key, class.window(), now);

        if window.count > limit {
            let retry_after_secs = (window.reset_at - now).num_seconds().max(1);
            Decision::Limited {
                limit,
                reset_at: window.reset_at,
                retry_after_secs,
            }
        } else {
            Decision::Allowed {
                limit,
                remaining: limit - window.count,
            }
        }
    }

    pub fn clear(&self) {
        self.store.clear();
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Client identity for limiting: the client address plus the start of the user agent.
#[must_use]
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let ip = client_ip(headers, peer).unwrap_or_else(|| "unknown".to_string());
    let user_agent: String = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .chars()
        .take(USER_AGENT_PREFIX)
        .collect();

    format!("{ip}:{user_agent}")
}

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let class = RouteClass::for_path(request.uri().path());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_key(request.headers(), peer);

    match state.rate_limiter.check(class, &client) {
        Decision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
            response
        }
        Decision::Limited {
            limit,
            reset_at,
            retry_after_secs,
        } => {
            tracing::warn!(class = class.as_str(), client = %client, "Rate limit exceeded");
            let mut response =
                ApiError::rate_limited("Too many requests, please try again later")
                    .into_response();
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(
                X_RATELIMIT_RESET,
                HeaderValue::from(reset_at.timestamp()),
            );
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_classes() {
        assert_eq!(RouteClass::for_path("/api/auth/sign-in"), RouteClass::Auth);
        assert_eq!(RouteClass::for_path("/api/products"), RouteClass::Api);
        assert_eq!(RouteClass::for_path("/api/authors"), RouteClass::Api);
        assert_eq!(RouteClass::for_path("/health"), RouteClass::Default);
    }

    #[test]
    fn test_sixth_auth_request_is_limited() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        for expected_remaining in (0..5).rev() {
            assert_eq!(
                limiter.check_at(RouteClass::Auth, "1.2.3.4:curl", now),
                Decision::Allowed {
                    limit: 5,
                    remaining: expected_remaining
                }
            );
        }

        match limiter.check_at(RouteClass::Auth, "1.2.3.4:curl", now) {
            Decision::Limited {
                limit,
                reset_at,
                retry_after_secs,
            } => {
                assert_eq!(limit, 5);
                assert_eq!(reset_at, now + Duration::minutes(15));
                assert_eq!(retry_after_secs, 15 * 60);
            }
            other => panic!("expected limit, got {other:?}"),
        }

        // Other clients and other classes keep their own windows.
        assert!(matches!(
            limiter.check_at(RouteClass::Auth, "5.6.7.8:curl", now),
            Decision::Allowed { remaining: 4, .. }
        ));
        assert!(matches!(
            limiter.check_at(RouteClass::Api, "1.2.3.4:curl", now),
            Decision::Allowed { remaining: 59, .. }
        ));
    }

    #[test]
    fn test_window_elapses_and_clear_resets() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        for _ in 0..6 {
            limiter.check_at(RouteClass::Auth, "c", now);
        }
        assert!(matches!(
            limiter.check_at(RouteClass::Auth, "c", now + Duration::minutes(15)),
            Decision::Allowed { remaining: 4, .. }
        ));

        for _ in 0..6 {
            limiter.check_at(RouteClass::Auth, "c", now);
        }
        limiter.clear();
        assert!(matches!(
            limiter.check_at(RouteClass::Auth, "c", now),
            Decision::Allowed { remaining: 4, .. }
        ));
    }

    #[test]
    fn test_client_key_sources() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        assert_eq!(client_key(&headers, None), "unknown:");
        assert_eq!(client_key(&headers, Some(peer)), "10.0.0.9:");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_key(&headers, Some(peer)), "10.0.0.2:");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&"a".repeat(80)).unwrap());
        assert_eq!(
            client_key(&headers, Some(peer)),
            format!("203.0.113.7:{}", "a".repeat(50))
        );
    }
}
