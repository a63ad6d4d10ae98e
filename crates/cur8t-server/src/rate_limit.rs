//! The rate limiting gate.
//!
//! Every mutating action calls [`RateLimiter::check`] with its
//! [`ActionClass`] before doing anything else. A second, coarse per-IP limit
//! is applied by [`rate_limit_middleware`] to every route except the billing
//! webhook, which the provider must always be able to reach.
//!
//! The counter backend sits behind [`RateLimitStore`]; the shipped
//! [`InMemoryRateLimitStore`] keeps a sliding log of hit instants per key.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::warn;

use cur8t_shared::ActionError;

use crate::api::AppState;
use crate::error::ServerError;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Independent counters, each with its own threshold and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    AccessRequest,
    RespondRequest,
    CollectionWrite,
    Visibility,
    Social,
    UserUpdate,
    Search,
    Favorite,
    Global,
}

impl ActionClass {
    /// `(limit, window)`.
    pub fn policy(self) -> (u32, Duration) {
        match self {
            ActionClass::AccessRequest => (5, HOUR),
            ActionClass::RespondRequest => (30, HOUR),
            ActionClass::CollectionWrite => (20, 5 * MINUTE),
            ActionClass::Visibility => (10, 5 * MINUTE),
            ActionClass::Social => (60, HOUR),
            ActionClass::UserUpdate => (10, 5 * MINUTE),
            ActionClass::Search => (100, HOUR),
            ActionClass::Favorite => (30, 5 * MINUTE),
            ActionClass::Global => (1000, HOUR),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionClass::AccessRequest => "access-request",
            ActionClass::RespondRequest => "respond-request",
            ActionClass::CollectionWrite => "collection-write",
            ActionClass::Visibility => "visibility",
            ActionClass::Social => "social",
            ActionClass::UserUpdate => "user-update",
            ActionClass::Search => "search",
            ActionClass::Favorite => "favorite",
            ActionClass::Global => "global",
        }
    }

    fn message(self) -> &'static str {
        match self {
            ActionClass::AccessRequest => "Too many access requests. Please try again later.",
            ActionClass::RespondRequest => "Too many responses. Please try again later.",
            ActionClass::CollectionWrite => "Too many collection changes. Please try again later.",
            ActionClass::Visibility => "Too many visibility changes. Please try again later.",
            ActionClass::Social => "Too many actions. Please slow down.",
            ActionClass::UserUpdate => "Too many profile updates. Please try again later.",
            ActionClass::Search => "Too many searches. Please try again later.",
            ActionClass::Favorite => "Too many favorite changes. Please try again later.",
            ActionClass::Global => "Rate limit exceeded",
        }
    }
}

/// Answer from a counter backend for one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Time until the window admits another hit. Zero when allowed.
    pub reset_in: Duration,
}

impl RateLimitDecision {
    /// Whole minutes until retry, rounded up. Never zero for a rejection.
    pub fn retry_after_minutes(&self) -> u64 {
        let secs = self.reset_in.as_secs() + u64::from(self.reset_in.subsec_nanos() > 0);
        secs.div_ceil(60).max(1)
    }
}

/// A sliding-window counter service keyed by string.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Record one hit against `key` if the window allows it.
    async fn hit(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision;

    /// Drop keys with no hit in the last `max_idle`.
    async fn purge_stale(&self, max_idle: Duration);
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SlidingLog {
    hits: VecDeque<Instant>,
}

impl SlidingLog {
    fn hit(&mut self, now: Instant, limit: u32, window: Duration) -> RateLimitDecision {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }

        let used = self.hits.len() as u32;
        if used < limit {
            self.hits.push_back(now);
            RateLimitDecision {
                allowed: true,
                reset_in: Duration::ZERO,
            }
        } else {
            let reset_in = self
                .hits
                .front()
                .map(|&oldest| (oldest + window).saturating_duration_since(now))
                .unwrap_or(window);
            RateLimitDecision {
                allowed: false,
                reset_in,
            }
        }
    }

    fn last_hit(&self) -> Option<Instant> {
        self.hits.back().copied()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRateLimitStore {
    logs: Arc<Mutex<HashMap<String, SlidingLog>>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let mut logs = self.logs.lock().await;
        logs.entry(key.to_string())
            .or_default()
            .hit(Instant::now(), limit, window)
    }

    async fn purge_stale(&self, max_idle: Duration) {
        let mut logs = self.logs.lock().await;
        let now = Instant::now();
        logs.retain(|_, log| {
            log.last_hit()
                .is_some_and(|last| now.duration_since(last) < max_idle)
        });
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Per-action gate over a [`RateLimitStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    /// Count one `class` action by `identifier` (`user:<id>` or `ip:<addr>`).
    pub async fn check(&self, class: ActionClass, identifier: &str) -> Result<(), ActionError> {
        if !self.enabled {
            return Ok(());
        }

        let (limit, window) = class.policy();
        let key = format!("ratelimit:{}:{}", class.as_str(), identifier);
        let decision = self.store.hit(&key, limit, window).await;
        if decision.allowed {
            return Ok(());
        }

        let retry_after_minutes = decision.retry_after_minutes();
        warn!(
            class = class.as_str(),
            identifier,
            retry_after_minutes,
            "Rate limit exceeded"
        );
        Err(ActionError::RateLimited {
            message: class.message().to_string(),
            retry_after_minutes,
        })
    }

    pub async fn purge_stale(&self, max_idle: Duration) {
        self.store.purge_stale(max_idle).await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()), true)
    }
}

/// Global per-IP limit applied to every route.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let connect_info = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let ip = client_ip(req.headers(), connect_info, state.config.trust_proxy_headers);

    if let Err(e) = state
        .rate_limiter
        .check(ActionClass::Global, &format!("ip:{ip}"))
        .await
    {
        return ServerError::from(e).into_response();
    }

    next.run(req).await
}

/// Client address: first `x-forwarded-for` entry, then `x-real-ip` (when
/// proxy headers are trusted), then the socket peer, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_log_admits_up_to_limit() {
        let mut log = SlidingLog::default();
        let t0 = Instant::now();
        let window = Duration::from_secs(60);

        for i in 0..3 {
            assert!(log.hit(t0 + Duration::from_secs(i), 3, window).allowed);
        }

        let rejected = log.hit(t0 + Duration::from_secs(10), 3, window);
        assert!(!rejected.allowed);
        assert_eq!(rejected.reset_in, Duration::from_secs(50));

        // First hit slides out of the window.
        assert!(log.hit(t0 + Duration::from_secs(60), 3, window).allowed);
        assert!(!log.hit(t0 + Duration::from_secs(60), 3, window).allowed);
    }

    #[test]
    fn retry_after_rounds_up_to_minutes() {
        let decision = |secs: u64, nanos: u32| RateLimitDecision {
            allowed: false,
            reset_in: Duration::new(secs, nanos),
        };
        assert_eq!(decision(0, 1).retry_after_minutes(), 1);
        assert_eq!(decision(60, 0).retry_after_minutes(), 1);
        assert_eq!(decision(60, 1).retry_after_minutes(), 2);
        assert_eq!(decision(3599, 0).retry_after_minutes(), 60);
    }

    #[tokio::test]
    async fn limiter_rejects_sixth_access_request() {
        let limiter = RateLimiter::default();
        for _ in 0..5 {
            limiter
                .check(ActionClass::AccessRequest, "user:u1")
                .await
                .unwrap();
        }
        let err = limiter
            .check(ActionClass::AccessRequest, "user:u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::RateLimited { .. }));
        assert!(err.retry_after().unwrap() >= 59);

        // Other identifiers and classes have their own counters.
        limiter
            .check(ActionClass::AccessRequest, "user:u2")
            .await
            .unwrap();
        limiter.check(ActionClass::Social, "user:u1").await.unwrap();
    }

    #[tokio::test]
    async fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()), false);
        for _ in 0..10 {
            limiter
                .check(ActionClass::AccessRequest, "user:u1")
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let store = InMemoryRateLimitStore::new();
        store.hit("k", 5, Duration::from_secs(60)).await;

        store.purge_stale(Duration::ZERO).await;

        let logs = store.logs.lock().await;
        assert!(logs.is_empty());
    }

    #[test]
    fn client_ip_prefers_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(peer), true), "203.0.113.7");
        assert_eq!(client_ip(&headers, Some(peer), false), "127.0.0.1");

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers, None, true), "198.51.100.2");
        assert_eq!(client_ip(&HeaderMap::new(), None, true), "unknown");
    }
}
