//! services/api/src/web/rate_limit.rs
//!
//! Per-IP sliding-window rate limiting, applied to every route.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ApiError;
use crate::web::state::AppState;

pub struct RateLimiter {
    requests: DashMap<IpAddr, Vec<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Records a request from `ip` and reports whether it is within budget.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.requests.entry(ip).or_default();
        entry.retain(|&t| now.duration_since(t) < self.window);

        if entry.len() >= self.max_requests {
            false
        } else {
            entry.push(now);
            true
        }
    }

    /// Drops addresses with no request inside the current window.
    pub fn purge_idle(&self) {
        let now = Instant::now();
        self.requests
            .retain(|_, times| times.iter().any(|&t| now.duration_since(t) < self.window));
    }

    pub fn tracked_addresses(&self) -> usize {
        self.requests.len()
    }
}

/// Rejects the request with 429 when the caller's address is over budget.
///
/// Requests served without connection info (e.g. in-process tests) share the
/// unspecified address bucket.
pub async fn rate_limit(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if !state.rate_limiter.check(ip) {
        debug!(%ip, "Rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        assert!(limiter.check(ip(1)));
        assert!(limiter.check(ip(1)));
        assert!(!limiter.check(ip(1)));
    }

    #[tokio::test]
    async fn window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));
        assert!(limiter.check(ip(1)));
        assert!(!limiter.check(ip(1)));

        sleep(Duration::from_millis(150)).await;
        assert!(limiter.check(ip(1)));
    }

    #[tokio::test]
    async fn addresses_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        assert!(limiter.check(ip(1)));
        assert!(limiter.check(ip(2)));
        assert!(!limiter.check(ip(1)));
    }

    #[tokio::test]
    async fn purge_forgets_idle_addresses() {
        let limiter = RateLimiter::new(5, Duration::from_millis(50));
        limiter.check(ip(1));
        limiter.check(ip(2));
        assert_eq!(limiter.tracked_addresses(), 2);

        sleep(Duration::from_millis(80)).await;
        limiter.check(ip(2));
        limiter.purge_idle();
        assert_eq!(limiter.tracked_addresses(), 1);
    }
}
