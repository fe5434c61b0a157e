use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use thiserror::Error;

use crate::error::GatewayError;
use crate::AppState;

/// Per-client sliding window state: timestamps of admitted requests within
/// the current window, plus an optional instant until which the client is
/// locked out entirely.
#[derive(Debug, Default)]
struct ClientState {
    requests: Vec<Instant>,
    blocked_until: Option<Instant>,
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("client {ip} is rate limited for another {retry_after_secs}s")]
    Blocked { ip: IpAddr, retry_after_secs: u64 },
}

/// A process-local, per-peer-IP sliding-window limiter with a block-out
/// penalty, matching the admission rule in the source `RateLimitMiddleware`:
/// admit up to `capacity` requests per `interval`, then lock the client out
/// for `block_duration` once the window fills.
pub struct RateLimiter {
    capacity: usize,
    interval: Duration,
    block_duration: Duration,
    clients: Mutex<HashMap<IpAddr, ClientState>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, interval: Duration, block_duration: Duration) -> Self {
        Self {
            capacity: capacity as usize,
            interval,
            block_duration,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject a request from `ip` arriving "now". Returns the
    /// remaining block time in seconds on rejection.
    pub fn check(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        let state = clients.entry(ip).or_default();

        if let Some(blocked_until) = state.blocked_until {
            if blocked_until > now {
                let retry_after_secs = (blocked_until - now).as_secs_f64().ceil() as u64;
                return Err(RateLimitError::Blocked {
                    ip,
                    retry_after_secs,
                });
            }
        }

        state.requests.retain(|t| now.duration_since(*t) < self.interval);

        if state.requests.len() >= self.capacity {
            state.blocked_until = Some(now + self.block_duration);
            return Err(RateLimitError::Blocked {
                ip,
                retry_after_secs: self.block_duration.as_secs(),
            });
        }

        state.requests.push(now);
        Ok(())
    }

    /// Drop clients whose most recent activity predates `block_duration`
    /// ago, bounding the table's memory footprint. Call periodically from a
    /// background task; the source has no equivalent and lets the table grow
    /// unbounded (flagged as a known gap).
    pub fn evict_stale(&self) {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        clients.retain(|_, state| {
            let last_seen = state.requests.last().copied();
            let still_blocked = state
                .blocked_until
                .map(|until| until > now)
                .unwrap_or(false);
            still_blocked
                || last_seen
                    .map(|t| now.duration_since(t) < self.block_duration)
                    .unwrap_or(false)
        });
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Axum middleware admitting or rejecting a connection by its transport
/// peer address (§4.1: `request.client.host`, not a trusted-proxy header).
pub async fn admit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    state.rate_limiter.check(peer.ip()).map_err(|err| {
        let RateLimitError::Blocked { ip, retry_after_secs } = err;
        GatewayError::RateLimited {
            ip: ip.to_string(),
            retry_after: retry_after_secs,
        }
    })?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn admits_up_to_capacity_then_blocks() {
        let limiter = RateLimiter::new(15, Duration::from_secs(1), Duration::from_secs(60));
        let ip = loopback();

        for _ in 0..15 {
            assert!(limiter.check(ip).is_ok());
        }

        let err = limiter.check(ip).expect_err("16th request must be rejected");
        match err {
            RateLimitError::Blocked { retry_after_secs, .. } => {
                assert!(retry_after_secs >= 59);
            }
        }

        // Still blocked on the very next call too.
        assert!(limiter.check(ip).is_err());
    }

    #[test]
    fn distinct_clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1), Duration::from_secs(60));
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(limiter.check(a).is_ok());
        assert!(limiter.check(a).is_err());
        assert!(limiter.check(b).is_ok());
    }

    #[test]
    fn eviction_drops_idle_unblocked_clients() {
        let limiter = RateLimiter::new(15, Duration::from_millis(1), Duration::from_millis(1));
        let ip = loopback();
        assert!(limiter.check(ip).is_ok());
        std::thread::sleep(Duration::from_millis(5));
        limiter.evict_stale();
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
