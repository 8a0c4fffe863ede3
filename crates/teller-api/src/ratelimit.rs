use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fixed-window request counter per client IP for the bind/status
/// endpoints. When the teller sits behind a reverse proxy the client IP
/// comes from X-Forwarded-For instead of the peer address.
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    max: u32,
    window: Duration,
    behind_proxy: bool,
}

struct Window {
    count: u32,
    started: Instant,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, behind_proxy: bool) -> Self {
        Self {
            windows: DashMap::new(),
            max,
            window,
            behind_proxy,
        }
    }

    /// Count one request from `ip`; false when over the limit.
    pub fn check(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(ip.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }
        entry.count += 1;
        entry.count <= self.max
    }

    pub fn client_ip(&self, headers: &HeaderMap, peer: SocketAddr) -> String {
        if self.behind_proxy {
            if let Some(forwarded) = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
            {
                let forwarded = forwarded.trim();
                if !forwarded.is_empty() {
                    return forwarded.to_string();
                }
            }
        }
        peer.ip().to_string()
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = limiter.client_ip(request.headers(), peer);
    if !limiter.check(&ip) {
        debug!(ip = %ip, "Request throttled");
        return crate::http::error_response(
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            "Too many requests",
        );
    }
    next.run(request).await
}
