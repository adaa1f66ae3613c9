//! Per-client sliding-window rate limiting

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window limiter keyed by client
///
/// Each key may make `max_requests` calls within any `window`.
#[derive(Debug)]
pub struct RateLimiter {
    requests: DashMap<String, VecDeque<Instant>>,
    window: Duration,
    max_requests: usize,
    message: &'static str,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize, message: &'static str) -> Self {
        Self {
            requests: DashMap::new(),
            window,
            max_requests,
            message,
        }
    }

    /// 10 preference/activity calls per minute
    pub fn preference_updates(max_per_minute: usize) -> Self {
        Self::new(
            Duration::from_secs(60),
            max_per_minute,
            "Too many preference updates, please try again later.",
        )
    }

    /// 3 review submissions per hour
    pub fn review_submissions(max_per_hour: usize) -> Self {
        Self::new(
            Duration::from_secs(60 * 60),
            max_per_hour,
            "Too many review attempts, please try again later.",
        )
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    /// Check whether `key` may proceed and record the attempt if so
    pub fn check_and_record(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut entry = self.requests.entry(key.to_string()).or_default();

        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= self.max_requests {
            return false;
        }

        entry.push_back(now);
        true
    }

    /// Drop keys with no request inside the window
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.requests.retain(|_, stamps| {
            stamps.retain(|ts| now.duration_since(*ts) < self.window);
            !stamps.is_empty()
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(feature = "web")]
pub use web::{ForwardedTrust, client_ip, enforce, spawn_cleanup};

#[cfg(feature = "web")]
mod web {
    use super::RateLimiter;
    use crate::error::AppError;
    use axum::{
        extract::{ConnectInfo, Request, State},
        http::{Extensions, HeaderMap},
        middleware::Next,
        response::{IntoResponse, Response},
    };
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    /// Request extension saying whether `X-Forwarded-For` comes from a
    /// trusted reverse proxy. Absent means untrusted.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ForwardedTrust(pub bool);

    /// Client address used as the rate-limit key
    ///
    /// The socket peer, unless [`ForwardedTrust`] is set, in which case the
    /// first `X-Forwarded-For` hop wins.
    pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
        let trusted = extensions
            .get::<ForwardedTrust>()
            .is_some_and(|ForwardedTrust(trust)| *trust);

        if trusted {
            if let Some(forwarded) = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
            {
                return forwarded.to_string();
            }
        }

        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Middleware rejecting clients over the limiter's budget with 429
    pub async fn enforce(
        State(limiter): State<Arc<RateLimiter>>,
        request: Request,
        next: Next,
    ) -> Response {
        let key = client_ip(request.headers(), request.extensions());
        if !limiter.check_and_record(&key) {
            log::warn!("rate limit hit for client {}", key);
            return AppError::RateLimited(limiter.message().to_string()).into_response();
        }
        next.run(request).await
    }

    /// Periodically drop idle clients from every limiter
    pub fn spawn_cleanup(limiters: Vec<Arc<RateLimiter>>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for limiter in &limiters {
                    limiter.cleanup();
                }
                log::debug!(
                    "rate limiter cleanup: {} clients tracked",
                    limiters.iter().map(|l| l.tracked_clients()).sum::<usize>()
                );
            }
        })
    }
}
