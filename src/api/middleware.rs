//! Access control for the API.
//!
//! Configured from the environment:
//! - `ESTIMATE_API_KEY` - require the key as `Authorization: Bearer <key>`.
//!   The live channel may pass it as `?token=<key>` instead, since browsers
//!   cannot set headers on a WebSocket handshake.
//! - `ESTIMATE_CORS_ORIGINS` - comma-separated allowed origins (any when unset)
//! - `ESTIMATE_RATE_LIMIT` - requests per minute per client IP

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// Requests per minute per IP when a key is set but no limit is configured.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    pub api_key: Option<String>,
    pub cors_origins: Option<Vec<String>>,
    pub rate_limiter: Option<RateLimiter>,
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        let api_key = env_setting("ESTIMATE_API_KEY");
        let cors_origins = env_setting("ESTIMATE_CORS_ORIGINS").map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect()
        });

        // An exposed server is always limited
        let rate_limit = env_setting("ESTIMATE_RATE_LIMIT")
            .and_then(|s| s.parse().ok())
            .or_else(|| api_key.as_ref().map(|_| DEFAULT_RATE_LIMIT));

        let config = Self {
            api_key,
            cors_origins,
            rate_limiter: rate_limit.map(|max| RateLimiter::new(max, RATE_WINDOW)),
        };
        tracing::debug!(
            auth = config.api_key.is_some(),
            cors = ?config.cors_origins,
            ?rate_limit,
            "loaded security config"
        );
        config
    }

    /// No auth, any origin, no limit.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn with_rate_limit(max_requests: u32) -> Self {
        Self {
            rate_limiter: Some(RateLimiter::new(max_requests, RATE_WINDOW)),
            ..Self::default()
        }
    }

    /// Whether `request` carries the configured key. Always true without one.
    fn authorizes(&self, request: &Request<Body>) -> bool {
        match &self.api_key {
            Some(expected) => presented_key(request).is_some_and(|key| key == expected.as_str()),
            None => true,
        }
    }
}

fn env_setting(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The bearer token, or the `token` query parameter when there is no
/// `Authorization` header.
fn presented_key(request: &Request<Body>) -> Option<&str> {
    match request.headers().get(header::AUTHORIZATION) {
        Some(value) => value.to_str().ok()?.strip_prefix("Bearer "),
        None => request
            .uri()
            .query()?
            .split('&')
            .find_map(|pair| pair.strip_prefix("token=")),
    }
}

/// Sliding-window request counter per client IP.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Arc<Mutex<HashMap<IpAddr, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            hits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a request from `ip`. When the window is full, returns how long
    /// until the oldest request in it expires.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter lock poisoned");
        let recent = hits.entry(ip).or_default();
        self.expire(recent, now);

        if recent.len() < self.max_requests {
            recent.push_back(now);
            return Ok(());
        }
        let oldest = recent.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }

    /// Forget IPs with nothing left in the window. The server calls this
    /// once per window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter lock poisoned");
        hits.retain(|_, recent| {
            self.expire(recent, now);
            !recent.is_empty()
        });
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn expire(&self, recent: &mut VecDeque<Instant>, now: Instant) {
        while recent
            .front()
            .is_some_and(|&hit| now.duration_since(hit) >= self.window)
        {
            recent.pop_front();
        }
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.hits.lock().expect("rate limiter lock poisoned").len()
    }
}

pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if config.authorizes(&request) {
        return Ok(next.run(request).await);
    }
    // Path only: the query may hold a token.
    tracing::warn!(path = %request.uri().path(), "Rejected request without a valid API key");
    Err(StatusCode::UNAUTHORIZED)
}

pub async fn rate_limit_middleware(
    State(rate_limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    match rate_limiter.check(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            let seconds = retry_after.as_secs_f64().ceil() as u64;
            tracing::warn!(%ip, retry_after = seconds, "Rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, seconds.to_string())],
            )
                .into_response()
        }
    }
}

/// First address of `X-Forwarded-For`, then `X-Real-IP`, else localhost.
fn client_ip(request: &Request<Body>) -> IpAddr {
    let header_value = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    };

    header_value("X-Forwarded-For")
        .and_then(|list| list.split(',').next())
        .or_else(|| header_value("X-Real-IP"))
        .and_then(|ip| ip.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn request(uri: &str, authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn limiter_blocks_past_the_limit_per_ip() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.check(ip("192.168.1.1")).is_ok());
        assert!(limiter.check(ip("192.168.1.1")).is_ok());
        let retry = limiter.check(ip("192.168.1.1")).unwrap_err();
        assert!(retry > Duration::from_secs(59) && retry <= Duration::from_secs(60));

        assert!(limiter.check(ip("192.168.1.2")).is_ok());
    }

    #[test]
    fn limiter_frees_slots_as_the_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        let client = ip("10.0.0.1");

        assert!(limiter.check(client).is_ok());
        assert!(limiter.check(client).is_err());
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check(client).is_ok());
    }

    #[test]
    fn cleanup_forgets_idle_ips() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        limiter.check(ip("10.0.0.1")).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        limiter.cleanup();
        assert_eq!(limiter.tracked_ips(), 0);
    }

    #[test]
    fn disabled_config_lets_everything_through() {
        let config = SecurityConfig::disabled();
        assert!(config.rate_limiter.is_none());
        assert!(config.authorizes(&request("/api/estimates", None)));
    }

    #[test]
    fn key_is_accepted_as_bearer_or_query_token() {
        let config = SecurityConfig::with_api_key("k3y");

        assert!(config.authorizes(&request("/api/estimates", Some("Bearer k3y"))));
        assert!(config.authorizes(&request("/api/estimates/e1/live?token=k3y", None)));

        assert!(!config.authorizes(&request("/api/estimates", None)));
        assert!(!config.authorizes(&request("/api/estimates", Some("Bearer nope"))));
        assert!(!config.authorizes(&request("/api/estimates", Some("Basic k3y"))));
        // A bad header is not rescued by the query.
        assert!(!config.authorizes(&request("/api/estimates?token=k3y", Some("Bearer nope"))));
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let forwarded = Request::builder()
            .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .header("X-Real-IP", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&forwarded), ip("203.0.113.7"));

        let real = Request::builder()
            .header("X-Real-IP", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&real), ip("198.51.100.2"));

        assert_eq!(client_ip(&request("/", None)), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
