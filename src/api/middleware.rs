//! Bearer-token authentication for the API and throttling of the auto-loop
//! control routes (`/auto-mode/start`, `/auto-mode/stop`).
//!
//! Only start and stop are throttled: they spawn loops and flip scheduling
//! state, while status polls and feature edits are cheap reads and writes.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;

use super::handlers::ApiError;

/// Start/stop requests per minute per client when only an API key is set.
pub const DEFAULT_CONTROL_RATE: u32 = 30;

#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    /// Bearer token every route except `/health` must present.
    pub api_key: Option<String>,
    /// Allowed CORS origins; permissive when unset.
    pub cors_origins: Option<Vec<String>>,
    /// Applied to the auto-loop control routes only.
    pub control_limiter: Option<ControlRateLimiter>,
}

impl SecurityConfig {
    /// Read `AUTOMODE_API_KEY`, `AUTOMODE_CORS_ORIGINS` and `AUTOMODE_RATE_LIMIT`.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from a variable lookup. The control throttle is on when
    /// `AUTOMODE_RATE_LIMIT` is set, or by default once an API key exposes the
    /// server beyond localhost.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = var("AUTOMODE_API_KEY").filter(|k| !k.trim().is_empty());

        let cors_origins = var("AUTOMODE_CORS_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect()
        });

        let rate = match var("AUTOMODE_RATE_LIMIT") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(0) => None,
                Ok(per_minute) => Some(per_minute),
                Err(_) => {
                    tracing::warn!("Ignoring invalid AUTOMODE_RATE_LIMIT: {}", raw);
                    api_key.as_ref().map(|_| DEFAULT_CONTROL_RATE)
                }
            },
            None => api_key.as_ref().map(|_| DEFAULT_CONTROL_RATE),
        };

        Self {
            api_key,
            cors_origins,
            control_limiter: rate.map(ControlRateLimiter::per_minute),
        }
    }

    /// No authentication and no throttling.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn with_control_rate_limit(per_minute: u32) -> Self {
        Self {
            control_limiter: Some(ControlRateLimiter::per_minute(per_minute)),
            ..Self::default()
        }
    }
}

/// Token bucket per client: `per_minute` tokens of burst, refilled evenly
/// over a minute.
#[derive(Clone, Debug)]
pub struct ControlRateLimiter {
    per_minute: u32,
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl ControlRateLimiter {
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            per_minute: per_minute.max(1),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn capacity(&self) -> f64 {
        f64::from(self.per_minute)
    }

    fn tokens_per_sec(&self) -> f64 {
        self.capacity() / 60.0
    }

    /// Spend one token for `client`. When the bucket is empty, returns how
    /// long until the next token is available.
    pub fn acquire(&self, client: IpAddr) -> Result<(), Duration> {
        self.acquire_at(client, Instant::now())
    }

    fn acquire_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        let capacity = self.capacity();
        let rate = self.tokens_per_sec();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(client).or_insert(Bucket {
            tokens: capacity,
            updated: now,
        });

        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / rate))
        }
    }

    /// Forget clients whose bucket has refilled; they start full anyway.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    fn cleanup_at(&self, now: Instant) {
        let capacity = self.capacity();
        let rate = self.tokens_per_sec();
        self.buckets.lock().retain(|_, bucket| {
            let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
            bucket.tokens + elapsed * rate < capacity
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }
}

pub async fn require_api_key(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = config.api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => next.run(request).await,
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "rejected request with an invalid API key");
            ApiError::Unauthorized("Invalid API key".to_string()).into_response()
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "rejected request without a bearer token");
            ApiError::Unauthorized("Missing bearer token".to_string()).into_response()
        }
    }
}

pub async fn throttle_auto_mode_control(
    State(limiter): State<ControlRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = peer_ip(&request);
    match limiter.acquire(client) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;
            tracing::warn!(
                client = %client,
                path = %request.uri().path(),
                retry_after,
                "auto-mode control rate limit exceeded"
            );
            let mut response = ApiError::TooManyRequests(format!(
                "Too many auto-mode start/stop requests, retry in {}s",
                retry_after
            ))
            .into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}

/// The socket peer. Proxy headers are not trusted; without connection info
/// (in-process tests) every request shares the loopback bucket.
fn peer_ip(request: &Request<Body>) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

    #[test]
    fn bucket_allows_a_burst_then_refuses() {
        let limiter = ControlRateLimiter::per_minute(2);
        let now = Instant::now();

        assert!(limiter.acquire_at(CLIENT, now).is_ok());
        assert!(limiter.acquire_at(CLIENT, now).is_ok());
        let wait = limiter.acquire_at(CLIENT, now).unwrap_err();
        assert_eq!(wait.as_secs_f64().round() as u64, 30);
    }

    #[test]
    fn bucket_refills_over_time() {
        let limiter = ControlRateLimiter::per_minute(60);
        let start = Instant::now();
        for _ in 0..60 {
            assert!(limiter.acquire_at(CLIENT, start).is_ok());
        }
        assert!(limiter.acquire_at(CLIENT, start).is_err());

        assert!(limiter
            .acquire_at(CLIENT, start + Duration::from_secs(1))
            .is_ok());
    }

    #[test]
    fn cleanup_forgets_only_refilled_clients() {
        let limiter = ControlRateLimiter::per_minute(2);
        let start = Instant::now();
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 8));
        limiter.acquire_at(CLIENT, start).unwrap();
        limiter.acquire_at(other, start + Duration::from_secs(25)).unwrap();

        limiter.cleanup_at(start + Duration::from_secs(31));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn api_key_turns_on_the_default_throttle() {
        let config = SecurityConfig::from_vars(vars(&[("AUTOMODE_API_KEY", "s3cret")]));
        assert_eq!(config.api_key.as_deref(), Some("s3cret"));
        assert_eq!(
            config.control_limiter.map(|l| l.per_minute),
            Some(DEFAULT_CONTROL_RATE)
        );
    }

    #[test]
    fn explicit_rate_works_without_a_key_and_zero_disables_it() {
        let config = SecurityConfig::from_vars(vars(&[("AUTOMODE_RATE_LIMIT", "5")]));
        assert!(config.api_key.is_none());
        assert_eq!(config.control_limiter.map(|l| l.per_minute), Some(5));

        let config = SecurityConfig::from_vars(vars(&[
            ("AUTOMODE_API_KEY", "s3cret"),
            ("AUTOMODE_RATE_LIMIT", "0"),
        ]));
        assert!(config.control_limiter.is_none());
    }

    #[test]
    fn blank_key_and_empty_origins_are_ignored() {
        let config = SecurityConfig::from_vars(vars(&[
            ("AUTOMODE_API_KEY", "  "),
            ("AUTOMODE_CORS_ORIGINS", "http://a.test, ,http://b.test"),
        ]));
        assert!(config.api_key.is_none());
        assert!(config.control_limiter.is_none());
        assert_eq!(
            config.cors_origins,
            Some(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
    }
}
