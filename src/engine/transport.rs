//! Shared HTTP transport: a pooled [`reqwest::Client`] plus retry/backoff middleware and
//! rate-limit header tracking.
//!
//! Grounded on the teacher's `clients::common::get_shared_http_client` singleton — one
//! pooled client keeps TLS sessions and DNS lookups warm across every outbound call,
//! sync or batch. [`HttpMiddleware`] wraps that client with the exponential-backoff/
//! jitter retry policy spec.md §4.5/§7 requires, which the teacher does not implement
//! itself (no retry logic exists anywhere in its HTTP clients).

use std::sync::Mutex;
use std::time::Duration;

use lazy_static::lazy_static;
use rand::Rng;

use crate::engine::config::RetryConfig;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling, reused by every sync and
    /// batch call this process makes.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Borrow the lazily initialized shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// `true` if `model` should use the reasoning-model wire shape (`input`/
/// `max_output_tokens`, no `temperature`/`tool_choice`) per spec.md §4.5.
pub fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5") || model.starts_with("o1-")
}

/// Rate-limit headroom observed from a provider response's
/// `x-ratelimit-remaining-requests`/`x-ratelimit-remaining-tokens` headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitSnapshot {
    /// Remaining request quota in the current window, if the header was present.
    pub remaining_requests: Option<u64>,
    /// Remaining token quota in the current window, if the header was present.
    pub remaining_tokens: Option<u64>,
}

impl RateLimitSnapshot {
    /// Parse the rate-limit headers off a response, if present.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        };
        Self {
            remaining_requests: parse("x-ratelimit-remaining-requests"),
            remaining_tokens: parse("x-ratelimit-remaining-tokens"),
        }
    }
}

/// Retries a transport call with exponential backoff and jitter, honoring `Retry-After`
/// when the provider supplies one, and delaying calls while the last observed
/// rate-limit headroom was zero (spec.md §4.9).
///
/// `attempt` is called once per try and must return either a successful `reqwest::Response`
/// or a `reqwest::Error`/status this middleware should retry on (429 and 5xx). Non-retryable
/// errors (4xx other than 429) are returned immediately on first occurrence.
pub struct HttpMiddleware {
    retry: RetryConfig,
    rate_limit: Mutex<RateLimitSnapshot>,
}

impl HttpMiddleware {
    /// Build middleware from the given retry policy.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            rate_limit: Mutex::new(RateLimitSnapshot::default()),
        }
    }

    /// Run `attempt` up to `max_retries + 1` times, backing off between tries.
    pub async fn execute<F, Fut>(&self, mut attempt: F) -> Result<reqwest::Response, reqwest::Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut last_err = None;
        for try_index in 0..=self.retry.max_retries {
            if let Some(delay) = self.rate_limit_delay() {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("rate-limit headroom was zero on the last response; delaying {delay:?}");
                }
                tokio::time::sleep(delay).await;
            }
            match attempt().await {
                Ok(response) => {
                    self.observe_rate_limit(response.headers());
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if !(status.as_u16() == 429 || status.is_server_error()) || try_index == self.retry.max_retries {
                        return Ok(response);
                    }
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!(
                            "transport attempt {} got status {}; retrying",
                            try_index + 1,
                            status
                        );
                    }
                    tokio::time::sleep(retry_after.unwrap_or_else(|| self.backoff_delay(try_index))).await;
                }
                Err(e) => {
                    if try_index == self.retry.max_retries {
                        return Err(e);
                    }
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("transport attempt {} failed: {e}; retrying", try_index + 1);
                    }
                    last_err = Some(e);
                    tokio::time::sleep(self.backoff_delay(try_index)).await;
                }
            }
        }
        Err(last_err.expect("loop always returns or sets last_err before exiting"))
    }

    /// Record the rate-limit headroom of a response, so the next call can be delayed if
    /// it was zero. Headers absent from a given response (e.g. a batch endpoint that
    /// doesn't emit them) leave the last observed snapshot untouched.
    fn observe_rate_limit(&self, headers: &reqwest::header::HeaderMap) {
        let snapshot = RateLimitSnapshot::from_headers(headers);
        if snapshot.remaining_requests.is_some() || snapshot.remaining_tokens.is_some() {
            *self.rate_limit.lock().expect("rate limit lock poisoned") = snapshot;
        }
    }

    /// `Some(delay)` if the last observed response reported zero remaining requests or
    /// tokens; the delay is a jittered `base_delay`, per spec.md §4.9.
    fn rate_limit_delay(&self) -> Option<Duration> {
        let snapshot = *self.rate_limit.lock().expect("rate limit lock poisoned");
        let exhausted = snapshot.remaining_requests == Some(0) || snapshot.remaining_tokens == Some(0);
        exhausted.then(|| {
            let base = self.retry.base_delay.as_secs_f64();
            let jitter = base * self.retry.jitter_factor * rand::thread_rng().gen_range(0.0..=1.0);
            Duration::from_secs_f64(base + jitter)
        })
    }

    fn backoff_delay(&self, try_index: u32) -> Duration {
        let raw = self.retry.base_delay.as_secs_f64() * self.retry.exponential_base.powi(try_index as i32);
        let capped = raw.min(self.retry.max_delay.as_secs_f64());
        let jitter = capped * self.retry.jitter_factor * rand::thread_rng().gen_range(-1.0..=1.0);
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_model_prefixes_are_detected() {
        assert!(is_reasoning_model("gpt-5"));
        assert!(is_reasoning_model("gpt-5-mini"));
        assert!(is_reasoning_model("o1-preview"));
        assert!(!is_reasoning_model("gpt-4o"));
        assert!(!is_reasoning_model("o3-mini"));
    }

    #[test]
    fn backoff_delay_is_bounded_by_max_delay() {
        let middleware = HttpMiddleware::new(RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            exponential_base: 2.0,
            jitter_factor: 0.0,
        });
        for try_index in 0..10 {
            let delay = middleware.backoff_delay(try_index);
            assert!(delay <= Duration::from_secs(2));
        }
    }

    #[test]
    fn rate_limit_snapshot_parses_known_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", "42".parse().unwrap());
        headers.insert("x-ratelimit-remaining-tokens", "0".parse().unwrap());
        let snapshot = RateLimitSnapshot::from_headers(&headers);
        assert_eq!(snapshot.remaining_requests, Some(42));
        assert_eq!(snapshot.remaining_tokens, Some(0));
    }

    #[test]
    fn rate_limit_delay_triggers_once_zero_remaining_is_observed() {
        let middleware = HttpMiddleware::new(RetryConfig {
            max_retries: 1,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter_factor: 0.0,
        });
        assert!(middleware.rate_limit_delay().is_none());

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", "0".parse().unwrap());
        middleware.observe_rate_limit(&headers);

        let delay = middleware.rate_limit_delay().unwrap();
        assert!(delay >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn execute_retries_transport_errors_until_budget_exhausted() {
        let middleware = HttpMiddleware::new(RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter_factor: 0.0,
        });
        let mut calls = 0;
        let result = middleware
            .execute(|| {
                calls += 1;
                async { get_shared_http_client().get("http://127.0.0.1:0").send().await }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 4);
    }
}
