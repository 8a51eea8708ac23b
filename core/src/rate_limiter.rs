//! Rate Limiter Module
//!
//! Per-endpoint pacing for outbound provider calls: a minimum spacing
//! between consecutive requests plus a requests-per-minute sliding window.
//! Respects Retry-After hints recorded after a 429.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum spacing between two requests to the same endpoint
    pub min_interval: Duration,
    /// Maximum requests per minute per endpoint
    pub max_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            max_rpm: 30,
        }
    }
}

impl RateLimitConfig {
    /// No pacing at all; used by tests and local providers.
    pub fn unlimited() -> Self {
        Self {
            min_interval: Duration::ZERO,
            max_rpm: u32::MAX,
        }
    }
}

#[derive(Debug, Default)]
struct EndpointState {
    last_request: Option<Instant>,
    request_times: Vec<Instant>,
    blocked_until: Option<Instant>,
}

impl EndpointState {
    fn cleanup_old_entries(&mut self, now: Instant) {
        let window = Duration::from_secs(60);
        self.request_times
            .retain(|t| now.duration_since(*t) < window);
    }

    /// How long the caller has to wait before the next request may go out.
    fn time_until_available(&self, now: Instant, config: &RateLimitConfig) -> Duration {
        let mut wait = Duration::ZERO;

        if let Some(until) = self.blocked_until {
            wait = wait.max(until.saturating_duration_since(now));
        }

        if let Some(last) = self.last_request {
            let ready_at = last + config.min_interval;
            wait = wait.max(ready_at.saturating_duration_since(now));
        }

        if self.request_times.len() as u64 >= config.max_rpm as u64 {
            if let Some(oldest) = self.request_times.first() {
                let ready_at = *oldest + Duration::from_secs(60);
                wait = wait.max(ready_at.saturating_duration_since(now));
            }
        }

        wait
    }
}

/// Endpoint-keyed rate limiter shared by the network-backed tools
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request to `endpoint` is allowed, then reserve the slot.
    pub async fn acquire(&self, endpoint: &str) {
        loop {
            let wait = {
                let mut endpoints = self.endpoints.lock();
                let state = endpoints.entry(endpoint.to_string()).or_default();
                let now = Instant::now();
                state.cleanup_old_entries(now);

                let wait = state.time_until_available(now, &self.config);
                if wait.is_zero() {
                    state.last_request = Some(now);
                    state.request_times.push(now);
                    state.blocked_until = None;
                    return;
                }
                wait
            };

            tracing::debug!(endpoint, wait_ms = wait.as_millis() as u64, "rate limiting request");
            sleep(wait).await;
        }
    }

    /// Record a 429 from the provider; blocks the endpoint for `retry_after`
    /// (or the configured minimum interval when the provider sent no hint).
    pub fn record_rate_limit_error(&self, endpoint: &str, retry_after: Option<Duration>) {
        let mut endpoints = self.endpoints.lock();
        let state = endpoints.entry(endpoint.to_string()).or_default();
        let block = retry_after.unwrap_or(self.config.min_interval);
        state.blocked_until = Some(Instant::now() + block);
        tracing::warn!(endpoint, block_ms = block.as_millis() as u64, "provider rate limited us");
    }

    /// Requests made to `endpoint` in the current one-minute window.
    pub fn current_rpm(&self, endpoint: &str) -> usize {
        let mut endpoints = self.endpoints.lock();
        match endpoints.get_mut(endpoint) {
            Some(state) => {
                state.cleanup_old_entries(Instant::now());
                state.request_times.len()
            }
            None => 0,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
