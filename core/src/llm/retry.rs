//! Retry and circuit breaking for completion calls
//!
//! [`RetryCompletion`] wraps any [`CompletionCapability`] and retries the
//! transient failures reported by [`PlanwiseError::is_retryable`].
//! [`CircuitBreaker`] is shared with the network-backed tools.

use super::CompletionCapability;
use crate::error::{PlanwiseError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            exponential_base: 2.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Calculate delay for retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = self.base_delay_ms as f64 * self.exponential_base.powi(attempt as i32 - 1);
        let delay = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay)
    }
}

/// Retry + circuit breaker wrapper around a completion capability
pub struct RetryCompletion {
    inner: Arc<dyn CompletionCapability>,
    config: RetryConfig,
    breaker: Option<CircuitBreaker>,
}

impl RetryCompletion {
    pub fn new(inner: Arc<dyn CompletionCapability>, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            breaker: None,
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    async fn call<F, Fut>(&self, op: F) -> Result<String>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        if let Some(breaker) = &self.breaker {
            if !breaker.allow_request() {
                return Err(PlanwiseError::CircuitOpen {
                    service: self.inner.name().to_string(),
                });
            }
        }

        let mut attempt = 0;
        let result = loop {
            match op().await {
                Ok(text) => break Ok(text),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = e
                        .retry_delay()
                        .unwrap_or_default()
                        .max(self.config.delay_for_attempt(attempt));
                    tracing::warn!(
                        capability = self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "completion failed, retrying: {}",
                        e
                    );
                    sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        if let Some(breaker) = &self.breaker {
            match &result {
                Ok(_) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }
        }
        result
    }
}

#[async_trait::async_trait]
impl CompletionCapability for RetryCompletion {
    fn name(&self) -> &'static str {
        "retry-completion"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.call(|| self.inner.complete(system, user)).await
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        self.call(|| self.inner.complete_json(system, user)).await
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker for fault tolerance
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    state: Mutex<CircuitState>,
    failures: AtomicU32,
    successes: AtomicU32,
    last_failure_time: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            timeout,
            state: Mutex::new(CircuitState::Closed),
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            last_failure_time: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    /// Check if request should be allowed. An open breaker turns half-open
    /// once the timeout has elapsed since the last failure.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = self
                    .last_failure_time
                    .lock()
                    .is_some_and(|t| t.elapsed() > self.timeout);
                if expired {
                    *state = CircuitState::HalfOpen;
                }
                expired
            }
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);

        let mut state = self.state.lock();
        if *state == CircuitState::HalfOpen {
            let successes = self.successes.fetch_add(1, Ordering::Relaxed) + 1;
            if successes >= self.success_threshold {
                *state = CircuitState::Closed;
                self.successes.store(0, Ordering::Relaxed);
            }
        }
    }

    pub fn record_failure(&self) {
        self.successes.store(0, Ordering::Relaxed);
        *self.last_failure_time.lock() = Some(Instant::now());

        let mut state = self.state.lock();
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            return;
        }

        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.failure_threshold && *state != CircuitState::Open {
            tracing::warn!(failures, "circuit breaker opened");
            *state = CircuitState::Open;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, 2, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
        error: fn() -> PlanwiseError,
    }

    #[async_trait::async_trait]
    impl CompletionCapability for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err((self.error)())
            } else {
                Ok("ok".to_string())
            }
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            exponential_base: 2.0,
        }
    }

    #[test]
    fn test_retry_config_delay() {
        let config = RetryConfig {
            base_delay_ms: 100,
            ..RetryConfig::default()
        };

        assert_eq!(config.delay_for_attempt(0).as_millis(), 0);
        assert_eq!(config.delay_for_attempt(1).as_millis(), 100);
        assert_eq!(config.delay_for_attempt(2).as_millis(), 200);
        assert_eq!(config.delay_for_attempt(3).as_millis(), 400);
        assert_eq!(config.delay_for_attempt(20).as_millis(), 10_000);
    }

    #[test]
    fn test_circuit_breaker() {
        let breaker = CircuitBreaker::new(3, 2, Duration::from_millis(50));

        assert!(breaker.allow_request());

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert!(!breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let inner = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            error: || PlanwiseError::ProviderError {
                status: 503,
                message: "busy".to_string(),
            },
        });
        let retry = RetryCompletion::new(inner.clone(), fast());
        assert_eq!(retry.complete("s", "u").await.unwrap(), "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let inner = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 5,
            error: || PlanwiseError::Unauthorized {
                message: "nope".to_string(),
            },
        });
        let retry = RetryCompletion::new(inner.clone(), fast());
        assert!(retry.complete("s", "u").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let inner = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            error: || PlanwiseError::ServiceUnavailable,
        });
        let breaker = CircuitBreaker::new(1, 1, Duration::from_secs(60));
        breaker.record_failure();
        let retry = RetryCompletion::new(inner.clone(), fast()).with_breaker(breaker);

        let err = retry.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, PlanwiseError::CircuitOpen { .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }
}
