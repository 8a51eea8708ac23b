//! Structured error types for Planwise
//!
//! Every stage of the pipeline recovers from these locally; they only
//! travel between a capability (LLM client, HTTP provider) and the stage
//! that called it.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for Planwise operations
#[derive(Error, Debug)]
pub enum PlanwiseError {
    // =========================================================================
    // Provider / API Errors
    // =========================================================================
    /// Authentication/authorization errors
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Rate limit exceeded (429)
    #[error("rate limit exceeded: {limit_type}")]
    RateLimitExceeded { limit_type: String },

    /// Provider returned an error
    #[error("provider error: {status} - {message}")]
    ProviderError { status: u16, message: String },

    /// The model answered, but not with anything we can use
    #[error("unusable model response: {reason}")]
    InvalidResponse { reason: String },

    /// Circuit breaker refused the call
    #[error("circuit open for {service}, retry later")]
    CircuitOpen { service: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Missing required config
    #[error("missing required configuration: {key}")]
    MissingConfig { key: String },

    // =========================================================================
    // Network / System Errors
    // =========================================================================
    /// Network/connection error
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Timeout; `duration` is the configured limit when the caller knows it
    #[error("operation timed out{}", timeout_suffix(.duration))]
    Timeout { duration: Option<Duration> },

    /// Service unavailable (maintenance, 503)
    #[error("service temporarily unavailable")]
    ServiceUnavailable,

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl PlanwiseError {
    /// Check if error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::ServiceUnavailable => true,
            Self::RateLimitExceeded { .. } => true,

            Self::ProviderError { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),

            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),

            Self::Unauthorized { .. }
            | Self::InvalidResponse { .. }
            | Self::CircuitOpen { .. }
            | Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::Internal { .. }
            | Self::Json(_)
            | Self::Http(_) => false,
        }
    }

    /// Get suggested retry delay for retryable errors
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { .. } => Some(Duration::from_secs(5)),
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(2)),
            Self::ServiceUnavailable => Some(Duration::from_secs(10)),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized { .. } => {
                "Authentication failed. Please check your API key.".to_string()
            }
            Self::RateLimitExceeded { .. } => {
                "The provider is rate limiting requests. Please try again shortly.".to_string()
            }
            Self::MissingConfig { key } => {
                format!("Configuration value '{}' is not set.", key)
            }
            _ => self.to_string(),
        }
    }
}

impl From<anyhow::Error> for PlanwiseError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Self::Io(std::io::Error::new(io_err.kind(), io_err.to_string()));
        }

        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PlanwiseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl PlanwiseError {
    /// Map a transport error from a client built with `timeout`.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                duration: Some(timeout),
            };
        }
        err.into()
    }
}

fn timeout_suffix(duration: &Option<Duration>) -> String {
    match duration {
        Some(d) => format!(" after {}s", d.as_secs_f64()),
        None => String::new(),
    }
}

/// Request URLs are dropped: they can carry credentials in the query string.
impl From<reqwest::Error> for PlanwiseError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            return Self::Timeout { duration: None };
        }
        if err.is_connect() {
            return Self::ConnectionFailed {
                message: err.to_string(),
            };
        }
        match err.status() {
            Some(status) => Self::ProviderError {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::Http(err.to_string()),
        }
    }
}

/// Result type alias using PlanwiseError
pub type Result<T> = std::result::Result<T, PlanwiseError>;

/// Extension trait for converting Option to Result with PlanwiseError
pub trait OptionExt<T> {
    fn ok_or_missing(self, key: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing(self, key: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| PlanwiseError::MissingConfig { key: key.into() })
    }
}
