//! LLM client module
//!
//! The pipeline only ever sees [`CompletionCapability`]: system instructions
//! plus user content in, text out. [`LlmClient`] implements it over HTTP for
//! Google Gemini and OpenAI-compatible endpoints; [`RetryCompletion`] wraps
//! any capability with backoff.

pub mod chat;
pub mod client;
pub mod retry;

pub use chat::{ChatMessage, ChatRequest, ChatResponse, MessageRole, ResponseFormat, Usage};
pub use client::{LlmClient, LlmProvider};
pub use retry::{CircuitBreaker, RetryCompletion, RetryConfig};

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Text completion capability consumed by the planner, validator and
/// synthesizer.
#[async_trait]
pub trait CompletionCapability: Send + Sync {
    /// Short identifier used in log lines
    fn name(&self) -> &'static str;

    /// Free-text completion.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Completion where the caller expects JSON back. Providers that can
    /// constrain their output should do so; the reply is still parsed
    /// defensively by the caller.
    async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        self.complete(system, user).await
    }
}

/// LLM Configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider type
    pub provider: LlmProvider,
    /// API endpoint base URL
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// API key (if required)
    pub api_key: Option<String>,
    /// Maximum tokens in response
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// Retries made by the client's backoff loop on 429, 5xx and network errors
    pub max_http_retries: u32,
    /// First backoff delay; doubled (with jitter) on every retry
    pub retry_base_delay: Duration,
}

impl LlmConfig {
    pub fn new(provider: LlmProvider, base_url: String, model: String, api_key: Option<String>) -> Self {
        LlmConfig {
            provider,
            base_url,
            model,
            api_key,
            max_tokens: None,
            temperature: Some(0.7),
            timeout: Duration::from_secs(120),
            max_http_retries: 2,
            retry_base_delay: Duration::from_secs(2),
        }
    }

    pub fn with_http_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.max_http_retries = retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_max_tokens(mut self, tokens: Option<u32>) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp.clamp(0.0, 2.0));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
