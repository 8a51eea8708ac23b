//! Config Bridge
//!
//! Converts the on-disk [`Config`] into the runtime settings consumed by the
//! LLM client and the network-backed tools.

use crate::config::{Config, ProviderType};
use crate::llm::{LlmConfig, LlmProvider};
use crate::rate_limiter::RateLimitConfig;
use std::time::Duration;

/// Error type for config bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("No API key configured for {provider}; set {env} or PLANWISE_API_KEY")]
    MissingApiKey {
        provider: &'static str,
        env: &'static str,
    },

    #[error("No model configured")]
    NoModelConfigured,
}

/// Convert the unified Config to an [`LlmConfig`] ready for `LlmClient::new()`.
///
/// Gemini always needs a key. OpenAI-compatible endpoints may be local
/// servers, so a missing key is only an error against the default base URL.
pub fn config_to_llm_config(config: &Config) -> Result<LlmConfig, BridgeError> {
    let provider = provider_type_to_llm_provider(config.llm.provider);

    let model = config.model().trim();
    if model.is_empty() {
        return Err(BridgeError::NoModelConfigured);
    }

    let api_key = config
        .llm
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty());

    let needs_key = match config.llm.provider {
        ProviderType::Gemini => true,
        ProviderType::OpenAi => config.llm.base_url.is_none(),
    };
    if needs_key && api_key.is_none() {
        return Err(BridgeError::MissingApiKey {
            provider: provider_label(config.llm.provider),
            env: config.llm.provider.api_key_env(),
        });
    }

    let llm_config = LlmConfig::new(
        provider,
        config.base_url().to_string(),
        model.to_string(),
        api_key,
    )
    .with_temperature(config.llm.temperature)
    .with_max_tokens(config.llm.max_tokens)
    .with_timeout(Duration::from_secs(config.llm.timeout_secs))
    .with_http_retries(
        config.llm.max_retries,
        Duration::from_millis(config.llm.retry_base_delay_ms),
    );

    Ok(llm_config)
}

/// Pacing for completion calls, derived from `[llm]`.
pub fn config_to_llm_rate_limit(config: &Config) -> RateLimitConfig {
    RateLimitConfig {
        min_interval: Duration::ZERO,
        max_rpm: config.llm.max_rpm.max(1),
    }
}

/// Pacing for the search tool, derived from `[search]`.
pub fn config_to_rate_limit(config: &Config) -> RateLimitConfig {
    RateLimitConfig {
        min_interval: Duration::from_millis(config.search.min_interval_ms),
        ..RateLimitConfig::default()
    }
}

fn provider_type_to_llm_provider(pt: ProviderType) -> LlmProvider {
    match pt {
        ProviderType::Gemini => LlmProvider::GoogleGenerativeAi,
        ProviderType::OpenAi => LlmProvider::OpenAiCompatible,
    }
}

fn provider_label(pt: ProviderType) -> &'static str {
    match pt {
        ProviderType::Gemini => "gemini",
        ProviderType::OpenAi => "openai",
    }
}
