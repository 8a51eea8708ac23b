//! LLM Client implementation
//!
//! Supports two wire formats:
//! - Google Generative AI (Gemini) `generateContent`
//! - OpenAI-compatible `/chat/completions` (OpenAI, Ollama, LM Studio, ...)

use super::{
    chat::{ChatMessage, ChatRequest, ChatResponse, MessageRole, ResponseFormat, Usage},
    CompletionCapability, LlmConfig,
};
use crate::error::{OptionExt, PlanwiseError, Result};
use crate::rate_limiter::RateLimiter;
use crate::util::{host_of, sanitize_base_url, validate_api_key};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client as HttpClient, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};

const GEMINI_API_KEY_HEADER: &str = "x-goog-api-key";

/// LLM Provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// OpenAI-compatible API (works with OpenAI, Ollama, LM Studio, local models)
    OpenAiCompatible,
    /// Google Generative AI (Gemini)
    GoogleGenerativeAi,
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "ollama" | "lmstudio" | "local" | "openrouter" | "custom" => {
                Ok(LlmProvider::OpenAiCompatible)
            }
            "google" | "gemini" | "google-ai" | "google-generativeai" => {
                Ok(LlmProvider::GoogleGenerativeAi)
            }
            _ => Err(format!("Unknown LLM provider: {}", s)),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::OpenAiCompatible => write!(f, "OpenAI Compatible"),
            LlmProvider::GoogleGenerativeAi => write!(f, "Google Generative AI"),
        }
    }
}

/// Main LLM Client
pub struct LlmClient {
    config: LlmConfig,
    base_url: String,
    http_client: HttpClient,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl LlmClient {
    /// Create a new LLM client. Fails early on a malformed base URL or API key.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let base_url = sanitize_base_url(&config.base_url, "LLM base URL")?;
        if let Some(key) = &config.api_key {
            validate_api_key(key)?;
        }

        let http_client = HttpClient::builder()
            .timeout(config.timeout)
            .user_agent(concat!("planwise/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlanwiseError::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(LlmClient {
            config,
            base_url,
            http_client,
            rate_limiter: None,
        })
    }

    /// Pace requests through a rate limiter keyed by the provider host
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Send a chat request and get a response
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            estimated_tokens = request.estimated_tokens(),
            "chat request"
        );

        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire(host_of(&self.base_url)).await;
        }

        let started = Instant::now();
        let result = match self.config.provider {
            LlmProvider::OpenAiCompatible => self.chat_openai(request).await,
            LlmProvider::GoogleGenerativeAi => self.chat_gemini(request).await,
        };

        match &result {
            Ok(response) => match response.usage {
                Some(usage) => tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    prompt = usage.prompt_tokens,
                    completion = usage.completion_tokens,
                    "chat completed"
                ),
                None => tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "chat completed (no usage data)"
                ),
            },
            Err(e) => tracing::error!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "chat failed: {}",
                e
            ),
        }

        result
    }

    /// Jittered exponential backoff, honoring Retry-After on 429.
    async fn retry_with_backoff<F, Fut>(&self, operation: F) -> Result<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<reqwest::Response, reqwest::Error>>,
    {
        let max_retries = self.config.max_http_retries;
        let mut attempt = 0;
        let mut delay = self.config.retry_base_delay;

        loop {
            match operation().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs);

                        if let Some(limiter) = &self.rate_limiter {
                            limiter.record_rate_limit_error(host_of(&self.base_url), retry_after);
                        }

                        if attempt >= max_retries {
                            tracing::error!(max_retries, "rate limit (429) exceeded max retries, giving up");
                            return Ok(response);
                        }

                        let wait = retry_after.unwrap_or(delay);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries,
                            wait_ms = wait.as_millis() as u64,
                            "rate limited (429), backing off"
                        );
                        sleep(wait).await;
                        delay *= 2;
                        attempt += 1;
                        continue;
                    }

                    if !(status.is_server_error() && attempt < max_retries) {
                        return Ok(response);
                    }
                    tracing::warn!(%status, wait_ms = delay.as_millis() as u64, "provider error, retrying");
                }
                Err(e) => {
                    let err = PlanwiseError::from_transport(e, self.config.timeout);
                    if attempt >= max_retries || !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(wait_ms = delay.as_millis() as u64, "network error, retrying: {}", err);
                }
            }

            attempt += 1;
            sleep(delay).await;

            // Jitter: +/- 500ms on top of doubling
            let jitter_ms = rand::thread_rng().gen_range(-500i64..=500);
            let delay_ms = (delay.as_millis() as i64 * 2 + jitter_ms).max(0) as u64;
            delay = Duration::from_millis(delay_ms);
        }
    }

    /// OpenAI-compatible API chat
    async fn chat_openai(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        // `json_object` would force an object at the top level, but plans are
        // arrays, so JSON requests rely on the prompt and lenient parsing here.
        let body = OpenAiRequest {
            model: &self.config.model,
            messages: &request.messages,
            max_completion_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let headers = self.build_headers()?;
        let response = self
            .retry_with_backoff(|| async {
                self.http_client
                    .post(&url)
                    .headers(headers.clone())
                    .json(&body)
                    .send()
                    .await
            })
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(error_for_status(status, response).await);
        }

        let text = response.text().await?;
        let body: OpenAiResponse = serde_json::from_str(&text).map_err(|e| {
            tracing::error!("failed to parse OpenAI response: {}. Raw body: {}", e, text);
            PlanwiseError::InvalidResponse {
                reason: format!("unparseable OpenAI response: {}", e),
            }
        })?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PlanwiseError::InvalidResponse {
                reason: "response contained no choices".to_string(),
            })?;

        Ok(ChatResponse {
            model: body.model.unwrap_or_else(|| self.config.model.clone()),
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: body.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    /// Google Gemini API chat
    async fn chat_gemini(&self, request: &ChatRequest) -> Result<ChatResponse> {
        // Merge consecutive messages of the same role; Gemini rejects
        // back-to-back turns from one side.
        let mut contents: Vec<GeminiContent> = Vec::new();
        let mut system_parts = Vec::new();

        for m in &request.messages {
            if m.content.trim().is_empty() {
                continue;
            }
            let role = match m.role {
                MessageRole::System => {
                    system_parts.push(m.content.clone());
                    continue;
                }
                MessageRole::Assistant => "model",
                MessageRole::User => "user",
            };

            if let Some(last) = contents.last_mut() {
                if last.role == role {
                    if let Some(first_part) = last.parts.first_mut() {
                        first_part.text.push_str("\n\n");
                        first_part.text.push_str(&m.content);
                        continue;
                    }
                }
            }
            contents.push(GeminiContent {
                role: role.to_string(),
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            });
        }

        // Contents must start with a user turn.
        while contents.first().is_some_and(|c| c.role != "user") {
            contents.remove(0);
        }
        if contents.is_empty() {
            return Err(PlanwiseError::InvalidConfig {
                message: "chat request has no user content".to_string(),
            });
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: "system".to_string(),
                parts: vec![GeminiPart {
                    text: system_parts.join("\n\n"),
                }],
            })
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(&self.config.model)
        );
        let headers = self.gemini_headers()?;

        let body = GeminiRequest {
            contents,
            system_instruction,
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                response_mime_type: match request.response_format {
                    ResponseFormat::Json => Some("application/json".to_string()),
                    ResponseFormat::Text => None,
                },
            }),
        };

        let response = self
            .retry_with_backoff(|| async {
                self.http_client
                    .post(&url)
                    .headers(headers.clone())
                    .json(&body)
                    .send()
                    .await
            })
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(error_for_status(status, response).await);
        }

        let text = response.text().await?;
        let body: GeminiResponse =
            serde_json::from_str(&text).map_err(|e| PlanwiseError::InvalidResponse {
                reason: format!("unparseable Gemini response: {}", e),
            })?;

        let candidate = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| PlanwiseError::InvalidResponse {
                reason: "response contained no candidates".to_string(),
            })?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            model: self.config.model.clone(),
            content,
            finish_reason: candidate.finish_reason,
            usage: body.usage_metadata.map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
        })
    }

    /// Build headers for OpenAI-compatible requests
    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &self.config.api_key {
            let key = validate_api_key(api_key)?;
            let value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e| {
                PlanwiseError::InvalidConfig {
                    message: format!("invalid Authorization header: {}", e),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    /// Gemini takes the key as a header so it never appears in a URL.
    fn gemini_headers(&self) -> Result<HeaderMap> {
        let api_key = self.config.api_key.as_deref().ok_or_missing("llm.api_key")?;
        let key = validate_api_key(api_key)?;
        let value = HeaderValue::from_str(&key).map_err(|e| PlanwiseError::InvalidConfig {
            message: format!("invalid API key header: {}", e),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(GEMINI_API_KEY_HEADER, value);
        Ok(headers)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }
}

#[async_trait]
impl CompletionCapability for LlmClient {
    fn name(&self) -> &'static str {
        "llm-client"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest::instructed(system, user);
        Ok(self.chat(&request).await?.content)
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        let request =
            ChatRequest::instructed(system, user).with_response_format(ResponseFormat::Json);
        Ok(self.chat(&request).await?.content)
    }
}

/// Map a non-200 response onto the error taxonomy.
async fn error_for_status(status: StatusCode, response: reqwest::Response) -> PlanwiseError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlanwiseError::Unauthorized {
            message: format!("provider answered {}", status),
        },
        StatusCode::TOO_MANY_REQUESTS => PlanwiseError::RateLimitExceeded {
            limit_type: "requests".to_string(),
        },
        StatusCode::SERVICE_UNAVAILABLE => PlanwiseError::ServiceUnavailable,
        _ => {
            let error_body: Option<serde_json::Value> = response.json().await.ok();
            let message = error_body
                .as_ref()
                .and_then(|v| v.get("error").and_then(|e| e.get("message")))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            PlanwiseError::ProviderError {
                status: status.as_u16(),
                message,
            }
        }
    }
}

// OpenAI-compatible API types
#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// Gemini API types
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize, Deserialize, Clone)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Clone)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: LlmProvider, base_url: &str) -> LlmConfig {
        LlmConfig::new(
            provider,
            base_url.to_string(),
            "test-model".to_string(),
            Some("test-key".to_string()),
        )
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("gemini".parse::<LlmProvider>().unwrap(), LlmProvider::GoogleGenerativeAi);
        assert_eq!("Ollama".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAiCompatible);
        assert!("carrier-pigeon".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_new_rejects_bad_base_url() {
        assert!(LlmClient::new(config(LlmProvider::OpenAiCompatible, "ftp://nope")).is_err());
        let client =
            LlmClient::new(config(LlmProvider::OpenAiCompatible, "http://localhost:11434/v1/"))
                .unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_openai_headers_carry_bearer_token() {
        let client =
            LlmClient::new(config(LlmProvider::OpenAiCompatible, "https://api.openai.com/v1"))
                .unwrap();
        let headers = client.build_headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer test-key");
    }

    #[test]
    fn test_gemini_key_travels_in_header() {
        let client = LlmClient::new(config(
            LlmProvider::GoogleGenerativeAi,
            "https://generativelanguage.googleapis.com",
        ))
        .unwrap();
        let headers = client.gemini_headers().unwrap();
        assert_eq!(headers.get(GEMINI_API_KEY_HEADER).unwrap(), "test-key");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_gemini_failure_does_not_expose_key() {
        let mut config = config(LlmProvider::GoogleGenerativeAi, "http://127.0.0.1:9");
        config.api_key = Some("SECRETKEY123".to_string());
        config.max_http_retries = 0;
        let client = LlmClient::new(config).unwrap();

        let err = client.complete("system", "hello").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.to_string().contains("SECRETKEY123"), "{}", err);
        assert!(!format!("{:?}", err).contains("SECRETKEY123"));
    }

    #[test]
    fn test_gemini_response_parses_multi_part_candidates() {
        let raw = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        let candidate = parsed.candidates.into_iter().next().unwrap();
        let text: String = candidate
            .content
            .unwrap()
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();
        assert_eq!(text, "Hello there");
        assert_eq!(parsed.usage_metadata.unwrap().total_token_count, 5);
    }

    #[test]
    fn test_gemini_request_uses_camel_case() {
        let body = GeminiRequest {
            contents: vec![],
            system_instruction: None,
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(10),
                temperature: None,
                response_mime_type: Some("application/json".to_string()),
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 10);
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }
}
