//! Web search tool
//!
//! DuckDuckGo's HTML endpoint: free and keyless, but quick to throttle.
//! Requests are paced through the shared [`RateLimiter`], retried with
//! progressive backoff when the provider answers 202/429, and skipped while
//! the circuit breaker is open.

use super::{Tool, ToolOutput};
use crate::agent::types::ToolType;
use crate::config::SearchSettings;
use crate::error::{PlanwiseError, Result};
use crate::llm::CircuitBreaker;
use crate::rate_limiter::RateLimiter;
use crate::util::{host_of, preview, sanitize_base_url};
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";

lazy_static::lazy_static! {
    static ref BLOCK_RE: Regex = Regex::new(r#"class="result(?: [^"]*)?""#).expect("valid regex");
    static ref TITLE_RE: Regex =
        Regex::new(r#"(?s)<a\b([^>]*class="[^"]*result__a[^"]*"[^>]*)>(.*?)</a>"#).expect("valid regex");
    static ref HREF_RE: Regex = Regex::new(r#"href="([^"]*)""#).expect("valid regex");
    static ref SNIPPET_RE: Regex =
        Regex::new(r#"(?s)class="[^"]*result__snippet[^"]*"[^>]*>(.*?)</(?:a|div|td)>"#)
            .expect("valid regex");
    static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").expect("valid regex");
}

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub link: String,
}

/// Web search tool
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: CircuitBreaker,
}

impl WebSearchTool {
    pub fn from_settings(settings: &SearchSettings, rate_limiter: Arc<RateLimiter>) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| PlanwiseError::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: DUCKDUCKGO_HTML_URL.to_string(),
            max_results: settings.max_results,
            timeout,
            retries: settings.retries,
            backoff: Duration::from_secs(2),
            rate_limiter,
            // 3 failures, 60 second cooldown
            circuit_breaker: CircuitBreaker::new(3, 1, Duration::from_secs(60)),
        })
    }

    /// Point the tool at another DuckDuckGo-compatible HTML endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.endpoint = format!("{}/", sanitize_base_url(endpoint, "search endpoint")?);
        Ok(self)
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn search(&self, query: &str) -> ToolOutput {
        let query = query.trim();
        let failed = |error: String| {
            ToolOutput::failure_with(
                json!({ "query": query, "results": [], "total_results": 0 }),
                error,
            )
        };

        if query.is_empty() {
            return failed("Search query cannot be empty".to_string());
        }

        if !self.circuit_breaker.allow_request() {
            tracing::warn!("search circuit breaker is open, skipping request");
            return failed(
                "Web search is temporarily unavailable due to repeated failures".to_string(),
            );
        }

        tracing::info!(query = %preview(query, 80), "searching");
        match self.fetch_html(query).await {
            Ok(html) => {
                self.circuit_breaker.record_success();
                let hits = parse_duckduckgo_results(&html, self.max_results);
                tracing::info!(results = hits.len(), "search completed");
                ToolOutput::success(json!({
                    "query": query,
                    "total_results": hits.len(),
                    "results": hits,
                }))
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!("search failed: {}", e);
                failed(e.to_string())
            }
        }
    }

    async fn fetch_html(&self, query: &str) -> Result<String> {
        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));
        let host = host_of(&self.endpoint);
        let mut attempt = 0;

        loop {
            self.rate_limiter.acquire(host).await;

            let outcome = self.client.get(&url).send().await;
            let retryable_error = match outcome {
                Ok(response) if response.status() == StatusCode::OK => {
                    return Ok(response.text().await?);
                }
                Ok(response)
                    if matches!(
                        response.status(),
                        StatusCode::ACCEPTED | StatusCode::TOO_MANY_REQUESTS
                    ) =>
                {
                    self.rate_limiter.record_rate_limit_error(host, None);
                    PlanwiseError::RateLimitExceeded {
                        limit_type: format!("search ({})", response.status().as_u16()),
                    }
                }
                Ok(response) => {
                    return Err(PlanwiseError::ProviderError {
                        status: response.status().as_u16(),
                        message: format!(
                            "Search failed with status code: {}",
                            response.status().as_u16()
                        ),
                    })
                }
                Err(e) => {
                    let err = PlanwiseError::from_transport(e, self.timeout);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    err
                }
            };

            if attempt >= self.retries {
                return Err(retryable_error);
            }
            attempt += 1;
            let wait = self.backoff * attempt;
            tracing::warn!(
                attempt,
                wait_ms = wait.as_millis() as u64,
                "search throttled, backing off: {}",
                retryable_error
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn tool_type(&self) -> ToolType {
        ToolType::Search
    }

    fn description(&self) -> &str {
        "Search the web for current information, news and facts"
    }

    async fn execute(&self, input: &str) -> ToolOutput {
        self.search(input).await
    }
}

/// Parse DuckDuckGo HTML results, in page order.
pub fn parse_duckduckgo_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let starts: Vec<usize> = BLOCK_RE.find_iter(html).map(|m| m.start()).collect();
    let mut hits = Vec::new();

    for (i, start) in starts.iter().enumerate() {
        if hits.len() >= max_results {
            break;
        }
        let end = starts.get(i + 1).copied().unwrap_or(html.len());
        let block = &html[*start..end];

        let Some(title_caps) = TITLE_RE.captures(block) else {
            continue;
        };
        let title = clean_text(&title_caps[2]);
        let link = HREF_RE
            .captures(&title_caps[1])
            .map(|c| resolve_link(&c[1]))
            .unwrap_or_default();
        let snippet = SNIPPET_RE
            .captures(block)
            .map(|c| clean_text(&c[1]))
            .unwrap_or_default();

        hits.push(SearchHit {
            title: if title.is_empty() { "No title".to_string() } else { title },
            snippet: if snippet.is_empty() {
                "No description".to_string()
            } else {
                snippet
            },
            link,
        });
    }

    hits
}

/// Strip markup (`<b>` highlights) and decode entities.
fn clean_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, "");
    let decoded = html_escape::decode_html_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<encoded>&rut=...`.
fn resolve_link(href: &str) -> String {
    let href = html_escape::decode_html_entities(href);
    if let Some(pos) = href.find("uddg=") {
        let encoded = &href[pos + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    href.into_owned()
}
