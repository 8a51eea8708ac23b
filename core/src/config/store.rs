//! Configuration Store
//!
//! Loads and saves the TOML config file and applies environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Unified Planwise configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion provider settings
    #[serde(default)]
    pub llm: LlmSettings,

    /// Web search tool settings
    #[serde(default)]
    pub search: SearchSettings,

    /// Financial / commodity lookup settings
    #[serde(default)]
    pub finance: FinanceSettings,

    /// Pipeline behavior
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Which completion API the client speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Google Generative AI (Gemini)
    #[default]
    Gemini,
    /// Any OpenAI-compatible `/chat/completions` endpoint
    #[serde(alias = "openai-compatible", alias = "ollama")]
    OpenAi,
}

impl ProviderType {
    /// Environment variable conventionally holding this provider's key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderType::Gemini => "GOOGLE_GEMINI_API_KEY",
            ProviderType::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderType::Gemini => "https://generativelanguage.googleapis.com",
            ProviderType::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::Gemini => "gemini-1.5-flash",
            ProviderType::OpenAi => "gpt-4o-mini",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: ProviderType,
    /// Overrides the provider's default base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overrides the provider's default model
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Retries of a failed completion call (429, 5xx, network errors)
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    /// First retry delay; later retries double it
    #[serde(default = "default_llm_retry_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Requests per minute allowed against the provider
    #[serde(default = "default_llm_max_rpm")]
    pub max_rpm: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderType::default(),
            base_url: None,
            model: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            retry_base_delay_ms: default_llm_retry_delay_ms(),
            max_rpm: default_llm_max_rpm(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_search_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_search_retries")]
    pub retries: u32,
    /// Minimum spacing between two search requests
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: default_search_results(),
            timeout_secs: default_search_timeout(),
            retries: default_search_retries(),
            min_interval_ms: default_min_interval_ms(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_finance_url")]
    pub base_url: String,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    /// Retries of a transient quote failure
    #[serde(default = "default_finance_retries")]
    pub retries: u32,
}

impl Default for FinanceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_finance_url(),
            timeout_secs: default_search_timeout(),
            retries: default_finance_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Run the validation stage between execution and synthesis
    #[serde(default = "default_true")]
    pub validate: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self { validate: true }
    }
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_llm_retries() -> u32 {
    2
}

fn default_llm_retry_delay_ms() -> u64 {
    2000
}

fn default_llm_max_rpm() -> u32 {
    60
}

fn default_search_results() -> usize {
    5
}

fn default_search_timeout() -> u64 {
    10
}

fn default_search_retries() -> u32 {
    3
}

fn default_finance_retries() -> u32 {
    2
}

fn default_min_interval_ms() -> u64 {
    2000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
}

fn default_finance_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Render as the TOML written by [`Config::save`].
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(key) = config.llm.api_key.as_mut() {
            let chars: Vec<char> = key.chars().collect();
            let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
            *key = format!("****{}", tail);
        }
        config
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from the default location, falling back to defaults when the
    /// file is missing or unreadable. Environment overrides are applied
    /// either way.
    pub fn load_or_default() -> Self {
        let mut config = Self::default_path()
            .filter(|path| path.exists())
            .and_then(|path| match Self::load(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "ignoring unreadable config: {}", e);
                    None
                }
            })
            .unwrap_or_default();
        config.apply_env();
        config
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("planwise").join("config.toml"))
    }

    /// Apply `PLANWISE_*` and provider key environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let provider_env = self.llm.provider.api_key_env();

        if let Some(key) = non_empty("PLANWISE_API_KEY").or_else(|| non_empty(provider_env)) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = non_empty("PLANWISE_MODEL") {
            self.llm.model = Some(model);
        }
    }

    /// Effective model name
    pub fn model(&self) -> &str {
        self.llm
            .model
            .as_deref()
            .unwrap_or_else(|| self.llm.provider.default_model())
    }

    /// Effective base URL
    pub fn base_url(&self) -> &str {
        self.llm
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.llm.provider.default_base_url())
    }
}
