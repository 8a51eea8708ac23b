//! Tools and the tool registry
//!
//! Tools are the pipeline's only contact with the world. Each one maps an
//! input string to a JSON object that always carries a boolean `success`;
//! failures are reported inside that object and never as `Err`.

pub mod calculator;
pub mod finance;
pub mod text_analyzer;
pub mod web_search;

pub use calculator::CalculatorTool;
pub use finance::{CommodityPriceTool, FinancialDataTool, Quote, QuoteSource, YahooQuoteSource};
pub use text_analyzer::TextAnalyzerTool;
pub use web_search::{SearchHit, WebSearchTool};

use crate::agent::types::ToolType;
use crate::config::Config;
use crate::rate_limiter::RateLimiter;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Structured tool result: a JSON object with a boolean `success` field.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput(Value);

impl ToolOutput {
    /// Successful output. `fields` should be an object; anything else is
    /// wrapped as `{"value": fields}`.
    pub fn success(fields: Value) -> Self {
        Self(with_success(fields, true))
    }

    /// Failed output carrying only the error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self::failure_with(json!({}), error)
    }

    /// Failed output that keeps tool-specific context fields (query, symbol, ...).
    pub fn failure_with(fields: Value, error: impl Into<String>) -> Self {
        let mut value = with_success(fields, false);
        if let Value::Object(map) = &mut value {
            map.insert("error".to_string(), Value::String(error.into()));
        }
        Self(value)
    }

    pub fn is_success(&self) -> bool {
        self.0.get("success").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn error(&self) -> Option<&str> {
        self.0.get("error").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Add or replace a field.
    pub fn insert(&mut self, key: &str, value: Value) {
        if let Value::Object(map) = &mut self.0 {
            map.insert(key.to_string(), value);
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

fn with_success(fields: Value, success: bool) -> Value {
    let mut map = match fields {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    map.insert("success".to_string(), Value::Bool(success));
    Value::Object(map)
}

/// A callable capability keyed by its [`ToolType`].
///
/// Implementations must not panic on bad input; the executor catches panics
/// anyway, but a panicking tool loses its structured error.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The kind this tool serves.
    fn tool_type(&self) -> ToolType;

    /// A brief description of what the tool does
    fn description(&self) -> &str;

    /// Human-readable name; defaults to the lowercase tool type.
    fn name(&self) -> &str {
        self.tool_type().as_str()
    }

    async fn execute(&self, input: &str) -> ToolOutput;
}

/// Read-only set of tools, at most one per [`ToolType`].
///
/// Built once at startup and shared by `Arc`; nothing mutates it afterwards.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    search: Option<Arc<dyn Tool>>,
    calculator: Option<Arc<dyn Tool>>,
    text_analyzer: Option<Arc<dyn Tool>>,
    financial_data: Option<Arc<dyn Tool>>,
    commodity_price: Option<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// The in-process tools only (calculator and text analyzer).
    pub fn local() -> Self {
        Self::builder()
            .with(Arc::new(CalculatorTool::new()))
            .with(Arc::new(TextAnalyzerTool::new()))
            .build()
    }

    /// Every tool enabled in `config`, with network tools wired to real providers.
    pub fn from_config(config: &Config, rate_limiter: Arc<RateLimiter>) -> crate::error::Result<Self> {
        let mut builder = Self::builder()
            .with(Arc::new(CalculatorTool::new()))
            .with(Arc::new(TextAnalyzerTool::new()));

        if config.search.enabled {
            builder = builder.with(Arc::new(WebSearchTool::from_settings(
                &config.search,
                rate_limiter,
            )?));
        } else {
            tracing::info!("web search disabled by configuration");
        }

        if config.finance.enabled {
            let source: Arc<dyn QuoteSource> = Arc::new(YahooQuoteSource::from_settings(
                &config.finance,
                &config.search.user_agent,
            )?);
            let financial = FinancialDataTool::new(source)
                .with_retries(config.finance.retries, Duration::from_secs(1));
            builder = builder
                .with(Arc::new(CommodityPriceTool::new(financial.clone())))
                .with(Arc::new(financial));
        } else {
            tracing::info!("financial lookups disabled by configuration");
        }

        Ok(builder.build())
    }

    /// Look up the tool for a kind. `NONE` never has one.
    pub fn get(&self, tool_type: ToolType) -> Option<Arc<dyn Tool>> {
        let slot = match tool_type {
            ToolType::Search => &self.search,
            ToolType::Calculator => &self.calculator,
            ToolType::TextAnalyzer => &self.text_analyzer,
            ToolType::FinancialData => &self.financial_data,
            ToolType::CommodityPrice => &self.commodity_price,
            ToolType::None => return None,
        };
        slot.clone()
    }

    pub fn contains(&self, tool_type: ToolType) -> bool {
        self.get(tool_type).is_some()
    }

    /// Registered tools in [`ToolType::CALLABLE`] order.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        ToolType::CALLABLE
            .iter()
            .filter_map(|t| self.get(*t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<&str> = ToolType::CALLABLE
            .iter()
            .filter(|t| self.contains(**t))
            .map(|t| t.as_str())
            .collect();
        f.debug_struct("ToolRegistry")
            .field("registered", &registered)
            .finish()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    /// Register a tool under its own [`Tool::tool_type`], replacing any
    /// earlier registration for that kind.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        let slot = match tool.tool_type() {
            ToolType::Search => &mut self.registry.search,
            ToolType::Calculator => &mut self.registry.calculator,
            ToolType::TextAnalyzer => &mut self.registry.text_analyzer,
            ToolType::FinancialData => &mut self.registry.financial_data,
            ToolType::CommodityPrice => &mut self.registry.commodity_price,
            ToolType::None => {
                tracing::warn!(tool = tool.name(), "ignoring tool registered as NONE");
                return self;
            }
        };
        if slot.is_some() {
            tracing::debug!(tool = tool.name(), "replacing registered tool");
        }
        *slot = Some(tool);
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(ToolType);

    #[async_trait]
    impl Tool for Echo {
        fn tool_type(&self) -> ToolType {
            self.0
        }

        fn description(&self) -> &str {
            "echoes its input"
        }

        async fn execute(&self, input: &str) -> ToolOutput {
            ToolOutput::success(json!({ "echo": input }))
        }
    }

    #[test]
    fn output_always_has_success() {
        let ok = ToolOutput::success(json!({"result": 3}));
        assert!(ok.is_success());
        assert_eq!(ok.get("result"), Some(&json!(3)));

        let wrapped = ToolOutput::success(json!(42));
        assert_eq!(wrapped.as_value(), &json!({"value": 42, "success": true}));

        let failed = ToolOutput::failure_with(json!({"symbol": "XYZ"}), "no price");
        assert!(!failed.is_success());
        assert_eq!(failed.error(), Some("no price"));
        assert_eq!(failed.get("symbol"), Some(&json!("XYZ")));
    }

    #[test]
    fn local_registry_has_local_tools_only() {
        let registry = ToolRegistry::local();
        assert!(registry.contains(ToolType::Calculator));
        assert!(registry.contains(ToolType::TextAnalyzer));
        assert!(!registry.contains(ToolType::Search));
        assert!(registry.get(ToolType::None).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn builder_places_tools_by_type() {
        let registry = ToolRegistry::builder()
            .with(Arc::new(Echo(ToolType::Search)))
            .with(Arc::new(Echo(ToolType::None)))
            .build();

        assert_eq!(registry.len(), 1);
        let tool = registry.get(ToolType::Search).unwrap();
        let out = tool.execute("rust").await;
        assert_eq!(out.get("echo"), Some(&json!("rust")));
        assert_eq!(tool.name(), "search");
    }
}
