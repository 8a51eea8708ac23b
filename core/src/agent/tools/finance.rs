//! Financial data and commodity price tools
//!
//! Both tools sit on a [`QuoteSource`]. Production uses Yahoo Finance's
//! chart endpoint; tests plug in fixed quotes.

use super::{Tool, ToolOutput};
use crate::agent::types::ToolType;
use crate::config::FinanceSettings;
use crate::error::{PlanwiseError, Result};
use crate::util::sanitize_base_url;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Commodity names understood by [`CommodityPriceTool`] and their futures tickers.
pub const COMMODITY_SYMBOLS: &[(&str, &str)] = &[
    ("silver", "SI=F"),
    ("gold", "GC=F"),
    ("oil", "CL=F"),
    ("crude oil", "CL=F"),
    ("copper", "HG=F"),
    ("platinum", "PL=F"),
    ("palladium", "PA=F"),
    ("natural gas", "NG=F"),
    ("wheat", "ZW=F"),
    ("corn", "ZC=F"),
    ("soybeans", "ZS=F"),
];

/// Latest market data for one symbol as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub previous_close: Option<f64>,
    pub currency: Option<String>,
    pub market_state: Option<String>,
}

/// Anything that can quote a ticker symbol.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote>;
}

/// Stock, ETF, crypto and futures prices by ticker.
///
/// Transient provider failures are retried with progressive backoff.
#[derive(Clone)]
pub struct FinancialDataTool {
    source: Arc<dyn QuoteSource>,
    retries: u32,
    backoff: Duration,
}

impl FinancialDataTool {
    pub fn new(source: Arc<dyn QuoteSource>) -> Self {
        Self {
            source,
            retries: 2,
            backoff: Duration::from_secs(1),
        }
    }

    /// Retry budget for retryable provider errors; the n-th retry waits `n * backoff`.
    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub async fn lookup(&self, input: &str) -> ToolOutput {
        let symbol = input.trim().to_uppercase();
        if symbol.is_empty() {
            return ToolOutput::failure_with(json!({ "symbol": symbol }), "No ticker symbol provided");
        }

        match self.quote_with_retry(&symbol).await {
            Ok(quote) => {
                let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                quote_output(&symbol, &quote, &timestamp)
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, "quote lookup failed: {}", e);
                ToolOutput::failure_with(json!({ "symbol": symbol }), e.to_string())
            }
        }
    }

    async fn quote_with_retry(&self, symbol: &str) -> Result<Quote> {
        let mut attempt = 0;
        loop {
            match self.source.quote(symbol).await {
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    let wait = self.backoff * attempt;
                    tracing::warn!(
                        symbol,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "quote lookup failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(wait).await;
                }
                outcome => return outcome,
            }
        }
    }
}

#[async_trait]
impl Tool for FinancialDataTool {
    fn tool_type(&self) -> ToolType {
        ToolType::FinancialData
    }

    fn description(&self) -> &str {
        "Current price for a ticker symbol such as AAPL, BTC-USD or SI=F"
    }

    async fn execute(&self, input: &str) -> ToolOutput {
        self.lookup(input).await
    }
}

/// Map a provider quote onto the tool's output object.
fn quote_output(symbol: &str, quote: &Quote, timestamp: &str) -> ToolOutput {
    let price = match quote.price {
        Some(p) if p.is_finite() && p != 0.0 => p,
        _ => {
            return ToolOutput::failure_with(
                json!({ "symbol": symbol }),
                format!("Could not fetch price for {}", symbol),
            )
        }
    };

    let change_percent = match quote.previous_close {
        Some(prev) if prev != 0.0 && prev.is_finite() => ((price - prev) / prev) * 100.0,
        _ => 0.0,
    };

    ToolOutput::success(json!({
        "symbol": symbol,
        "name": quote.name.as_deref().unwrap_or(symbol),
        "current_price": price,
        "currency": quote.currency.as_deref().unwrap_or("USD"),
        "change_percent": (change_percent * 100.0).round() / 100.0,
        "market_state": quote.market_state.as_deref().unwrap_or("unknown"),
        "timestamp": timestamp,
    }))
}

/// Commodity prices by common name (`gold`, `crude oil`, ...).
pub struct CommodityPriceTool {
    financial: FinancialDataTool,
}

impl CommodityPriceTool {
    pub fn new(financial: FinancialDataTool) -> Self {
        Self { financial }
    }

    /// Ticker for a commodity name, case-insensitive.
    pub fn symbol_for(commodity: &str) -> Option<&'static str> {
        let key = commodity.trim().to_lowercase();
        COMMODITY_SYMBOLS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, symbol)| *symbol)
    }
}

#[async_trait]
impl Tool for CommodityPriceTool {
    fn tool_type(&self) -> ToolType {
        ToolType::CommodityPrice
    }

    fn description(&self) -> &str {
        "Current price for a commodity by name (gold, silver, oil, copper, ...)"
    }

    async fn execute(&self, input: &str) -> ToolOutput {
        let commodity = input.trim();
        let Some(symbol) = Self::symbol_for(commodity) else {
            let available: Vec<&str> = COMMODITY_SYMBOLS.iter().map(|(name, _)| *name).collect();
            return ToolOutput::failure_with(
                json!({ "commodity": commodity }),
                format!("Unknown commodity. Available: {}", available.join(", ")),
            );
        };

        let mut output = self.financial.lookup(symbol).await;
        if output.is_success() {
            output.insert("commodity", json!(commodity));
        }
        output
    }
}

/// Yahoo Finance `v8/finance/chart` client.
pub struct YahooQuoteSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl YahooQuoteSource {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let base_url = sanitize_base_url(base_url, "finance.base_url")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| PlanwiseError::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn from_settings(settings: &FinanceSettings, user_agent: &str) -> Result<Self> {
        Self::new(
            &settings.base_url,
            Duration::from_secs(settings.timeout_secs),
            user_agent,
        )
    }
}

#[async_trait]
impl QuoteSource for YahooQuoteSource {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&range=1d",
            self.base_url,
            urlencoding::encode(symbol)
        );
        tracing::debug!(%url, "fetching quote");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PlanwiseError::from_transport(e, self.timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PlanwiseError::from_transport(e, self.timeout))?;

        let parsed: ChartResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(PlanwiseError::ProviderError {
                    status: status.as_u16(),
                    message: format!("quote request for {} failed", symbol),
                })
            }
            Err(e) => return Err(e.into()),
        };

        parse_chart(symbol, parsed, chrono::Utc::now().timestamp())
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    long_name: Option<String>,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    previous_close: Option<f64>,
    #[serde(default)]
    chart_previous_close: Option<f64>,
    #[serde(default)]
    market_state: Option<String>,
    #[serde(default)]
    current_trading_period: Option<TradingPeriods>,
}

#[derive(Debug, Deserialize)]
struct TradingPeriods {
    pre: Option<TradingPeriod>,
    regular: Option<TradingPeriod>,
    post: Option<TradingPeriod>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct TradingPeriod {
    start: i64,
    end: i64,
}

impl TradingPeriod {
    fn contains(&self, t: i64) -> bool {
        self.start <= t && t < self.end
    }
}

fn parse_chart(symbol: &str, response: ChartResponse, now: i64) -> Result<Quote> {
    if let Some(err) = response.chart.error {
        return Err(PlanwiseError::ProviderError {
            status: 404,
            message: format!("{}: {}", err.code, err.description),
        });
    }

    let meta = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .map(|r| r.meta)
        .ok_or_else(|| PlanwiseError::InvalidResponse {
            reason: format!("no chart data for {}", symbol),
        })?;

    let market_state = meta
        .market_state
        .clone()
        .or_else(|| meta.current_trading_period.as_ref().map(|p| market_state_at(p, now)));

    Ok(Quote {
        symbol: symbol.to_string(),
        name: meta.long_name.or(meta.short_name),
        price: meta.regular_market_price,
        previous_close: meta.previous_close.or(meta.chart_previous_close),
        currency: meta.currency,
        market_state,
    })
}

fn market_state_at(periods: &TradingPeriods, now: i64) -> String {
    let state = if periods.regular.is_some_and(|p| p.contains(now)) {
        "REGULAR"
    } else if periods.pre.is_some_and(|p| p.contains(now)) {
        "PRE"
    } else if periods.post.is_some_and(|p| p.contains(now)) {
        "POST"
    } else {
        "CLOSED"
    };
    state.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FixedQuotes {
        quote: Option<Quote>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QuoteSource for FixedQuotes {
        async fn quote(&self, symbol: &str) -> Result<Quote> {
            self.requested.lock().push(symbol.to_string());
            self.quote.clone().ok_or(PlanwiseError::ProviderError {
                status: 404,
                message: "unknown symbol".to_string(),
            })
        }
    }

    /// Fails with `error` for the first `failures` calls, then quotes silver.
    struct Flaky {
        failures: usize,
        error: fn() -> PlanwiseError,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl QuoteSource for Flaky {
        async fn quote(&self, _symbol: &str) -> Result<Quote> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls <= self.failures {
                Err((self.error)())
            } else {
                Ok(silver())
            }
        }
    }

    fn flaky(failures: usize, error: fn() -> PlanwiseError) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            error,
            calls: Mutex::new(0),
        })
    }

    fn silver() -> Quote {
        Quote {
            symbol: "SI=F".to_string(),
            name: Some("Silver Dec 24".to_string()),
            price: Some(31.5),
            previous_close: Some(30.0),
            currency: Some("USD".to_string()),
            market_state: Some("REGULAR".to_string()),
        }
    }

    #[test]
    fn quote_output_computes_change() {
        let out = quote_output("SI=F", &silver(), "2024-01-01 00:00:00");
        assert!(out.is_success());
        assert_eq!(out.get("change_percent"), Some(&json!(5.0)));
        assert_eq!(out.get("current_price"), Some(&json!(31.5)));
        assert_eq!(out.get("market_state"), Some(&json!("REGULAR")));
    }

    #[test]
    fn quote_output_without_previous_close() {
        let quote = Quote {
            previous_close: None,
            name: None,
            currency: None,
            market_state: None,
            ..silver()
        };
        let out = quote_output("SI=F", &quote, "t");
        assert_eq!(out.get("change_percent"), Some(&json!(0.0)));
        assert_eq!(out.get("name"), Some(&json!("SI=F")));
        assert_eq!(out.get("currency"), Some(&json!("USD")));
        assert_eq!(out.get("market_state"), Some(&json!("unknown")));
    }

    #[test]
    fn missing_price_is_failure() {
        let quote = Quote {
            price: None,
            ..silver()
        };
        let out = quote_output("SI=F", &quote, "t");
        assert!(!out.is_success());
        assert_eq!(out.error(), Some("Could not fetch price for SI=F"));
    }

    #[tokio::test]
    async fn financial_tool_normalizes_symbol_and_reports_provider_errors() {
        let source = Arc::new(FixedQuotes::default());
        let tool = FinancialDataTool::new(source.clone());
        let out = tool.execute("  aapl ").await;
        assert!(!out.is_success());
        assert_eq!(out.get("symbol"), Some(&json!("AAPL")));
        assert_eq!(source.requested.lock().as_slice(), ["AAPL".to_string()]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let source = flaky(2, || PlanwiseError::ProviderError {
            status: 503,
            message: "busy".to_string(),
        });
        let tool = FinancialDataTool::new(source.clone()).with_retries(2, Duration::from_millis(1));
        let out = tool.execute("SI=F").await;
        assert!(out.is_success(), "{:?}", out);
        assert_eq!(*source.calls.lock(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let source = flaky(10, || PlanwiseError::Timeout {
            duration: Some(Duration::from_secs(10)),
        });
        let tool = FinancialDataTool::new(source.clone()).with_retries(2, Duration::from_millis(1));
        let out = tool.execute("SI=F").await;
        assert!(!out.is_success());
        assert_eq!(out.error(), Some("operation timed out after 10s"));
        assert_eq!(*source.calls.lock(), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let source = flaky(10, || PlanwiseError::InvalidResponse {
            reason: "no chart data".to_string(),
        });
        let tool = FinancialDataTool::new(source.clone()).with_retries(2, Duration::from_millis(1));
        assert!(!tool.execute("SI=F").await.is_success());
        assert_eq!(*source.calls.lock(), 1);
    }

    #[tokio::test]
    async fn commodity_maps_name_and_tags_result() {
        let source = Arc::new(FixedQuotes {
            quote: Some(silver()),
            ..Default::default()
        });
        let tool = CommodityPriceTool::new(FinancialDataTool::new(source.clone()));

        let out = tool.execute(" Silver ").await;
        assert!(out.is_success());
        assert_eq!(out.get("commodity"), Some(&json!("Silver")));
        assert_eq!(out.get("symbol"), Some(&json!("SI=F")));

        let out = tool.execute("crude oil").await;
        assert!(out.is_success());
        assert_eq!(source.requested.lock().last().map(String::as_str), Some("CL=F"));
    }

    #[tokio::test]
    async fn unknown_commodity_lists_options() {
        let tool = CommodityPriceTool::new(FinancialDataTool::new(Arc::new(FixedQuotes::default())));
        let out = tool.execute("unobtainium").await;
        assert!(!out.is_success());
        let error = out.error().unwrap();
        assert!(error.starts_with("Unknown commodity. Available: silver, gold"));
        assert!(error.contains("soybeans"));
    }

    #[test]
    fn parses_chart_payload() {
        let raw = r#"{"chart":{"result":[{"meta":{
            "currency":"USD","symbol":"AAPL","longName":"Apple Inc.",
            "regularMarketPrice":190.0,"chartPreviousClose":200.0,
            "currentTradingPeriod":{
                "pre":{"start":100,"end":200},
                "regular":{"start":200,"end":300},
                "post":{"start":300,"end":400}}
        }}],"error":null}}"#;
        let parsed: ChartResponse = serde_json::from_str(raw).unwrap();
        let quote = parse_chart("AAPL", parsed, 250).unwrap();
        assert_eq!(quote.name.as_deref(), Some("Apple Inc."));
        assert_eq!(quote.price, Some(190.0));
        assert_eq!(quote.previous_close, Some(200.0));
        assert_eq!(quote.market_state.as_deref(), Some("REGULAR"));

        let out = quote_output("AAPL", &quote, "t");
        assert_eq!(out.get("change_percent"), Some(&json!(-5.0)));
    }

    #[test]
    fn chart_error_is_provider_error() {
        let raw = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let parsed: ChartResponse = serde_json::from_str(raw).unwrap();
        let err = parse_chart("NOPE", parsed, 0).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }
}
