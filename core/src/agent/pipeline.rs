//! The agent: Plan -> Select/Execute -> Validate -> Synthesize

use super::executor::Executor;
use super::planner::Planner;
use super::selector::ToolSelector;
use super::synthesizer::Synthesizer;
use super::tools::ToolRegistry;
use super::types::{ExecutionLedger, Plan, ValidationReport};
use super::validator::Validator;
use crate::config::{config_to_llm_config, config_to_llm_rate_limit, config_to_rate_limit, Config};
use crate::error::{PlanwiseError, Result};
use crate::llm::{CircuitBreaker, CompletionCapability, LlmClient, RetryCompletion, RetryConfig};
use crate::rate_limiter::RateLimiter;
use crate::util::preview;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRun {
    pub query: String,
    pub plan: Plan,
    pub results: ExecutionLedger,
    /// `None` when validation is disabled.
    pub validation: Option<ValidationReport>,
    pub answer: String,
}

/// Tool-augmented query pipeline.
///
/// Built once and reused; each call to [`Agent::run`] owns its own plan and
/// ledger.
pub struct Agent {
    planner: Planner,
    executor: Executor,
    validator: Option<Validator>,
    synthesizer: Synthesizer,
}

impl Agent {
    pub fn new(llm: Arc<dyn CompletionCapability>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            planner: Planner::new(llm.clone()),
            executor: Executor::new(ToolSelector::new(registry)),
            validator: Some(Validator::new(llm.clone())),
            synthesizer: Synthesizer::new(llm),
        }
    }

    /// Skip the validation stage; runs then carry no report.
    pub fn without_validation(mut self) -> Self {
        self.validator = None;
        self
    }

    /// Wire the LLM client and every enabled tool from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm = completion_from_config(config)?;
        let rate_limiter = Arc::new(RateLimiter::new(config_to_rate_limit(config)));
        let registry = Arc::new(ToolRegistry::from_config(config, rate_limiter)?);

        tracing::info!(?registry, validate = config.agent.validate, "agent initialized");
        let agent = Self::new(llm, registry);
        Ok(if config.agent.validate {
            agent
        } else {
            agent.without_validation()
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.executor.selector().registry()
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Answer a query. Never fails: an unexpected panic anywhere in the
    /// pipeline becomes an apology.
    pub async fn run(&self, query: &str) -> String {
        match AssertUnwindSafe(self.run_detailed(query)).catch_unwind().await {
            Ok(run) => run.answer,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unexpected internal error".to_string());
                tracing::error!("agent run panicked: {}", message);
                apology(&message)
            }
        }
    }

    /// Run the full pipeline and keep every intermediate product.
    pub async fn run_detailed(&self, query: &str) -> AgentRun {
        let started = Instant::now();
        tracing::info!(query = %preview(query, 120), "agent run started");

        let plan = self.planner.create_plan(query).await;
        let results = self.executor.execute(&plan).await;

        let validation = match &self.validator {
            Some(validator) => Some(validator.validate(query, &plan, &results).await),
            None => None,
        };

        let answer = self.synthesizer.synthesize(query, &plan, &results).await;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            fallback_plan = plan.is_fallback(),
            "agent run complete"
        );

        AgentRun {
            query: query.to_string(),
            plan,
            results,
            validation,
            answer,
        }
    }

    /// Planning stage only.
    pub async fn plan(&self, query: &str) -> Plan {
        self.planner.create_plan(query).await
    }

    /// Execute a plan built elsewhere.
    pub async fn execute(&self, plan: &Plan) -> ExecutionLedger {
        self.executor.execute(plan).await
    }
}

/// The text returned when a run fails unexpectedly.
pub fn apology(message: &str) -> String {
    format!(
        "I apologize, but I encountered an error while processing your request: {}",
        message
    )
}

/// LLM client per `[llm]`, paced and behind a circuit breaker.
///
/// The client's own backoff loop is the only retry layer; the wrapper does
/// not retry on top of it.
pub fn completion_from_config(config: &Config) -> Result<Arc<dyn CompletionCapability>> {
    let llm_config = config_to_llm_config(config).map_err(|e| PlanwiseError::InvalidConfig {
        message: e.to_string(),
    })?;
    let pacing = Arc::new(RateLimiter::new(config_to_llm_rate_limit(config)));
    let client: Arc<dyn CompletionCapability> =
        Arc::new(LlmClient::new(llm_config)?.with_rate_limiter(pacing));
    Ok(Arc::new(
        RetryCompletion::new(client, RetryConfig::no_retry()).with_breaker(CircuitBreaker::default()),
    ))
}
