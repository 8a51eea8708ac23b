//! Validator: plausibility review of the ledger
//!
//! The report is informational. A failed or unparseable review degrades to
//! [`ValidationReport::heuristic`]; validation never blocks synthesis.

use super::parser::extract_json;
use super::types::{ExecutionLedger, Plan, Recommendation, ValidationReport};
use crate::llm::CompletionCapability;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const VALIDATOR_SYSTEM_PROMPT: &str = r#"You review the results an assistant's tools produced for a user's request. Check:
1. Reasonableness: are the values plausible (for example, is a quoted price realistic)?
2. Consistency: do results from different steps agree?
3. Completeness: did the steps needed to answer the request succeed?
4. Data quality: are there obvious errors or suspicious values?
5. Relevance: do the results address the request?

Answer with one JSON object:
{
  "valid": true or false,
  "confidence_score": 0-100,
  "warnings": ["concerns, if any"],
  "errors": ["critical problems, if any"],
  "recommendation": "ACCEPT" | "REJECT" | "RETRY_WITH_CAUTION",
  "reasoning": "short explanation"
}"#;

pub struct Validator {
    llm: Arc<dyn CompletionCapability>,
}

impl Validator {
    pub fn new(llm: Arc<dyn CompletionCapability>) -> Self {
        Self { llm }
    }

    pub async fn validate(&self, query: &str, plan: &Plan, ledger: &ExecutionLedger) -> ValidationReport {
        let context = validation_context(query, plan, ledger);

        let report = match self.llm.complete_json(VALIDATOR_SYSTEM_PROMPT, &context).await {
            Ok(reply) => match parse_report(&reply) {
                Some(report) => report,
                None => {
                    tracing::warn!("validator reply unusable, using heuristic");
                    ValidationReport::heuristic(ledger)
                }
            },
            Err(e) => {
                tracing::warn!("validation call failed, using heuristic: {}", e);
                ValidationReport::heuristic(ledger)
            }
        };

        tracing::info!(
            valid = report.valid,
            confidence = report.confidence_score,
            recommendation = %report.recommendation,
            heuristic = report.heuristic,
            "validation complete"
        );
        if !report.warnings.is_empty() {
            tracing::warn!(warnings = ?report.warnings, "validation warnings");
        }
        if !report.errors.is_empty() {
            tracing::error!(errors = ?report.errors, "validation errors");
        }
        report
    }
}

fn validation_context(query: &str, plan: &Plan, ledger: &ExecutionLedger) -> String {
    let mut parts = vec![format!("User Query: {}\n", query), "Results to Validate:\n".to_string()];

    for step in plan {
        let Some(result) = ledger.get(step.step_number) else {
            continue;
        };
        parts.push(format!("\nStep {}: {}", step.step_number, step.description));
        parts.push(format!("Tool: {}", step.required_tool));
        if result.success {
            let output = result.output.as_ref().unwrap_or(&Value::Null);
            parts.push(format!(
                "Output: {}",
                serde_json::to_string_pretty(output).unwrap_or_default()
            ));
        } else {
            parts.push(format!("Error: {}", result.error.as_deref().unwrap_or("unknown error")));
        }
    }

    parts.join("\n")
}

#[derive(Deserialize)]
struct WireReport {
    valid: bool,
    confidence_score: Value,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    errors: Vec<String>,
    recommendation: String,
    #[serde(default)]
    reasoning: String,
}

/// Parse the model's report. Confidence is clamped to 0..=100; an unknown
/// recommendation makes the whole reply unusable.
fn parse_report(reply: &str) -> Option<ValidationReport> {
    let wire: WireReport = extract_json(reply)?;

    let confidence = match &wire.confidence_score {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    if confidence.is_nan() {
        return None;
    }

    let recommendation = match wire.recommendation.trim().to_ascii_uppercase().replace(' ', "_").as_str() {
        "ACCEPT" => Recommendation::Accept,
        "REJECT" => Recommendation::Reject,
        "RETRY_WITH_CAUTION" => Recommendation::RetryWithCaution,
        other => {
            tracing::warn!(recommendation = other, "unknown recommendation");
            return None;
        }
    };

    Some(ValidationReport {
        valid: wire.valid,
        confidence_score: confidence.clamp(0.0, 100.0).round() as u8,
        warnings: wire.warnings,
        errors: wire.errors,
        recommendation,
        reasoning: wire.reasoning,
        heuristic: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{ExecutionResult, PlanStep, ToolType};
    use crate::error::{PlanwiseError, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Scripted {
        reply: Option<String>,
        seen: Mutex<Option<String>>,
    }

    impl Scripted {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                seen: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl CompletionCapability for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            *self.seen.lock() = Some(user.to_string());
            self.reply.clone().ok_or(PlanwiseError::ServiceUnavailable)
        }
    }

    fn fixture() -> (Plan, ExecutionLedger) {
        let plan = Plan::new(vec![
            PlanStep::new(1, "Price of gold", ToolType::CommodityPrice, "gold"),
            PlanStep::new(2, "Search news", ToolType::Search, "gold news"),
        ]);
        let ledger = vec![
            ExecutionResult::success(1, json!({"current_price": 2400.5, "success": true})),
            ExecutionResult::failure(2, "dependency 9 failed or not completed"),
        ]
        .into_iter()
        .collect();
        (plan, ledger)
    }

    #[tokio::test]
    async fn parses_model_report_and_clamps_confidence() {
        let llm = Scripted::replying(
            "```json\n{\"valid\": true, \"confidence_score\": 140, \"warnings\": [], \"errors\": [], \"recommendation\": \"accept\", \"reasoning\": \"fine\"}\n```",
        );
        let (plan, ledger) = fixture();
        let report = Validator::new(llm.clone()).validate("gold?", &plan, &ledger).await;

        assert_eq!(report.confidence_score, 100);
        assert_eq!(report.recommendation, Recommendation::Accept);
        assert!(!report.heuristic);

        let context = llm.seen.lock().clone().unwrap();
        assert!(context.starts_with("User Query: gold?"));
        assert!(context.contains("Step 1: Price of gold"));
        assert!(context.contains("Tool: commodity_price"));
        assert!(context.contains("\"current_price\": 2400.5"));
        assert!(context.contains("Error: dependency 9 failed or not completed"));
    }

    #[tokio::test]
    async fn unknown_recommendation_uses_heuristic() {
        let llm = Scripted::replying(
            r#"{"valid": true, "confidence_score": 90, "recommendation": "MAYBE"}"#,
        );
        let (plan, ledger) = fixture();
        let report = Validator::new(llm).validate("gold?", &plan, &ledger).await;
        assert!(report.heuristic);
        assert_eq!(report.confidence_score, 50);
        assert_eq!(report.recommendation, Recommendation::RetryWithCaution);
    }

    #[tokio::test]
    async fn call_failure_uses_heuristic() {
        let (plan, ledger) = fixture();
        let report = Validator::new(Scripted::failing()).validate("gold?", &plan, &ledger).await;
        assert!(report.heuristic);
        assert!(!report.valid);
        assert_eq!(report.reasoning, "Basic validation: 1/2 steps succeeded");
    }

    #[test]
    fn confidence_as_string_and_negative() {
        let report = parse_report(
            r#"{"valid": false, "confidence_score": "-5%", "recommendation": "Retry with caution"}"#,
        )
        .unwrap();
        assert_eq!(report.confidence_score, 0);
        assert_eq!(report.recommendation, Recommendation::RetryWithCaution);
        assert!(parse_report(r#"{"valid": true, "recommendation": "ACCEPT"}"#).is_none());
    }
}
