//! Synthesizer: turns the ledger into the final answer

use super::selector::stringify_output;
use super::types::{ExecutionLedger, Plan};
use crate::llm::CompletionCapability;
use serde_json::Value;
use std::sync::Arc;

const SYNTHESIZER_SYSTEM_PROMPT: &str = r#"You write the final reply to a user's request from results gathered on their behalf.

Guidelines:
- Answer the original question directly, using the results provided
- Show calculated values clearly
- Summarize the key findings of any searches
- Present text statistics in a readable way
- Be concise but complete, friendly and professional

Do not mention steps, tools or any internal process. Just answer naturally."#;

pub struct Synthesizer {
    llm: Arc<dyn CompletionCapability>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn CompletionCapability>) -> Self {
        Self { llm }
    }

    /// Never returns an empty string.
    pub async fn synthesize(&self, query: &str, plan: &Plan, ledger: &ExecutionLedger) -> String {
        let context = synthesis_context(query, plan, ledger);

        match self.llm.complete(SYNTHESIZER_SYSTEM_PROMPT, &context).await {
            Ok(reply) if !reply.trim().is_empty() => {
                let answer = reply.trim().to_string();
                tracing::info!(chars = answer.chars().count(), "synthesis complete");
                answer
            }
            Ok(_) => {
                tracing::warn!("synthesizer returned an empty reply, using template");
                template_answer(query, plan, ledger)
            }
            Err(e) => {
                tracing::warn!("synthesis failed, using template: {}", e);
                template_answer(query, plan, ledger)
            }
        }
    }
}

fn synthesis_context(query: &str, plan: &Plan, ledger: &ExecutionLedger) -> String {
    let mut parts = vec![
        format!("Original Query: {}\n", query),
        "Execution Results:\n".to_string(),
    ];

    for step in plan {
        let Some(result) = ledger.get(step.step_number) else {
            continue;
        };
        parts.push(format!("\nStep {}: {}", step.step_number, step.description));
        parts.push(format!("Tool Used: {}", step.required_tool));
        if result.success {
            let output = result.output.as_ref().unwrap_or(&Value::Null);
            parts.push(format!(
                "Result: {}",
                serde_json::to_string_pretty(output).unwrap_or_default()
            ));
        } else {
            parts.push(format!("Error: {}", result.error.as_deref().unwrap_or("unknown error")));
        }
    }

    parts.join("\n")
}

/// Deterministic answer built from the successful steps.
pub fn template_answer(query: &str, plan: &Plan, ledger: &ExecutionLedger) -> String {
    let mut parts = vec![format!("Based on your query: {}\n", query)];
    for step in plan {
        if let Some(output) = ledger
            .get(step.step_number)
            .filter(|r| r.success)
            .and_then(|r| r.output.as_ref())
        {
            parts.push(format!("- {}: {}", step.description, stringify_output(output)));
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{ExecutionResult, PlanStep, ToolType};
    use crate::error::{PlanwiseError, Result};
    use async_trait::async_trait;
    use serde_json::json;

    struct Reply(Option<&'static str>);

    #[async_trait]
    impl CompletionCapability for Reply {
        fn name(&self) -> &'static str {
            "reply"
        }

        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            assert!(system.contains("Do not mention steps"));
            assert!(user.starts_with("Original Query:"));
            self.0.map(str::to_string).ok_or(PlanwiseError::ServiceUnavailable)
        }
    }

    fn fixture() -> (Plan, ExecutionLedger) {
        let plan = Plan::new(vec![
            PlanStep::new(1, "Calculate the sum", ToolType::Calculator, "100 + 50"),
            PlanStep::new(2, "Search", ToolType::Search, "x"),
        ]);
        let ledger = vec![
            ExecutionResult::success(1, json!({"expression": "100 + 50", "result": 150, "success": true})),
            ExecutionResult::failure(2, "timeout"),
        ]
        .into_iter()
        .collect();
        (plan, ledger)
    }

    #[tokio::test]
    async fn uses_model_answer() {
        let (plan, ledger) = fixture();
        let answer = Synthesizer::new(Arc::new(Reply(Some("  The total is 150.  "))))
            .synthesize("sum?", &plan, &ledger)
            .await;
        assert_eq!(answer, "The total is 150.");
    }

    #[tokio::test]
    async fn failure_falls_back_to_template() {
        let (plan, ledger) = fixture();
        let answer = Synthesizer::new(Arc::new(Reply(None)))
            .synthesize("sum?", &plan, &ledger)
            .await;
        assert_eq!(answer, "Based on your query: sum?\n\n- Calculate the sum: 150");
    }

    #[tokio::test]
    async fn blank_reply_falls_back_to_template() {
        let (plan, ledger) = fixture();
        let answer = Synthesizer::new(Arc::new(Reply(Some("   \n"))))
            .synthesize("sum?", &plan, &ledger)
            .await;
        assert!(answer.starts_with("Based on your query: sum?"));
        assert!(answer.contains("150"));
    }

    #[test]
    fn template_is_never_empty() {
        let answer = template_answer("q", &Plan::new(vec![]), &ExecutionLedger::new());
        assert_eq!(answer, "Based on your query: q\n");
    }

    #[test]
    fn context_lists_results_and_errors() {
        let (plan, ledger) = fixture();
        let context = synthesis_context("sum?", &plan, &ledger);
        assert!(context.contains("Tool Used: calculator"));
        assert!(context.contains("\"result\": 150"));
        assert!(context.contains("Error: timeout"));
    }
}
