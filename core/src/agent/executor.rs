//! Executor: walks a plan and fills the ledger
//!
//! Steps run one at a time, in plan order. A step whose dependencies did
//! not all succeed is recorded as failed and skipped; a panic inside a step
//! is caught at the step boundary. `execute` itself always returns.

use super::selector::{pass_through_output, ToolSelector};
use super::types::{ExecutionLedger, ExecutionResult, Plan, PlanStep};
use crate::util::preview;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

pub struct Executor {
    selector: ToolSelector,
}

impl Executor {
    pub fn new(selector: ToolSelector) -> Self {
        Self { selector }
    }

    pub fn selector(&self) -> &ToolSelector {
        &self.selector
    }

    /// Run every step of `plan`, producing exactly one result per step number.
    pub async fn execute(&self, plan: &Plan) -> ExecutionLedger {
        tracing::info!(steps = plan.len(), "executing plan");
        let mut ledger = ExecutionLedger::new();

        for step in plan {
            let result = match step
                .dependencies
                .iter()
                .find(|dep| !ledger.succeeded(**dep))
            {
                Some(dep) => {
                    tracing::warn!(step = step.step_number, dependency = dep, "dependency not satisfied");
                    ExecutionResult::failure(
                        step.step_number,
                        format!("dependency {} failed or not completed", dep),
                    )
                }
                None => {
                    match AssertUnwindSafe(self.run_step(step, &ledger))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            tracing::error!(step = step.step_number, "step panicked: {}", message);
                            ExecutionResult::failure(step.step_number, message)
                        }
                    }
                }
            };

            if ledger.record(result).is_some() {
                tracing::warn!(step = step.step_number, "duplicate step number, earlier result replaced");
            }
        }

        tracing::info!(
            successful = ledger.successful(),
            total = ledger.len(),
            "execution complete"
        );
        ledger
    }

    async fn run_step(&self, step: &PlanStep, ledger: &ExecutionLedger) -> ExecutionResult {
        tracing::info!(step = step.step_number, tool = %step.required_tool, "  {}", step.description);

        let tool = self.selector.select_tool(step);
        let input = self.selector.prepare_input(step, ledger);

        let Some(tool) = tool else {
            return ExecutionResult::success(step.step_number, pass_through_output(&input));
        };

        let output = tool.execute(&input).await;
        if output.is_success() {
            tracing::debug!(
                step = step.step_number,
                output = %preview(&output.as_value().to_string(), 200),
                "step completed"
            );
        } else {
            // The step still counts as executed; the tool's failure travels in its output.
            tracing::warn!(
                step = step.step_number,
                tool = tool.name(),
                "tool reported failure: {}",
                output.error().unwrap_or("unknown error")
            );
        }
        ExecutionResult::success(step.step_number, output.into_value())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{Tool, ToolOutput, ToolRegistry};
    use crate::agent::types::ToolType;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Exploding;

    #[async_trait]
    impl Tool for Exploding {
        fn tool_type(&self) -> ToolType {
            ToolType::Search
        }

        fn description(&self) -> &str {
            "panics"
        }

        async fn execute(&self, _input: &str) -> ToolOutput {
            panic!("provider exploded")
        }
    }

    fn executor() -> Executor {
        let registry = ToolRegistry::builder()
            .with(Arc::new(crate::agent::tools::CalculatorTool::new()))
            .with(Arc::new(crate::agent::tools::TextAnalyzerTool::new()))
            .with(Arc::new(Exploding))
            .build();
        Executor::new(ToolSelector::new(Arc::new(registry)))
    }

    #[tokio::test]
    async fn one_result_per_step() {
        let plan = Plan::new(vec![
            PlanStep::new(1, "calc", ToolType::Calculator, "25 * 4"),
            PlanStep::new(2, "greet", ToolType::None, "hi"),
            PlanStep::new(3, "count", ToolType::TextAnalyzer, "step 1").depends_on([1]),
        ]);
        let ledger = executor().execute(&plan).await;

        assert_eq!(ledger.len(), 3);
        assert!(ledger.all_succeeded());
        assert_eq!(ledger.get(1).unwrap().output.as_ref().unwrap()["result"], json!(100));
        assert_eq!(
            ledger.get(2).unwrap().output,
            Some(json!({"message": "No tool execution needed", "input": "hi"}))
        );
        assert_eq!(ledger.get(3).unwrap().output.as_ref().unwrap()["word_count"], json!(1));
    }

    #[tokio::test]
    async fn dependency_failures_cascade() {
        let plan = Plan::new(vec![
            PlanStep::new(1, "boom", ToolType::Search, "x"),
            PlanStep::new(2, "needs 1", ToolType::None, "step 1").depends_on([1]),
            PlanStep::new(3, "needs 2", ToolType::None, "step 2").depends_on([2]),
            PlanStep::new(4, "independent", ToolType::Calculator, "1 + 1"),
        ]);
        let ledger = executor().execute(&plan).await;

        assert_eq!(ledger.len(), 4);
        let first = ledger.get(1).unwrap();
        assert!(!first.success);
        assert_eq!(first.error.as_deref(), Some("provider exploded"));
        assert_eq!(
            ledger.get(2).unwrap().error.as_deref(),
            Some("dependency 1 failed or not completed")
        );
        assert_eq!(
            ledger.get(3).unwrap().error.as_deref(),
            Some("dependency 2 failed or not completed")
        );
        assert!(ledger.succeeded(4));
    }

    #[tokio::test]
    async fn missing_and_forward_dependencies_fail() {
        let plan = Plan::new(vec![
            PlanStep::new(1, "forward", ToolType::None, "x").depends_on([2]),
            PlanStep::new(2, "ok", ToolType::None, "y"),
            PlanStep::new(3, "ghost", ToolType::None, "z").depends_on([2, 9]),
        ]);
        let ledger = executor().execute(&plan).await;

        assert_eq!(
            ledger.get(1).unwrap().error.as_deref(),
            Some("dependency 2 failed or not completed")
        );
        assert!(ledger.succeeded(2));
        assert_eq!(
            ledger.get(3).unwrap().error.as_deref(),
            Some("dependency 9 failed or not completed")
        );
    }

    #[tokio::test]
    async fn tool_failure_is_recorded_in_output() {
        let plan = Plan::new(vec![PlanStep::new(1, "bad", ToolType::Calculator, "DROP TABLE")]);
        let ledger = executor().execute(&plan).await;
        let result = ledger.get(1).unwrap();
        assert!(result.success);
        assert_eq!(result.output.as_ref().unwrap()["success"], json!(false));
    }

    #[tokio::test]
    async fn duplicate_step_numbers_keep_the_later_result() {
        let plan = Plan::new(vec![
            PlanStep::new(1, "first", ToolType::None, "a"),
            PlanStep::new(1, "second", ToolType::None, "b"),
        ]);
        let ledger = executor().execute(&plan).await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(1).unwrap().output.as_ref().unwrap()["input"], json!("b"));
    }

    #[tokio::test]
    async fn identical_plans_give_identical_ledgers() {
        let plan = Plan::new(vec![
            PlanStep::new(1, "calc", ToolType::Calculator, "(3 + 4) * 6"),
            PlanStep::new(2, "count", ToolType::TextAnalyzer, "The answer is step 1.").depends_on([1]),
        ]);
        let executor = executor();
        let a = executor.execute(&plan).await;
        let b = executor.execute(&plan).await;
        assert_eq!(a.to_json(), b.to_json());
    }
}
