//! Planner: query in, ordered steps out
//!
//! The model is asked for a JSON array of steps. Whatever comes back is read
//! leniently; when nothing usable does, the planner substitutes a single
//! pass-through step so the run always has a plan.

use super::parser::extract_json;
use super::types::{Plan, PlanOrigin, PlanStep, ToolType};
use crate::llm::CompletionCapability;
use crate::util::preview;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const PLANNER_SYSTEM_PROMPT: &str = r#"You plan the work of a tool-using assistant. Break the user's request into a short sequence of executable steps.

Tools:
- SEARCH: look up current information on the web (news, facts, events)
- CALCULATOR: evaluate an arithmetic expression using + - * / and parentheses
- TEXT_ANALYZER: text statistics (word count, sentences, readability)
- FINANCIAL_DATA: price of a stock, crypto or futures ticker (AAPL, BTC-USD, SI=F)
- COMMODITY_PRICE: price of a commodity by name (silver, gold, oil, copper, ...)
- NONE: no tool; greetings, clarifications, direct answers

Each step is an object with:
- "step": step number, starting at 1
- "description": what the step does
- "tool": one of SEARCH, CALCULATOR, TEXT_ANALYZER, FINANCIAL_DATA, COMMODITY_PRICE, NONE
- "input": the exact input for the tool
- "dependencies": numbers of earlier steps that must finish first

To use the output of an earlier step, list it in "dependencies" and write "step N" in "input" where the value belongs.

Example:
[
  {"step": 1, "description": "Add the numbers", "tool": "CALCULATOR", "input": "100 + 50", "dependencies": []},
  {"step": 2, "description": "Analyze the sum", "tool": "TEXT_ANALYZER", "input": "step 1", "dependencies": [1]}
]

Respond with the JSON array only."#;

/// Turns a query into a [`Plan`].
pub struct Planner {
    llm: Arc<dyn CompletionCapability>,
    fallbacks: AtomicU64,
    consecutive_fallbacks: AtomicU64,
}

impl Planner {
    pub fn new(llm: Arc<dyn CompletionCapability>) -> Self {
        Self {
            llm,
            fallbacks: AtomicU64::new(0),
            consecutive_fallbacks: AtomicU64::new(0),
        }
    }

    /// Never fails and never returns an empty plan.
    pub async fn create_plan(&self, query: &str) -> Plan {
        tracing::info!(query = %preview(query, 120), "creating plan");

        let reply = match self.llm.complete_json(PLANNER_SYSTEM_PROMPT, query).await {
            Ok(reply) => reply,
            Err(e) => return self.fallback(query, &format!("completion failed: {}", e)),
        };

        let steps = match parse_plan_steps(&reply) {
            Some(steps) if !steps.is_empty() => steps,
            Some(_) => return self.fallback(query, "model returned an empty plan"),
            None => {
                tracing::debug!(reply = %preview(&reply, 500), "unparseable plan reply");
                return self.fallback(query, "model reply was not a JSON plan");
            }
        };

        self.consecutive_fallbacks.store(0, Ordering::Relaxed);
        tracing::info!(steps = steps.len(), "plan created");
        for step in &steps {
            tracing::info!(
                step = step.step_number,
                tool = %step.required_tool,
                dependencies = ?step.dependencies,
                input = %preview(&step.tool_input, 100),
                "  {}",
                step.description
            );
        }

        Plan {
            steps,
            origin: PlanOrigin::Model,
        }
    }

    /// Total fallback plans produced by this planner.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Fallback plans produced since the last model plan.
    pub fn consecutive_fallbacks(&self) -> u64 {
        self.consecutive_fallbacks.load(Ordering::Relaxed)
    }

    fn fallback(&self, query: &str, reason: &str) -> Plan {
        let total = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        let consecutive = self.consecutive_fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            fallback = true,
            total,
            consecutive,
            llm = self.llm.name(),
            "planning failed, using single-step plan: {}",
            reason
        );
        Plan::fallback(query)
    }
}

/// Read steps from a model reply. `None` when the reply holds no plan at all.
///
/// Accepts a bare array or an object with a `steps` array. Unknown tools
/// become `NONE`; a missing or invalid step number becomes position + 1.
pub fn parse_plan_steps(reply: &str) -> Option<Vec<PlanStep>> {
    let value: Value = extract_json(reply)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("steps") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    let mut steps: Vec<PlanStep> = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(obj) = item else {
            tracing::warn!("skipping non-object plan entry");
            continue;
        };

        let step_number = obj
            .get("step")
            .or_else(|| obj.get("step_number"))
            .and_then(as_step_number)
            .unwrap_or(steps.len() as u32 + 1);

        let required_tool = match obj.get("tool").or_else(|| obj.get("required_tool")) {
            None | Some(Value::Null) => ToolType::None,
            Some(raw) => {
                let name = as_text(raw);
                name.parse::<ToolType>().unwrap_or_else(|_| {
                    tracing::warn!(tool = %name, step = step_number, "unknown tool, using NONE");
                    ToolType::None
                })
            }
        };

        let mut dependencies: Vec<u32> = Vec::new();
        if let Some(Value::Array(deps)) = obj.get("dependencies") {
            for dep in deps.iter().filter_map(as_step_number) {
                if !dependencies.contains(&dep) {
                    dependencies.push(dep);
                }
            }
        }

        steps.push(PlanStep {
            step_number,
            description: obj.get("description").map(as_text).unwrap_or_default(),
            required_tool,
            dependencies,
            tool_input: obj
                .get("input")
                .or_else(|| obj.get("tool_input"))
                .map(as_text)
                .unwrap_or_default(),
        });
    }

    Some(steps)
}

fn as_step_number(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u32::try_from(n).ok().filter(|n| *n > 0)
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlanwiseError, Result};
    use async_trait::async_trait;

    struct Scripted(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl CompletionCapability for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.0
                .map(str::to_string)
                .map_err(|_| PlanwiseError::ServiceUnavailable)
        }
    }

    fn planner(reply: std::result::Result<&'static str, ()>) -> Planner {
        Planner::new(Arc::new(Scripted(reply)))
    }

    #[tokio::test]
    async fn parses_fenced_plan() {
        let reply = "```json\n[\n  {\"step\": 1, \"description\": \"Add\", \"tool\": \"CALCULATOR\", \"input\": \"2 + 2\", \"dependencies\": []},\n  {\"step\": 2, \"description\": \"Count\", \"tool\": \"text_analyzer\", \"input\": \"step 1\", \"dependencies\": [1]}\n]\n```";
        let planner = planner(Ok(reply));
        let plan = planner.create_plan("what is 2 + 2").await;

        assert_eq!(plan.origin, PlanOrigin::Model);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[0].required_tool, ToolType::Calculator);
        assert_eq!(plan.steps[1].required_tool, ToolType::TextAnalyzer);
        assert_eq!(plan.steps[1].dependencies, vec![1]);
        assert_eq!(planner.fallback_count(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_none() {
        let plan = planner(Ok(r#"[{"step": 1, "description": "Weather", "tool": "WEATHER", "input": "Paris"}]"#))
            .create_plan("weather in Paris")
            .await;
        assert_eq!(plan.steps[0].required_tool, ToolType::None);
        assert_eq!(plan.steps[0].tool_input, "Paris");
    }

    #[test]
    fn missing_fields_get_defaults() {
        let steps = parse_plan_steps(r#"[{"tool": "SEARCH"}, {"description": "second", "dependencies": ["1", 0, 1]}]"#).unwrap();
        assert_eq!(steps[0].step_number, 1);
        assert_eq!(steps[0].description, "");
        assert_eq!(steps[0].tool_input, "");
        assert!(steps[0].dependencies.is_empty());
        assert_eq!(steps[1].step_number, 2);
        assert_eq!(steps[1].required_tool, ToolType::None);
        assert_eq!(steps[1].dependencies, vec![1]);
    }

    #[test]
    fn accepts_steps_object_and_numeric_input() {
        let steps = parse_plan_steps(r#"{"steps": [{"step": 4, "tool": "CALCULATOR", "input": 42}]}"#).unwrap();
        assert_eq!(steps[0].step_number, 4);
        assert_eq!(steps[0].tool_input, "42");
    }

    #[tokio::test]
    async fn completion_failure_falls_back() {
        let planner = planner(Err(()));
        let plan = planner.create_plan("hello there").await;
        assert!(plan.is_fallback());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].tool_input, "hello there");
        assert_eq!(plan.steps[0].description, Plan::FALLBACK_DESCRIPTION);
        assert_eq!(planner.fallback_count(), 1);
    }

    #[tokio::test]
    async fn garbage_and_empty_plans_fall_back() {
        for reply in ["Sorry, I can't do that.", "[]", "{\"plan\": 1}"] {
            let plan = planner(Ok(reply)).create_plan("q").await;
            assert!(plan.is_fallback(), "reply {:?} should fall back", reply);
            assert_eq!(plan.steps[0].tool_input, "q");
        }
    }

    #[tokio::test]
    async fn consecutive_fallbacks_are_counted() {
        let planner = planner(Err(()));
        planner.create_plan("a").await;
        planner.create_plan("b").await;
        assert_eq!(planner.fallback_count(), 2);
        assert_eq!(planner.consecutive_fallbacks(), 2);
    }
}
