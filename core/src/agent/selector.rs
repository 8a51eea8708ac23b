//! Tool selection and dependency input substitution

use super::tools::{Tool, ToolRegistry};
use super::types::{ExecutionLedger, PlanStep, ToolType};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const PASS_THROUGH_MESSAGE: &str = "No tool execution needed";

lazy_static::lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"(?i)\bstep\s+(\d+)").expect("valid regex");
}

/// Resolves plan steps against the registry.
#[derive(Clone, Debug)]
pub struct ToolSelector {
    registry: Arc<ToolRegistry>,
}

impl ToolSelector {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// `None` means pass-through: either the step asked for no tool or the
    /// requested tool is not registered.
    pub fn select_tool(&self, step: &PlanStep) -> Option<Arc<dyn Tool>> {
        if step.required_tool == ToolType::None {
            tracing::debug!(step = step.step_number, "no tool required");
            return None;
        }

        let tool = self.registry.get(step.required_tool);
        if tool.is_none() {
            tracing::warn!(
                step = step.step_number,
                tool = %step.required_tool,
                "tool not registered, passing input through"
            );
        }
        tool
    }

    /// Substitute `step <n>` placeholders with the output of dependency `n`.
    ///
    /// Matching is case-insensitive and textual: every occurrence is
    /// replaced, wherever it appears. `step 1` never matches inside
    /// `step 12`. Only dependencies that succeeded are substituted, and
    /// substituted text is not rescanned.
    pub fn prepare_input(&self, step: &PlanStep, prior: &ExecutionLedger) -> String {
        let replacements: HashMap<u32, String> = step
            .dependencies
            .iter()
            .filter_map(|dep| {
                let result = prior.get(*dep).filter(|r| r.success)?;
                let output = result.output.as_ref()?;
                Some((*dep, stringify_output(output)))
            })
            .collect();

        if replacements.is_empty() {
            return step.tool_input.clone();
        }

        let prepared = PLACEHOLDER_RE
            .replace_all(&step.tool_input, |caps: &Captures| {
                caps[1]
                    .parse::<u32>()
                    .ok()
                    .and_then(|n| replacements.get(&n))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();

        if prepared != step.tool_input {
            tracing::debug!(step = step.step_number, input = %prepared, "substituted dependency output");
        }
        prepared
    }
}

/// Output of a pass-through step.
pub(crate) fn pass_through_output(input: &str) -> Value {
    serde_json::json!({ "message": PASS_THROUGH_MESSAGE, "input": input })
}

/// Text form of a step output, as substituted into later inputs.
///
/// A scalar `result` field is rendered bare (`150`, not `{"result":150,...}`),
/// a pass-through renders its input, everything else is compact JSON.
pub fn stringify_output(output: &Value) -> String {
    if let Value::Object(map) = output {
        match map.get("result") {
            Some(Value::String(s)) => return s.clone(),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => return v.to_string(),
            _ => {}
        }
        if map.get("message").and_then(Value::as_str) == Some(PASS_THROUGH_MESSAGE) {
            if let Some(Value::String(input)) = map.get("input") {
                return input.clone();
            }
        }
    }

    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
