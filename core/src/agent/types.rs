//! Plan, ledger and validation types shared by the pipeline stages

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of tool kinds a plan step may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolType {
    Search,
    Calculator,
    TextAnalyzer,
    FinancialData,
    CommodityPrice,
    /// No tool; the step passes its input through.
    None,
}

impl ToolType {
    /// Every kind that can be backed by a registered tool.
    pub const CALLABLE: [ToolType; 5] = [
        ToolType::Search,
        ToolType::Calculator,
        ToolType::TextAnalyzer,
        ToolType::FinancialData,
        ToolType::CommodityPrice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Search => "search",
            ToolType::Calculator => "calculator",
            ToolType::TextAnalyzer => "text_analyzer",
            ToolType::FinancialData => "financial_data",
            ToolType::CommodityPrice => "commodity_price",
            ToolType::None => "none",
        }
    }

    /// Wire name used in plans (`TEXT_ANALYZER`, ...).
    pub fn wire_name(&self) -> &'static str {
        match self {
            ToolType::Search => "SEARCH",
            ToolType::Calculator => "CALCULATOR",
            ToolType::TextAnalyzer => "TEXT_ANALYZER",
            ToolType::FinancialData => "FINANCIAL_DATA",
            ToolType::CommodityPrice => "COMMODITY_PRICE",
            ToolType::None => "NONE",
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = String;

    /// Case-insensitive; `-` and spaces are accepted in place of `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "SEARCH" => Ok(ToolType::Search),
            "CALCULATOR" => Ok(ToolType::Calculator),
            "TEXT_ANALYZER" => Ok(ToolType::TextAnalyzer),
            "FINANCIAL_DATA" => Ok(ToolType::FinancialData),
            "COMMODITY_PRICE" => Ok(ToolType::CommodityPrice),
            "NONE" => Ok(ToolType::None),
            _ => Err(format!("unknown tool type: {}", s)),
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_number: u32,
    pub description: String,
    pub required_tool: ToolType,
    /// Steps that must have succeeded before this one runs, in declared order.
    pub dependencies: Vec<u32>,
    /// May contain `step <n>` placeholders naming a dependency.
    pub tool_input: String,
}

impl PlanStep {
    pub fn new(
        step_number: u32,
        description: impl Into<String>,
        required_tool: ToolType,
        tool_input: impl Into<String>,
    ) -> Self {
        Self {
            step_number,
            description: description.into(),
            required_tool,
            dependencies: Vec::new(),
            tool_input: tool_input.into(),
        }
    }

    pub fn depends_on(mut self, dependencies: impl IntoIterator<Item = u32>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOrigin {
    /// Decomposed by the model
    Model,
    /// Canned single-step plan substituted after a planning failure
    Fallback,
    /// Built by hand (tests, `planwise tool`)
    Manual,
}

/// Ordered steps owned by a single run. Never empty when produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub origin: PlanOrigin,
}

impl Plan {
    pub const FALLBACK_DESCRIPTION: &'static str = "Process query directly";

    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            steps,
            origin: PlanOrigin::Manual,
        }
    }

    /// Single pass-through step carrying the query verbatim.
    pub fn fallback(query: &str) -> Self {
        Self {
            steps: vec![PlanStep::new(
                1,
                Self::FALLBACK_DESCRIPTION,
                ToolType::None,
                query,
            )],
            origin: PlanOrigin::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == PlanOrigin::Fallback
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanStep> {
        self.steps.iter()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a PlanStep;
    type IntoIter = std::slice::Iter<'a, PlanStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Outcome of one attempted step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step_number: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(step_number: u32, output: Value) -> Self {
        Self {
            step_number,
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(step_number: u32, error: impl Into<String>) -> Self {
        Self {
            step_number,
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Results keyed by step number. Entries are only ever added by the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLedger {
    results: BTreeMap<u32, ExecutionResult>,
}

impl ExecutionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result, returning the one it replaced (duplicate step numbers).
    pub(crate) fn record(&mut self, result: ExecutionResult) -> Option<ExecutionResult> {
        self.results.insert(result.step_number, result)
    }

    pub fn get(&self, step_number: u32) -> Option<&ExecutionResult> {
        self.results.get(&step_number)
    }

    /// True only when the step ran and succeeded.
    pub fn succeeded(&self, step_number: u32) -> bool {
        self.get(step_number).is_some_and(|r| r.success)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn successful(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.successful()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.values()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl FromIterator<ExecutionResult> for ExecutionLedger {
    fn from_iter<I: IntoIterator<Item = ExecutionResult>>(iter: I) -> Self {
        let mut ledger = Self::new();
        for result in iter {
            ledger.record(result);
        }
        ledger
    }
}

/// Validator verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Accept,
    Reject,
    RetryWithCaution,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recommendation::Accept => "ACCEPT",
            Recommendation::Reject => "REJECT",
            Recommendation::RetryWithCaution => "RETRY_WITH_CAUTION",
        })
    }
}

/// Plausibility assessment of a ledger. Informational; never gates synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// 0..=100
    pub confidence_score: u8,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub reasoning: String,
    /// Set when the report was computed locally instead of by the model.
    #[serde(default)]
    pub heuristic: bool,
}

impl ValidationReport {
    /// Deterministic report derived from success counts alone.
    ///
    /// An empty ledger is never accepted.
    pub fn heuristic(ledger: &ExecutionLedger) -> Self {
        let total = ledger.len();
        let successful = ledger.successful();
        let all_ok = total > 0 && successful == total;

        let confidence_score = if total == 0 {
            0
        } else {
            (100 * successful / total) as u8
        };

        let warnings = if all_ok {
            Vec::new()
        } else if total == 0 {
            vec!["No steps were executed".to_string()]
        } else {
            vec!["Some steps failed".to_string()]
        };

        Self {
            valid: all_ok,
            confidence_score,
            warnings,
            errors: Vec::new(),
            recommendation: if all_ok {
                Recommendation::Accept
            } else {
                Recommendation::RetryWithCaution
            },
            reasoning: format!("Basic validation: {}/{} steps succeeded", successful, total),
            heuristic: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_type_names() {
        assert_eq!(ToolType::TextAnalyzer.to_string(), "text_analyzer");
        assert_eq!(
            serde_json::to_string(&ToolType::CommodityPrice).unwrap(),
            "\"COMMODITY_PRICE\""
        );
        assert_eq!("text-analyzer".parse::<ToolType>().unwrap(), ToolType::TextAnalyzer);
        assert_eq!(" calculator ".parse::<ToolType>().unwrap(), ToolType::Calculator);
        assert!("WEATHER".parse::<ToolType>().is_err());
    }

    #[test]
    fn fallback_plan_shape() {
        let plan = Plan::fallback("hi there");
        assert!(plan.is_fallback());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].step_number, 1);
        assert_eq!(plan.steps[0].required_tool, ToolType::None);
        assert_eq!(plan.steps[0].tool_input, "hi there");
        assert!(plan.steps[0].dependencies.is_empty());
    }

    #[test]
    fn ledger_counts_and_ordering() {
        let ledger: ExecutionLedger = vec![
            ExecutionResult::failure(10, "boom"),
            ExecutionResult::success(2, json!({"ok": true})),
        ]
        .into_iter()
        .collect();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.successful(), 1);
        assert_eq!(ledger.failed(), 1);
        assert!(ledger.succeeded(2));
        assert!(!ledger.succeeded(10));
        assert!(!ledger.succeeded(3));
        let order: Vec<u32> = ledger.iter().map(|r| r.step_number).collect();
        assert_eq!(order, vec![2, 10]);
    }

    #[test]
    fn heuristic_report() {
        let ledger: ExecutionLedger = vec![
            ExecutionResult::success(1, json!(1)),
            ExecutionResult::success(2, json!(2)),
            ExecutionResult::failure(3, "x"),
        ]
        .into_iter()
        .collect();

        let report = ValidationReport::heuristic(&ledger);
        assert!(!report.valid);
        assert_eq!(report.confidence_score, 66);
        assert_eq!(report.recommendation, Recommendation::RetryWithCaution);
        assert_eq!(report.warnings, vec!["Some steps failed".to_string()]);
        assert_eq!(report.reasoning, "Basic validation: 2/3 steps succeeded");
        assert!(report.heuristic);

        let clean: ExecutionLedger = vec![ExecutionResult::success(1, json!(1))].into_iter().collect();
        let report = ValidationReport::heuristic(&clean);
        assert!(report.valid);
        assert_eq!(report.confidence_score, 100);
        assert_eq!(report.recommendation, Recommendation::Accept);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn heuristic_never_accepts_an_empty_ledger() {
        let empty = ValidationReport::heuristic(&ExecutionLedger::new());
        assert!(!empty.valid);
        assert_eq!(empty.confidence_score, 0);
        assert_eq!(empty.recommendation, Recommendation::RetryWithCaution);
        assert_eq!(empty.warnings, vec!["No steps were executed".to_string()]);
        assert_eq!(empty.reasoning, "Basic validation: 0/0 steps succeeded");
    }
}
