//! Terminal rendering of plans, step results and validation reports

use console::Style;
use planwise_core::agent::{
    stringify_output, AgentRun, ExecutionLedger, Plan, PlanOrigin, Recommendation, ToolRegistry,
    ValidationReport,
};

/// Output formatter for CLI results
pub struct OutputFormatter {
    blue: Style,
    green: Style,
    yellow: Style,
    red: Style,
    bold: Style,
    dim: Style,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self {
            blue: Style::new().blue(),
            green: Style::new().green(),
            yellow: Style::new().yellow(),
            red: Style::new().red(),
            bold: Style::new().bold(),
            dim: Style::new().dim(),
        }
    }
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print_answer(&self, answer: &str) {
        println!("{}", answer);
    }

    /// Plan, ledger and validation, then the answer.
    pub fn print_run(&self, run: &AgentRun) {
        self.print_plan(&run.plan);
        self.print_results(&run.plan, &run.results);
        if let Some(report) = &run.validation {
            self.print_validation(report);
        }
        println!();
        println!("{}", self.bold.apply_to("Answer:"));
        self.print_answer(&run.answer);
    }

    pub fn print_plan(&self, plan: &Plan) {
        let origin = match plan.origin {
            PlanOrigin::Model => self.green.apply_to("model"),
            PlanOrigin::Fallback => self.yellow.apply_to("fallback"),
            PlanOrigin::Manual => self.blue.apply_to("manual"),
        };
        println!();
        println!("{} ({})", self.bold.apply_to("Plan:"), origin);
        for step in plan {
            let deps = if step.dependencies.is_empty() {
                String::new()
            } else {
                let list: Vec<String> = step.dependencies.iter().map(|d| d.to_string()).collect();
                format!(" after {}", list.join(", "))
            };
            println!(
                "  {}. {} [{}]{}",
                step.step_number,
                step.description,
                self.blue.apply_to(step.required_tool.wire_name()),
                self.dim.apply_to(deps)
            );
            if !step.tool_input.is_empty() {
                println!("     {}", self.dim.apply_to(format!("input: {}", step.tool_input)));
            }
        }
    }

    pub fn print_results(&self, plan: &Plan, ledger: &ExecutionLedger) {
        println!();
        println!(
            "{} {}/{} succeeded",
            self.bold.apply_to("Results:"),
            ledger.successful(),
            ledger.len()
        );
        for step in plan {
            let Some(result) = ledger.get(step.step_number) else {
                continue;
            };
            match (&result.output, &result.error) {
                (Some(output), _) if result.success => println!(
                    "  {} {}. {}",
                    self.green.apply_to("ok"),
                    step.step_number,
                    stringify_output(output)
                ),
                (_, error) => println!(
                    "  {} {}. {}",
                    self.red.apply_to("failed"),
                    step.step_number,
                    error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
    }

    pub fn print_validation(&self, report: &ValidationReport) {
        let verdict = match report.recommendation {
            Recommendation::Accept => self.green.apply_to(report.recommendation.to_string()),
            Recommendation::RetryWithCaution => {
                self.yellow.apply_to(report.recommendation.to_string())
            }
            Recommendation::Reject => self.red.apply_to(report.recommendation.to_string()),
        };
        println!();
        println!(
            "{} {} (confidence {}%{})",
            self.bold.apply_to("Validation:"),
            verdict,
            report.confidence_score,
            if report.heuristic { ", heuristic" } else { "" }
        );
        for warning in &report.warnings {
            println!("  {} {}", self.yellow.apply_to("warning:"), warning);
        }
        for error in &report.errors {
            println!("  {} {}", self.red.apply_to("error:"), error);
        }
        if !report.reasoning.is_empty() {
            println!("  {}", self.dim.apply_to(&report.reasoning));
        }
    }

    pub fn print_tools(&self, registry: &ToolRegistry) {
        println!("{}", self.bold.apply_to("Tools:"));
        for tool in registry.tools() {
            println!(
                "  {:<16} {}",
                self.blue.apply_to(tool.tool_type().as_str()),
                tool.description()
            );
        }
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", self.red.apply_to("error:"), message);
    }
}
