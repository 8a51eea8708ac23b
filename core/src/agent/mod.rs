//! Agent pipeline
//!
//! ```text
//! query -> Planner -> Executor (ToolSelector per step) -> Validator -> Synthesizer -> answer
//! ```
//!
//! Every stage recovers from its own failures: the planner falls back to a
//! single pass-through step, the executor isolates failures per step, the
//! validator falls back to a heuristic and the synthesizer to a template.

pub mod executor;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod selector;
pub mod synthesizer;
pub mod tools;
pub mod types;
pub mod validator;

pub use executor::Executor;
pub use pipeline::{apology, completion_from_config, Agent, AgentRun};
pub use planner::Planner;
pub use selector::{stringify_output, ToolSelector};
pub use synthesizer::{template_answer, Synthesizer};
pub use tools::{Tool, ToolOutput, ToolRegistry};
pub use types::{
    ExecutionLedger, ExecutionResult, Plan, PlanOrigin, PlanStep, Recommendation, ToolType,
    ValidationReport,
};
pub use validator::Validator;
