pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod rate_limiter;
pub mod util;

// Re-exports for convenience
pub use agent::{Agent, AgentRun};
pub use config::Config;
pub use error::{PlanwiseError, Result};
