//! CLI argument parsing using clap 4.x derive macros

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Answer questions by planning, running tools and summarizing the results
///
/// Works with Google Gemini (default) or any OpenAI-compatible endpoint.
/// A bare query is the same as `planwise ask <QUERY>`.
#[derive(Parser, Debug)]
#[command(name = "planwise")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(disable_version_flag = true)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Direct query (alternative to the 'ask' subcommand)
    #[arg(num_args = 1..)]
    pub query: Vec<String>,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print version information
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline and print the answer
    Ask {
        /// The question or task
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Also print the plan, step results and validation
        #[arg(short, long)]
        details: bool,

        /// Print the whole run as JSON
        #[arg(long, conflicts_with = "details")]
        json: bool,

        /// Skip the validation stage
        #[arg(long)]
        no_validate: bool,
    },

    /// Print the plan for a query without running it
    Plan {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Invoke a single tool directly
    Tool {
        /// calculator, text_analyzer, search, financial_data or commodity_price
        tool: String,

        /// Tool input
        #[arg(required = true, num_args = 1..)]
        input: Vec<String>,
    },

    /// List the registered tools
    Tools,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        cmd: Option<ConfigCommand>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the effective configuration (API key masked)
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
