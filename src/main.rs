//! `planwise` - answer questions by planning, running tools and summarizing
//!
//! This binary wires configuration, logging and terminal output around the
//! agent pipeline in `planwise-core`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use console::Style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommand};
use crate::output::OutputFormatter;
use planwise_core::agent::{Agent, ToolRegistry, ToolType};
use planwise_core::config::{config_to_rate_limit, Config};
use planwise_core::rate_limiter::RateLimiter;

mod cli;
mod output;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.version {
        let blue = Style::new().blue();
        println!(
            "{} v{} ({})",
            blue.apply_to("planwise"),
            env!("CARGO_PKG_VERSION"),
            env!("GIT_HASH")
        );
        return Ok(());
    }

    let formatter = OutputFormatter::new();

    match &cli.command {
        Some(Commands::Ask {
            query,
            details,
            json,
            no_validate,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            let query = query.join(" ");
            handle_ask(&config, &query, *details, *json, *no_validate, &formatter).await?;
        }

        None if !cli.query.is_empty() => {
            let config = load_config(cli.config.as_deref())?;
            let query = cli.query.join(" ");
            handle_ask(&config, &query, false, false, false, &formatter).await?;
        }

        Some(Commands::Plan { query, json }) => {
            let config = load_config(cli.config.as_deref())?;
            let agent = Agent::from_config(&config).map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let plan = agent.plan(&query.join(" ")).await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                formatter.print_plan(&plan);
            }
        }

        Some(Commands::Tool { tool, input }) => {
            let config = load_config(cli.config.as_deref())?;
            let tool_type: ToolType = tool.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let registry = registry_from_config(&config)?;
            let Some(tool) = registry.get(tool_type) else {
                bail!("tool '{}' is not enabled", tool_type);
            };
            let output = tool.execute(&input.join(" ")).await;
            println!("{}", serde_json::to_string_pretty(output.as_value())?);
        }

        Some(Commands::Tools) => {
            let config = load_config(cli.config.as_deref())?;
            formatter.print_tools(&registry_from_config(&config)?);
        }

        Some(Commands::Config { cmd }) => {
            handle_config(cli.config.as_deref(), (*cmd).unwrap_or(ConfigCommand::Show))?;
        }

        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
        }
    }

    Ok(())
}

/// `PLANWISE_LOG` wins over `RUST_LOG`; otherwise `-v` flags pick the level.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = std::env::var("PLANWISE_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            config.apply_env();
            config
        }
        None => Config::load_or_default(),
    };
    tracing::debug!(
        provider = ?config.llm.provider,
        model = config.model(),
        has_api_key = config.llm.api_key.is_some(),
        "configuration loaded"
    );
    Ok(config)
}

fn registry_from_config(config: &Config) -> Result<ToolRegistry> {
    let rate_limiter = Arc::new(RateLimiter::new(config_to_rate_limit(config)));
    ToolRegistry::from_config(config, rate_limiter).map_err(|e| anyhow::anyhow!(e.user_message()))
}

async fn handle_ask(
    config: &Config,
    query: &str,
    details: bool,
    json: bool,
    no_validate: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let agent = Agent::from_config(config).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let agent = if no_validate {
        agent.without_validation()
    } else {
        agent
    };

    let work = async {
        if details || json {
            let run = agent.run_detailed(query).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                formatter.print_run(&run);
            }
        } else {
            formatter.print_answer(&agent.run(query).await);
        }
        Ok::<_, anyhow::Error>(())
    };

    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            formatter.print_error("interrupted");
            std::process::exit(130);
        }
    }
}

fn handle_config(path: Option<&Path>, cmd: ConfigCommand) -> Result<()> {
    let config_path: Option<PathBuf> = path.map(Path::to_path_buf).or_else(Config::default_path);

    match cmd {
        ConfigCommand::Show => {
            let config = load_config(path)?;
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigCommand::Path => match config_path {
            Some(path) => println!("{}", path.display()),
            None => bail!("no configuration directory on this platform"),
        },
        ConfigCommand::Init { force } => {
            let Some(path) = config_path else {
                bail!("no configuration directory on this platform");
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save(&path)?;
            let green = Style::new().green();
            println!("{} {}", green.apply_to("Wrote"), path.display());
        }
    }
    Ok(())
}
