//! Skein CLI
//!
//! # Usage
//! ```bash
//! skein run functions/GenerateMathProblem.yaml --var topic=trains
//! skein solve "What is the square root of 2 raised to the 4th power?"
//! skein functions [--json]
//! skein parse prompt.txt [--strict]
//! ```

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use skein_core::catalog::CatalogFilter;
use skein_core::function::{Invocable, SemanticFunction};
use skein_core::planner::{LlmPlanner, LlmPlannerConfig};
use skein_core::transcript::{ParsePolicy, Transcript};
use skein_core::{InvocationContext, OpenAiCompatibleService, SkeinConfig, Variables};

mod math;
mod observer;

use observer::ConsoleObserver;

/// Skein - template-driven semantic functions and goal solving
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke a semantic function from a YAML definition
    Run {
        /// Function definition file
        definition: PathBuf,

        /// Input variable; values are parsed as JSON, else taken as text
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Fail on malformed role markers instead of skipping them
        #[arg(long)]
        strict: bool,
    },

    /// Solve a math problem by planning over the Math plugin
    Solve {
        /// The problem, in plain language
        problem: String,
    },

    /// List the Math plugin functions
    Functions {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the transcript parsed from a rendered prompt
    Parse {
        /// File containing rendered prompt text
        file: PathBuf,

        /// Fail on malformed role markers instead of skipping them
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = SkeinConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Run { definition, vars, strict } => run(&config, &definition, vars, strict).await?,
        Commands::Solve { problem } => return solve(&config, &problem).await,
        Commands::Functions { json } => list_functions(&config, json)?,
        Commands::Parse { file, strict } => parse(&file, strict)?,
    }

    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: bool, level: &str) {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn policy(strict: bool) -> ParsePolicy {
    if strict {
        ParsePolicy::Strict
    } else {
        ParsePolicy::Lenient
    }
}

fn context(config: &SkeinConfig) -> anyhow::Result<InvocationContext> {
    let service = OpenAiCompatibleService::from_settings(&config.completion)?;
    let context = InvocationContext::new(Arc::new(service));

    let token = context.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });

    Ok(context)
}

fn solver(config: &SkeinConfig, observer: Arc<ConsoleObserver>) -> skein_core::GoalFunction {
    let planner = LlmPlanner::new(LlmPlannerConfig::from_settings(&config.planner));
    math::perform_math(Arc::new(planner), config.planner.max_extra_tries, observer)
}

async fn run(config: &SkeinConfig, definition: &Path, vars: Vec<(String, Value)>, strict: bool) -> anyhow::Result<()> {
    let function = SemanticFunction::from_yaml_file(definition)?.with_parse_policy(policy(strict));
    let variables: Variables = vars.into_iter().collect();

    let result = function.invoke(&context(config)?, &variables).await?;
    println!("{result}");
    Ok(())
}

async fn solve(config: &SkeinConfig, problem: &str) -> anyhow::Result<ExitCode> {
    let observer = Arc::new(ConsoleObserver::default());
    let solver = solver(config, Arc::clone(&observer));
    let catalog = math::catalog(solver.clone())?;
    let context = context(config)?.with_catalog(Arc::new(catalog));

    let mut variables = Variables::new();
    variables.insert("math_problem".to_string(), Value::String(problem.to_string()));

    match solver.invoke(&context, &variables).await {
        Ok(_) => Ok(ExitCode::SUCCESS),
        // Already printed as an `Error:` block
        Err(_) if observer.reported_failure() => Ok(ExitCode::FAILURE),
        Err(e) => Err(e.into()),
    }
}

fn list_functions(config: &SkeinConfig, json: bool) -> anyhow::Result<()> {
    let catalog = math::catalog(solver(config, Arc::new(ConsoleObserver::default())))?;
    let specs = catalog.list(&CatalogFilter::default());

    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    for spec in specs {
        let params: Vec<String> = spec
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.param_type))
            .collect();
        println!("{}({})", spec.qualified_name(), params.join(", "));
        println!("    {}", spec.description);
    }
    Ok(())
}

fn parse(file: &Path, strict: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let transcript = Transcript::parse_with(&text, policy(strict))?;

    for message in &transcript {
        println!("[{}] {}", message.role(), message.content());
    }
    Ok(())
}
