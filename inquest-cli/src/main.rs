//! Inquest CLI: terminal interface for the Inquest research pipeline.
//!
//! Runs one research query to completion and writes the report, or manages
//! configuration and archived runs through subcommands.

mod commands;
mod research;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Inquest: cited research reports from a single question
#[derive(Parser, Debug)]
#[command(name = "inquest", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Research query
    #[arg(env = "INQUEST_QUERY")]
    query: Option<String>,

    /// Maximum sources gathered per sub-task
    #[arg(long)]
    max_results: Option<usize>,

    /// Maximum rewrite cycles per section
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Similarity at or above which a section is rewritten (0.0 - 1.0)
    #[arg(long)]
    threshold: Option<f64>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Report format(s) to write
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// Directory reports are written to
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FormatArg {
    Markdown,
    Pdf,
    Both,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect archived research runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Print the effective configuration as TOML
    Show,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum RunsAction {
    /// List archived runs, most recent first
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let mut cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "inquest", "inquest")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "inquest.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = cli.command.take() {
        commands::handle_command(command, &workspace, cli.config.as_deref()).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(query) = cli.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) else {
        eprintln!("No research query given. Pass it as an argument or set INQUEST_QUERY.");
        return Ok(ExitCode::from(2));
    };

    let mut config = commands::load(&workspace, cli.config.as_deref())?;
    research::apply_overrides(&mut config, &cli);
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    config
        .validate_strict()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    research::run_query(query, config, &workspace, cli.quiet).await
}
