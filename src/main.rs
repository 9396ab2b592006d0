//! mcp-scenario CLI
//!
//! Executes a plain-English scenario file against the configured MCP server
//! and writes JSON and HTML reports into the run's artifact directory.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use mcp_scenario_runner::runner::{run_scenario, RunOptions, RunStatus};

/// Execute a plain-English MCP scenario
#[derive(Parser)]
#[command(name = "mcp-scenario")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Execute a plain-English scenario against an MCP server over stdio")]
struct Cli {
    /// Path to the plain text instruction file
    #[arg(long)]
    file: PathBuf,

    /// Environment key defined in config.jsonc
    #[arg(long)]
    env: Option<String>,

    /// Path to the project configuration
    #[arg(long, default_value = "config.jsonc")]
    config: PathBuf,

    /// Path to a .env file with values passed to the server
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Logical run identifier appended to the timestamp
    #[arg(long)]
    run_id: Option<String>,

    /// Override the model id (defaults to BEDROCK_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Override the artifacts directory from config.jsonc
    #[arg(long)]
    artifacts_dir: Option<String>,

    /// Enable verbose logging output
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

async fn run(cli: Cli) -> anyhow::Result<RunStatus> {
    let base_dir = std::env::current_dir().context("cannot determine working directory")?;
    let options = RunOptions {
        file: cli.file,
        env: cli.env,
        config: cli.config,
        env_file: cli.env_file,
        run_id: cli.run_id,
        model: cli.model,
        artifacts_dir: cli.artifacts_dir,
        base_dir,
    };

    let result = run_scenario(&options).await?;
    println!(
        "Run complete with status: {}\nArtifacts saved to {}",
        result.status.as_str().to_uppercase(),
        result
            .metadata
            .get("artifactsDir")
            .and_then(|v| v.as_str())
            .unwrap_or_default(),
    );
    Ok(result.status)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    mcp_scenario_runner::init_tracing(cli.debug, cli.log_json);

    match run(cli).await {
        Ok(RunStatus::Passed) => ExitCode::SUCCESS,
        Ok(RunStatus::Failed) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Run failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
