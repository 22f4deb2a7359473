//! agentrace CLI entry point.
//!
//! Binary name: `agentrace`
//!
//! Parses CLI arguments, initializes tracing, builds the orchestrator and
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;

use agentrace_observe::{TracingOptions, init_tracing, shutdown_tracing};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        verbosity: cli.verbose,
        json: cli.json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;

    match cli.command {
        Commands::Template { action } => {
            cli::template::handle_template_command(action, &state, cli.json).await
        }
        Commands::Run {
            template_id,
            owner,
            input,
            vars,
            parallel,
            name,
            estimated_tokens,
        } => {
            let args = cli::run::RunArgs {
                template_id,
                owner,
                input,
                vars,
                parallel,
                name,
                estimated_tokens,
            };
            cli::run::handle_run(args, &state, cli.json).await
        }
        Commands::Execution { action } => {
            cli::execution::handle_execution_command(action, &state, cli.json).await
        }
        Commands::Metrics { workflow_id, range } => {
            cli::metrics::handle_metrics(&workflow_id, range, &state, cli.json).await
        }
    }
}
