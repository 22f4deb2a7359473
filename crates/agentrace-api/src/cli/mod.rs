//! CLI command definitions for the `agentrace` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a
//! noun-verb pattern (`agentrace template register`, `agentrace execution show`).

pub mod execution;
pub mod metrics;
pub mod output;
pub mod run;
pub mod template;

use std::path::PathBuf;

use agentrace_types::metrics::TimeRange;
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

/// Run multi-step agent traces from workflow templates.
#[derive(Parser)]
#[command(name = "agentrace", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow templates.
    Template {
        #[command(subcommand)]
        action: TemplateCommand,
    },

    /// Execute a template and wait for it to finish. Ctrl+C cancels.
    Run {
        /// Template UUID.
        template_id: Uuid,

        /// Owner the execution is billed to.
        #[arg(long)]
        owner: String,

        /// Execution input as a JSON document.
        #[arg(long)]
        input: Option<String>,

        /// Variable assignment `name=value`; the value is parsed as JSON when possible.
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Batch size override.
        #[arg(long)]
        parallel: Option<u32>,

        /// Execution name (defaults to the template name).
        #[arg(long)]
        name: Option<String>,

        /// Token estimate reserved with the quota gate.
        #[arg(long)]
        estimated_tokens: Option<u64>,
    },

    /// Inspect executions.
    Execution {
        #[command(subcommand)]
        action: ExecutionCommand,
    },

    /// Aggregate metrics for one template.
    Metrics {
        /// Template UUID.
        workflow_id: Uuid,

        /// Look-back window: 1h, 6h, 12h, 7d or 30d (omit for all history).
        #[arg(long)]
        range: Option<TimeRange>,
    },
}

#[derive(Subcommand)]
pub enum TemplateCommand {
    /// Register a template from a YAML file.
    Register {
        /// Path to the template YAML file.
        file: PathBuf,

        /// Owner of the template (overrides `owner_id` in the file).
        #[arg(long)]
        owner: Option<String>,
    },

    /// List templates of one owner, newest first.
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        owner: String,
    },

    /// Show a template and its steps.
    Show {
        /// Template UUID.
        id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// Show an execution snapshot with its step table.
    Show {
        /// Execution UUID.
        id: Uuid,
    },
}

/// Parse `name=value`. Values that are not valid JSON become strings.
pub fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
