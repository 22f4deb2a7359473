//! `agentrace run`: start an execution and follow it to the end.
//!
//! Progress comes from the orchestrator's event bus. Ctrl+C sends a cancel,
//! which the scheduler honors at the next batch boundary.

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use agentrace_core::trace::TraceError;
use agentrace_types::event::TraceEvent;
use agentrace_types::trace::{AgentTraceExecution, ExecuteOptions, ExecutionStatus};

use super::output::{format_duration_ms, print_execution, print_json};
use crate::state::{AppState, Orchestrator};

pub struct RunArgs {
    pub template_id: Uuid,
    pub owner: String,
    pub input: Option<String>,
    pub vars: Vec<(String, Value)>,
    pub parallel: Option<u32>,
    pub name: Option<String>,
    pub estimated_tokens: Option<u64>,
}

pub async fn handle_run(args: RunArgs, state: &AppState, json: bool) -> Result<()> {
    let input = match args.input.as_deref() {
        Some(raw) => serde_json::from_str(raw).context("--input is not valid JSON")?,
        None => Value::Object(Default::default()),
    };
    let options = ExecuteOptions {
        name: args.name,
        variables: args.vars.into_iter().collect(),
        parent_execution_id: None,
        parallelism: args.parallel,
        estimated_tokens: args.estimated_tokens,
    };

    let orchestrator = &state.orchestrator;
    // Subscribe first so the start events are not missed.
    let mut events = orchestrator.events().subscribe();
    let started = orchestrator
        .execute_trace(&args.template_id, &args.owner, input, options)
        .await?;
    let id = started.id;

    let progress = if json {
        None
    } else {
        println!();
        println!(
            "  {} Started '{}' ({} steps)",
            style("*").green().bold(),
            style(&started.name).cyan(),
            started.steps.len()
        );
        println!("  ID: {id}");
        println!("  {}", style("Press Ctrl+C to cancel").dim());
        println!();

        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.execution_id() == id => {
                        if let Some(line) = progress_line(&event) {
                            println!("{line}");
                        }
                        if event.is_terminal() {
                            break;
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    };

    let done = wait_or_cancel(orchestrator, &id).await?;
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    if json {
        print_json(&done)?;
    } else {
        print_execution(&done);
    }

    match done.status {
        ExecutionStatus::Completed => Ok(()),
        status => anyhow::bail!("execution {id} finished as {status}"),
    }
}

async fn wait_or_cancel(orchestrator: &Orchestrator, id: &Uuid) -> Result<AgentTraceExecution> {
    let wait = orchestrator.wait_for_completion(id);
    tokio::pin!(wait);

    tokio::select! {
        result = &mut wait => return Ok(result?),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            eprintln!("  {} cancelling at the next batch boundary...", style("!").yellow().bold());
            match orchestrator.cancel(id).await {
                Ok(()) | Err(TraceError::InvalidState { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(wait.await?)
}

/// One progress line per lifecycle event; `None` for events not shown.
pub fn progress_line(event: &TraceEvent) -> Option<String> {
    let line = match event {
        TraceEvent::StepStarted {
            step_id, kind, batch, ..
        } => format!("  {} {step_id} ({kind}, batch {batch})", style(">").blue()),
        TraceEvent::StepCompleted {
            step_id,
            duration_ms,
            cache_hit,
            ..
        } => {
            let cached = if *cache_hit { " [cached]" } else { "" };
            format!(
                "  {} {step_id} {}{cached}",
                style("✓").green(),
                format_duration_ms(*duration_ms)
            )
        }
        TraceEvent::StepFailed { step_id, error, .. } => {
            format!("  {} {step_id}: {}", style("✗").red(), style(error).red())
        }
        TraceEvent::ExecutionPaused { .. } => format!("  {} paused", style("||").cyan()),
        TraceEvent::ExecutionResumed { .. } => format!("  {} resumed", style(">>").cyan()),
        TraceEvent::ExecutionCancelled { .. } => format!("  {} cancelled", style("!").yellow()),
        TraceEvent::ExecutionStarted { .. }
        | TraceEvent::ExecutionCompleted { .. }
        | TraceEvent::ExecutionFailed { .. } => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrace_types::trace::StepKind;

    #[test]
    fn progress_lines_for_step_events() {
        console::set_colors_enabled(false);
        let execution_id = Uuid::now_v7();

        let started = TraceEvent::StepStarted {
            execution_id,
            step_id: "fetch".into(),
            kind: StepKind::ApiCall,
            batch: 2,
        };
        assert_eq!(progress_line(&started).unwrap(), "  > fetch (api_call, batch 2)");

        let done = TraceEvent::StepCompleted {
            execution_id,
            step_id: "fetch".into(),
            duration_ms: 1_500,
            cache_hit: true,
        };
        assert_eq!(progress_line(&done).unwrap(), "  ✓ fetch 1.5s [cached]");

        let finished = TraceEvent::ExecutionFailed {
            execution_id,
            error: "steps failed: fetch".into(),
        };
        assert!(progress_line(&finished).is_none());
    }
}
