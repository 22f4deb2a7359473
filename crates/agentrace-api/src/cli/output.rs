//! Shared terminal rendering for executions.

use agentrace_infra::llm::format_cost;
use agentrace_types::trace::{AgentTraceExecution, ExecutionStatus, StepStatus};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

/// Print any serializable value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

pub fn styled_status(status: ExecutionStatus) -> String {
    let text = status.to_string();
    match status {
        ExecutionStatus::Completed => style(text).green().to_string(),
        ExecutionStatus::Failed => style(text).red().to_string(),
        ExecutionStatus::Cancelled => style(text).yellow().to_string(),
        ExecutionStatus::Paused => style(text).cyan().to_string(),
        ExecutionStatus::Running => style(text).blue().to_string(),
    }
}

fn step_status_cell(status: StepStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        StepStatus::Completed => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::Running => cell.fg(Color::Blue),
        StepStatus::Skipped => cell.fg(Color::Yellow),
        StepStatus::Pending => cell.fg(Color::DarkGrey),
    }
}

/// Header block plus one row per step.
pub fn print_execution(execution: &AgentTraceExecution) {
    println!();
    println!(
        "  {} '{}' {}",
        style("Execution").bold(),
        style(&execution.name).cyan(),
        styled_status(execution.status)
    );
    println!("  ID:       {}", execution.id);
    println!("  Template: {}", execution.template_id);
    println!("  Owner:    {}", execution.owner_id);
    println!("  Started:  {}", execution.start_time.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(ms) = execution.duration_ms {
        println!("  Duration: {}", format_duration_ms(ms));
    }
    println!(
        "  Cost:     {}  Tokens: {}  Cache hits: {:.0}%",
        format_cost(execution.metadata.total_cost),
        execution.metadata.total_tokens,
        execution.metadata.cache_hit_rate
    );
    if let Some(error) = &execution.error {
        println!("  Error:    {}", style(error).red());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Tokens"),
            Cell::new("Cost"),
            Cell::new("Cache"),
            Cell::new("Error"),
        ]);

    for step in &execution.steps {
        let cache = match step.metadata.cache_hit {
            Some(true) => "hit",
            Some(false) => "miss",
            None => "-",
        };
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(step.kind().to_string()),
            step_status_cell(step.status),
            Cell::new(step.duration_ms.map(format_duration_ms).unwrap_or_else(|| "-".into())),
            Cell::new(step.metadata.tokens),
            Cell::new(format_cost(step.metadata.cost)),
            Cell::new(cache),
            Cell::new(step.error.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration_ms(250), "250ms");
        assert_eq!(format_duration_ms(1_500), "1.5s");
        assert_eq!(format_duration_ms(125_000), "2m05s");
    }
}
