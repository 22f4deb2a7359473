//! `agentrace metrics`: aggregate statistics for one template.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use agentrace_infra::llm::format_cost;
use agentrace_types::metrics::{ExecutionMetrics, TimeRange};

use super::output::{format_duration_ms, print_json};
use crate::state::AppState;

pub async fn handle_metrics(workflow_id: &Uuid, range: Option<TimeRange>, state: &AppState, json: bool) -> Result<()> {
    let metrics = state.orchestrator.get_metrics(workflow_id, range).await?;

    if json {
        return print_json(&metrics);
    }

    let window = range.map_or_else(|| "all time".to_string(), |r| format!("last {r}"));
    println!();
    println!(
        "  {} for {} ({window})",
        style("Metrics").bold(),
        style(workflow_id).cyan()
    );

    if metrics.total_executions == 0 {
        println!();
        println!("  No executions in this window.");
        println!();
        return Ok(());
    }

    print_summary(&metrics);
    print_steps(&metrics);
    print_errors(&metrics);
    Ok(())
}

fn print_summary(m: &ExecutionMetrics) {
    println!();
    println!(
        "  Executions: {} ({} completed, {} failed)",
        m.total_executions, m.completed_executions, m.failed_executions
    );
    println!(
        "  Success:    {:.1}%   Errors: {:.1}%",
        m.success_rate, m.error_rate
    );
    println!(
        "  Averages:   {}  {}  {:.0} tokens",
        format_duration_ms(m.average_duration_ms.round() as u64),
        format_cost(m.average_cost),
        m.average_tokens
    );
    println!("  Cache hits: {:.1}%", m.cache_hit_rate);
}

fn print_steps(m: &ExecutionMetrics) {
    if m.step_performance.is_empty() {
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Runs"),
            Cell::new("Success"),
            Cell::new("Avg duration"),
            Cell::new("Avg cost"),
        ]);
    for step in &m.step_performance {
        table.add_row(vec![
            Cell::new(&step.step_name),
            Cell::new(step.executions),
            Cell::new(format!("{:.1}%", step.success_rate)),
            Cell::new(format_duration_ms(step.average_duration_ms.round() as u64)),
            Cell::new(format_cost(step.average_cost)),
        ]);
    }
    println!();
    println!("{table}");

    if !m.daily_trends.is_empty() {
        let mut days = Table::new();
        days.load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Day").fg(Color::Cyan),
                Cell::new("Runs"),
                Cell::new("Success"),
                Cell::new("Avg duration"),
                Cell::new("Avg cost"),
            ]);
        for day in &m.daily_trends {
            days.add_row(vec![
                Cell::new(day.date),
                Cell::new(day.executions),
                Cell::new(format!("{:.1}%", day.success_rate)),
                Cell::new(format_duration_ms(day.average_duration_ms.round() as u64)),
                Cell::new(format_cost(day.average_cost)),
            ]);
        }
        println!();
        println!("{days}");
    }
}

fn print_errors(m: &ExecutionMetrics) {
    if m.top_errors.is_empty() {
        println!();
        return;
    }
    println!();
    println!("  {}", style("Top errors").red().bold());
    for error in &m.top_errors {
        println!("  {:>4}x  {}", error.count, error.message);
    }
    println!();
}
