//! `agentrace template` subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use agentrace_core::trace::load_template_file;

use super::TemplateCommand;
use super::output::print_json;
use crate::state::AppState;

pub async fn handle_template_command(cmd: TemplateCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        TemplateCommand::Register { file, owner } => handle_register(&file, owner, state, json).await,
        TemplateCommand::List { owner } => handle_list(&owner, state, json).await,
        TemplateCommand::Show { id } => handle_show(&id, state, json).await,
    }
}

async fn handle_register(file: &Path, owner: Option<String>, state: &AppState, json: bool) -> Result<()> {
    let mut template = load_template_file(file)
        .with_context(|| format!("Failed to load template {}", file.display()))?;
    if let Some(owner) = owner {
        template.owner_id = owner;
    }
    anyhow::ensure!(
        !template.owner_id.is_empty(),
        "Template has no owner; set owner_id in the file or pass --owner"
    );

    let registered = state.orchestrator.register_template(template).await?;

    if json {
        return print_json(&serde_json::json!({
            "id": registered.id.to_string(),
            "name": registered.name,
            "version": registered.version,
            "owner_id": registered.owner_id,
            "steps": registered.steps.len(),
        }));
    }

    println!();
    println!(
        "  {} Registered template '{}' v{}",
        style("*").green().bold(),
        style(&registered.name).cyan(),
        registered.version
    );
    println!("  ID:    {}", registered.id);
    println!("  Owner: {}", registered.owner_id);
    println!("  Steps: {}", registered.steps.len());
    println!();
    println!(
        "  Run it with: {}",
        style(format!("agentrace run {} --owner {}", registered.id, registered.owner_id)).dim()
    );
    println!();
    Ok(())
}

async fn handle_list(owner: &str, state: &AppState, json: bool) -> Result<()> {
    let templates = state.orchestrator.list_templates(owner).await;

    if json {
        let out: Vec<_> = templates
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id.to_string(),
                    "name": t.name,
                    "version": t.version,
                    "steps": t.steps.len(),
                    "created_at": t.created_at.to_rfc3339(),
                })
            })
            .collect();
        return print_json(&out);
    }

    if templates.is_empty() {
        println!();
        println!("  No templates registered for '{owner}'.");
        println!(
            "  Register one with: {}",
            style("agentrace template register <file.yaml> --owner <owner>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Version"),
            Cell::new("Steps"),
            Cell::new("Created"),
        ]);
    for t in &templates {
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(&t.name),
            Cell::new(&t.version),
            Cell::new(t.steps.len()),
            Cell::new(t.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let template = state.orchestrator.get_template(id).await?;

    if json {
        return print_json(template.as_ref());
    }

    println!();
    println!(
        "  {} v{}",
        style(&template.name).cyan().bold(),
        template.version
    );
    if let Some(description) = &template.description {
        println!("  {}", style(description).dim());
    }
    println!("  ID:    {}", template.id);
    println!("  Owner: {}", template.owner_id);
    if let Some(parallelism) = template.settings.parallelism {
        println!("  Parallelism: {parallelism}");
    }
    if !template.variables.is_empty() {
        let names: Vec<&str> = template.variables.keys().map(String::as_str).collect();
        println!("  Variables: {}", names.join(", "));
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Kind"),
            Cell::new("Depends on"),
        ]);
    for step in &template.steps {
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(&step.name),
            Cell::new(step.config.kind().to_string()),
            Cell::new(step.dependencies.join(", ")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
