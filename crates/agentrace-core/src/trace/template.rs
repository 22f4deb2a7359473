//! Template parsing, validation and variable resolution.
//!
//! Templates are authored as YAML (or JSON through the same serde model) and
//! validated before the store accepts them. Loading a file runs exactly the
//! same checks as `TemplateStore::register`.

use std::collections::HashSet;
use std::path::Path;

use agentrace_types::trace::{
    StepConfig, StepKind, StepTemplate, TriggerDefinition, WorkflowTemplate,
};
use serde_json::{Map, Value};

use super::dag::validate_graph;
use super::error::TraceError;
use super::expression::check_grammar;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowTemplate`.
pub fn parse_template_yaml(yaml: &str) -> Result<WorkflowTemplate, TraceError> {
    let template: WorkflowTemplate = serde_yaml_ng::from_str(yaml)
        .map_err(|e| TraceError::validation(format!("invalid template yaml: {e}")))?;
    validate_template(&template)?;
    Ok(template)
}

/// Serialize a template back to YAML.
pub fn serialize_template_yaml(template: &WorkflowTemplate) -> Result<String, TraceError> {
    serde_yaml_ng::to_string(template).map_err(|e| TraceError::Internal(e.to_string()))
}

/// Load and validate a template from a YAML file.
pub fn load_template_file(path: &Path) -> Result<WorkflowTemplate, TraceError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TraceError::validation(format!("cannot read template file {}: {e}", path.display()))
    })?;
    parse_template_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a template.
///
/// Checks:
/// - Name is non-empty and the version parses as semver
/// - At least one step exists
/// - Step ids are unique, dependencies are known and acyclic
/// - Condition branch ids refer to existing steps
/// - Conditions appear only on conditional steps, which need an expression
/// - Kind-specific required fields are non-empty
/// - Parallelism >= 1 and timeout > 0 when set
/// - Trigger fields are non-empty
pub fn validate_template(template: &WorkflowTemplate) -> Result<(), TraceError> {
    if template.name.trim().is_empty() {
        return Err(TraceError::validation("template name must not be empty"));
    }

    semver::Version::parse(&template.version).map_err(|e| {
        TraceError::validation(format!(
            "template version '{}' is not valid semver: {e}",
            template.version
        ))
    })?;

    if template.steps.is_empty() {
        return Err(TraceError::validation(
            "template must have at least one step",
        ));
    }

    validate_graph(&template.steps)?;

    let ids: HashSet<&str> = template.steps.iter().map(|s| s.id.as_str()).collect();
    for step in &template.steps {
        if step.id.trim().is_empty() {
            return Err(TraceError::validation("step id must not be empty"));
        }
        validate_condition(step, &ids)?;
        validate_config(&step.id, &step.config)?;
    }

    if let Some(p) = template.settings.parallelism {
        if p < 1 {
            return Err(TraceError::validation("parallelism must be >= 1"));
        }
    }

    if let Some(t) = template.settings.timeout_secs {
        if t == 0 {
            return Err(TraceError::validation("timeout must be > 0"));
        }
    }

    if let Some(retry) = &template.settings.retry_policy {
        if retry.max_attempts == 0 {
            return Err(TraceError::validation(
                "retry_policy.max_attempts must be >= 1",
            ));
        }
    }

    for (name, spec) in &template.variables {
        if let Some(default) = &spec.default {
            if !spec.var_type.accepts(default) {
                return Err(TraceError::validation(format!(
                    "default of variable '{name}' does not match its declared type"
                )));
            }
        }
    }

    for trigger in &template.triggers {
        validate_trigger(trigger)?;
    }

    Ok(())
}

fn validate_condition(step: &StepTemplate, ids: &HashSet<&str>) -> Result<(), TraceError> {
    let config_expression = match &step.config {
        StepConfig::Conditional(cfg) => cfg.expression.as_deref(),
        _ => None,
    };

    let expressions = config_expression
        .into_iter()
        .chain(step.condition.as_ref().map(|c| c.expression.as_str()))
        .filter(|e| !e.trim().is_empty());
    for expression in expressions {
        check_grammar(expression).map_err(|e| {
            TraceError::validation(format!("conditional step '{}': {e}", step.id))
        })?;
    }

    let Some(condition) = &step.condition else {
        if step.kind() == StepKind::Conditional && blank(config_expression) {
            return Err(TraceError::validation(format!(
                "conditional step '{}' has no expression",
                step.id
            )));
        }
        return Ok(());
    };

    if step.kind() != StepKind::Conditional {
        return Err(TraceError::validation(format!(
            "step '{}' of type {} cannot declare a condition",
            step.id,
            step.kind()
        )));
    }

    if blank(config_expression) && condition.expression.trim().is_empty() {
        return Err(TraceError::validation(format!(
            "conditional step '{}' has no expression",
            step.id
        )));
    }

    for branch in condition.then_id.iter().chain(condition.else_id.iter()) {
        if !ids.contains(branch.as_str()) {
            return Err(TraceError::validation(format!(
                "conditional step '{}' references unknown step '{}'",
                step.id, branch
            )));
        }
    }

    Ok(())
}

fn blank(expression: Option<&str>) -> bool {
    expression.is_none_or(|e| e.trim().is_empty())
}

fn validate_config(step_id: &str, config: &StepConfig) -> Result<(), TraceError> {
    let missing = |field: &str| {
        Err(TraceError::validation(format!(
            "step '{step_id}' requires a non-empty {field}"
        )))
    };

    match config {
        StepConfig::LlmCall(cfg) => {
            if cfg.model.trim().is_empty() {
                return missing("model");
            }
            if cfg.prompt.trim().is_empty() {
                return missing("prompt");
            }
        }
        StepConfig::ApiCall(cfg) => {
            if cfg.endpoint.trim().is_empty() {
                return missing("endpoint");
            }
            if cfg.timeout_secs == Some(0) {
                return Err(TraceError::validation(format!(
                    "step '{step_id}' api timeout must be > 0"
                )));
            }
        }
        StepConfig::Custom(cfg) => {
            if cfg.function.trim().is_empty() {
                return missing("function name");
            }
        }
        StepConfig::Parallel(cfg) => {
            if cfg.tasks.is_empty() {
                return missing("task list");
            }
            if cfg.max_concurrency == Some(0) {
                return Err(TraceError::validation(format!(
                    "step '{step_id}' max_concurrency must be >= 1"
                )));
            }
            for task in &cfg.tasks {
                validate_config(&format!("{step_id}/{}", task.name), &task.config)?;
            }
        }
        StepConfig::DataProcessing(_) | StepConfig::Conditional(_) => {}
    }
    Ok(())
}

fn validate_trigger(trigger: &TriggerDefinition) -> Result<(), TraceError> {
    let (kind, value) = match trigger {
        TriggerDefinition::Manual {} => return Ok(()),
        TriggerDefinition::Schedule { cron } => ("schedule trigger cron", cron),
        TriggerDefinition::Webhook { path } => ("webhook trigger path", path),
        TriggerDefinition::Event { event_type } => ("event trigger event_type", event_type),
    };
    if value.trim().is_empty() {
        return Err(TraceError::validation(format!("{kind} must not be empty")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Variables and estimates
// ---------------------------------------------------------------------------

/// Merge caller variables over the template's declared defaults.
///
/// Fails when a required variable is missing or a value does not match its
/// declared type. Undeclared variables pass through untouched.
pub fn resolve_variables(
    template: &WorkflowTemplate,
    provided: &Map<String, Value>,
) -> Result<Value, TraceError> {
    let mut resolved = provided.clone();

    for (name, spec) in &template.variables {
        match resolved.get(name) {
            Some(value) if !value.is_null() => {
                if !spec.var_type.accepts(value) {
                    return Err(TraceError::validation(format!(
                        "variable '{name}' must be of type {:?}",
                        spec.var_type
                    )));
                }
            }
            _ => match &spec.default {
                Some(default) => {
                    resolved.insert(name.clone(), default.clone());
                }
                None if spec.required => {
                    return Err(TraceError::validation(format!(
                        "missing required variable '{name}'"
                    )));
                }
                None => {}
            },
        }
    }

    Ok(Value::Object(resolved))
}

/// Token allotment to reserve for one run of the template.
///
/// Sums `max_tokens` over every model call, including those nested in
/// parallel steps, using `default_max_tokens` where unset.
pub fn estimate_tokens(template: &WorkflowTemplate, default_max_tokens: u32) -> u64 {
    fn config_estimate(config: &StepConfig, default_max_tokens: u32) -> u64 {
        match config {
            StepConfig::LlmCall(cfg) => u64::from(cfg.max_tokens.unwrap_or(default_max_tokens)),
            StepConfig::Parallel(cfg) => cfg
                .tasks
                .iter()
                .map(|t| config_estimate(&t.config, default_max_tokens))
                .sum(),
            _ => 0,
        }
    }

    template
        .steps
        .iter()
        .map(|s| config_estimate(&s.config, default_max_tokens))
        .sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
