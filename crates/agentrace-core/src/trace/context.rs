//! Data visible to a running step.
//!
//! A step sees the execution input, the resolved variables and the outputs
//! of its declared dependencies. Templates, conditional expressions and data
//! operations all address that data through one JSON scope:
//!
//! ```json
//! {
//!   "input": <execution input>,
//!   "variables": { ... },
//!   "steps": { "<dep_id>": { "output": <value> }, ... }
//! }
//! ```

use serde_json::{Map, Value, json};

/// Inputs of one step dispatch.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub input: Value,
    pub variables: Value,
    /// Outputs of the step's declared dependencies, keyed by step id.
    pub dependency_outputs: Map<String, Value>,
}

impl StepContext {
    pub fn new(input: Value, variables: Value, dependency_outputs: Map<String, Value>) -> Self {
        Self {
            input,
            variables,
            dependency_outputs,
        }
    }

    /// The input recorded on the step and hashed into its cache key.
    pub fn step_input(&self) -> Value {
        json!({
            "input": self.input,
            "steps": self.dependency_outputs,
        })
    }

    /// The scope templates, expressions and data operations resolve against.
    pub fn scope(&self) -> Value {
        let steps: Map<String, Value> = self
            .dependency_outputs
            .iter()
            .map(|(id, output)| (id.clone(), json!({ "output": output })))
            .collect();
        json!({
            "input": self.input,
            "variables": self.variables,
            "steps": steps,
        })
    }

    /// Replace `{{ path }}` markers with values from the scope.
    ///
    /// Paths are dotted (`input.user.name`, `steps.fetch.output`,
    /// `variables.limit`). Unknown references are left as-is.
    pub fn resolve_template(&self, template: &str) -> String {
        resolve_against(template, &self.scope())
    }

    /// Resolve templates inside every string of a JSON value.
    ///
    /// A string that is exactly one marker is replaced by the referenced
    /// value itself, keeping its JSON type.
    pub fn resolve_value(&self, value: &Value) -> Value {
        let scope = self.scope();
        resolve_value_against(value, &scope)
    }
}

fn resolve_value_against(value: &Value, scope: &Value) -> Value {
    match value {
        Value::String(s) => {
            if let Some(path) = sole_marker(s) {
                if let Some(found) = lookup_path(scope, path) {
                    return found.clone();
                }
            }
            Value::String(resolve_against(s, scope))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value_against(v, scope))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value_against(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn sole_marker(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    (!inner.contains("{{") && !inner.contains("}}")).then(|| inner.trim())
}

fn resolve_against(template: &str, scope: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        let path = rest[start + 2..end - 2].trim();

        out.push_str(&rest[..start]);
        match lookup_path(scope, path) {
            Some(value) => out.push_str(&value_to_string(value)),
            None => out.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

/// Look up a dotted path (`a.b.0.c`) in a JSON value.
///
/// Numeric segments index arrays. An empty path returns the value itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Convert a JSON value to a display string for template resolution.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> StepContext {
        let mut deps = Map::new();
        deps.insert("fetch".to_string(), json!({ "items": [1, 2, 3], "title": "news" }));
        StepContext::new(
            json!({ "user": { "name": "Ada" } }),
            json!({ "limit": 5 }),
            deps,
        )
    }

    #[test]
    fn step_input_has_input_and_dependency_outputs() {
        let input = context().step_input();
        assert_eq!(input["input"]["user"]["name"], "Ada");
        assert_eq!(input["steps"]["fetch"]["title"], "news");
        assert!(input.get("variables").is_none());
    }

    #[test]
    fn resolve_input_variable_and_step_references() {
        let ctx = context();
        let out = ctx.resolve_template(
            "Hi {{ input.user.name }}, top {{variables.limit}} of {{ steps.fetch.output.title }}",
        );
        assert_eq!(out, "Hi Ada, top 5 of news");
    }

    #[test]
    fn unknown_reference_left_intact() {
        let ctx = context();
        let out = ctx.resolve_template("x {{ steps.missing.output }} y {{ input.user.name }}");
        assert_eq!(out, "x {{ steps.missing.output }} y Ada");
    }

    #[test]
    fn unterminated_marker_left_intact() {
        let ctx = context();
        assert_eq!(ctx.resolve_template("a {{ input.user"), "a {{ input.user");
    }

    #[test]
    fn objects_render_as_compact_json() {
        let ctx = context();
        assert_eq!(ctx.resolve_template("{{ steps.fetch.output.items }}"), "[1,2,3]");
    }

    #[test]
    fn resolve_value_keeps_types_for_sole_markers() {
        let ctx = context();
        let body = json!({
            "items": "{{ steps.fetch.output.items }}",
            "greeting": "hello {{ input.user.name }}",
            "n": 1,
        });
        let resolved = ctx.resolve_value(&body);
        assert_eq!(resolved["items"], json!([1, 2, 3]));
        assert_eq!(resolved["greeting"], "hello Ada");
        assert_eq!(resolved["n"], 1);
    }

    #[test]
    fn lookup_path_indexes_arrays() {
        let value = json!({ "a": [{ "b": 7 }] });
        assert_eq!(lookup_path(&value, "a.0.b"), Some(&json!(7)));
        assert_eq!(lookup_path(&value, "a.1.b"), None);
        assert_eq!(lookup_path(&value, ""), Some(&value));
    }
}
