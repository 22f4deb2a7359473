//! Named data operations for `data_processing` steps.
//!
//! Every operation reads from the step scope (see [`super::context`]) using
//! dotted paths, e.g. `input.rows` or `steps.fetch.output.items`.

use agentrace_types::trace::{AggregateFunction, DataOperation};
use serde_json::{Map, Value, json};

use super::context::lookup_path;
use super::error::StepError;

/// Apply a data operation to the step scope.
pub fn apply(operation: &DataOperation, scope: &Value) -> Result<Value, StepError> {
    match operation {
        DataOperation::Transform { mapping } => {
            let out: Map<String, Value> = mapping
                .iter()
                .map(|(key, path)| {
                    let value = lookup_path(scope, path).cloned().unwrap_or(Value::Null);
                    (key.clone(), value)
                })
                .collect();
            Ok(Value::Object(out))
        }
        DataOperation::Validate { required } => {
            let missing: Vec<&str> = required
                .iter()
                .filter(|path| lookup_path(scope, path).is_none_or(Value::is_null))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                Ok(json!({ "valid": true, "checked": required }))
            } else {
                Err(StepError::Data(format!(
                    "missing required fields: {}",
                    missing.join(", ")
                )))
            }
        }
        DataOperation::Aggregate {
            source,
            field,
            function,
        } => {
            let items = source_array(scope, source)?;
            let value = aggregate(items, field.as_deref(), *function);
            Ok(json!({ "function": function, "value": value, "count": items.len() }))
        }
        DataOperation::Filter {
            source,
            field,
            equals,
        } => {
            let items = source_array(scope, source)?;
            let kept: Vec<Value> = items
                .iter()
                .filter(|item| lookup_path(item, field).is_some_and(|v| json_eq(v, equals)))
                .cloned()
                .collect();
            Ok(Value::Array(kept))
        }
    }
}

fn source_array<'a>(scope: &'a Value, source: &str) -> Result<&'a Vec<Value>, StepError> {
    match lookup_path(scope, source) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(StepError::Data(format!(
            "'{source}' is not an array (found {})",
            type_name(other)
        ))),
        None => Err(StepError::Data(format!("'{source}' not found"))),
    }
}

fn aggregate(items: &[Value], field: Option<&str>, function: AggregateFunction) -> Value {
    if function == AggregateFunction::Count {
        return json!(items.len());
    }

    let numbers: Vec<f64> = items
        .iter()
        .filter_map(|item| match field {
            Some(path) => lookup_path(item, path),
            None => Some(item),
        })
        .filter_map(Value::as_f64)
        .collect();

    match function {
        AggregateFunction::Count => json!(items.len()),
        AggregateFunction::Sum => json!(numbers.iter().sum::<f64>()),
        AggregateFunction::Avg if numbers.is_empty() => Value::Null,
        AggregateFunction::Avg => json!(numbers.iter().sum::<f64>() / numbers.len() as f64),
        AggregateFunction::Min => numbers
            .iter()
            .copied()
            .reduce(f64::min)
            .map_or(Value::Null, |v| json!(v)),
        AggregateFunction::Max => numbers
            .iter()
            .copied()
            .reduce(f64::max)
            .map_or(Value::Null, |v| json!(v)),
    }
}

/// Equality that treats `3` and `3.0` as equal.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scope() -> Value {
        json!({
            "input": {
                "user": { "id": 7, "email": "a@example.com" },
                "rows": [
                    { "region": "eu", "amount": 10 },
                    { "region": "us", "amount": 5.5 },
                    { "region": "eu", "amount": 2 },
                    { "region": "eu" },
                ],
            },
            "variables": {},
            "steps": {},
        })
    }

    #[test]
    fn transform_projects_paths() {
        let mut mapping = BTreeMap::new();
        mapping.insert("id".to_string(), "input.user.id".to_string());
        mapping.insert("missing".to_string(), "input.user.phone".to_string());
        let out = apply(&DataOperation::Transform { mapping }, &scope()).unwrap();
        assert_eq!(out, json!({ "id": 7, "missing": null }));
    }

    #[test]
    fn validate_reports_missing_fields() {
        let op = DataOperation::Validate {
            required: vec!["input.user.email".into(), "input.user.phone".into()],
        };
        let err = apply(&op, &scope()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "data processing failed: missing required fields: input.user.phone"
        );

        let ok = DataOperation::Validate {
            required: vec!["input.user.email".into()],
        };
        assert_eq!(apply(&ok, &scope()).unwrap()["valid"], true);
    }

    #[test]
    fn aggregate_functions_skip_non_numeric() {
        let run = |function| {
            apply(
                &DataOperation::Aggregate {
                    source: "input.rows".into(),
                    field: Some("amount".into()),
                    function,
                },
                &scope(),
            )
            .unwrap()["value"]
                .clone()
        };
        assert_eq!(run(AggregateFunction::Count), json!(4));
        assert_eq!(run(AggregateFunction::Sum), json!(17.5));
        assert_eq!(run(AggregateFunction::Min), json!(2.0));
        assert_eq!(run(AggregateFunction::Max), json!(10.0));
        let avg = run(AggregateFunction::Avg).as_f64().unwrap();
        assert!((avg - 17.5 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_empty_average_is_null() {
        let scope = json!({ "input": { "rows": [] } });
        let out = apply(
            &DataOperation::Aggregate {
                source: "input.rows".into(),
                field: None,
                function: AggregateFunction::Avg,
            },
            &scope,
        )
        .unwrap();
        assert_eq!(out["value"], Value::Null);
    }

    #[test]
    fn filter_keeps_matching_items() {
        let out = apply(
            &DataOperation::Filter {
                source: "input.rows".into(),
                field: "region".into(),
                equals: json!("eu"),
            },
            &scope(),
        )
        .unwrap();
        assert_eq!(out.as_array().unwrap().len(), 3);

        let by_amount = apply(
            &DataOperation::Filter {
                source: "input.rows".into(),
                field: "amount".into(),
                equals: json!(10.0),
            },
            &scope(),
        )
        .unwrap();
        assert_eq!(by_amount.as_array().unwrap().len(), 1);
    }

    #[test]
    fn non_array_source_fails() {
        let err = apply(
            &DataOperation::Filter {
                source: "input.user".into(),
                field: "id".into(),
                equals: json!(7),
            },
            &scope(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("is not an array (found object)"));
    }
}
