//! JEXL condition evaluator for conditional steps.
//!
//! Conditions are restricted to equality checks (`==`, `!=`), the `length`
//! transform and boolean logic (`&&`, `||`, parentheses) over paths in
//! the step scope. [`check_grammar`] rejects everything else before the
//! expression reaches `jexl_eval`, so relational operators, arithmetic,
//! ternaries, `in` and other transforms never evaluate.
//!
//! **Security note:** step data is always passed as the context object,
//! never interpolated into the expression string.

use serde_json::{Value, json};

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("unsupported expression: {0}")]
    Unsupported(String),

    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

/// Transforms a condition may apply with `|name`.
const TRANSFORMS: &[&str] = &["length"];

fn unsupported(message: String) -> ExpressionError {
    ExpressionError::Unsupported(message)
}

/// Reject anything outside the condition grammar.
///
/// Quoted strings are skipped, so operators inside literals are fine.
pub fn check_grammar(expression: &str) -> Result<(), ExpressionError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                i += 1;
                while i < chars.len() && chars[i] != c {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                prev = Some(c);
            }
            '=' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(unsupported("'=' is not an operator, use '=='".to_string()));
                }
                i += 2;
                prev = Some('=');
            }
            '!' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(unsupported("'!' is only valid as '!='".to_string()));
                }
                i += 2;
                prev = Some('=');
            }
            '&' => {
                if chars.get(i + 1) != Some(&'&') {
                    return Err(unsupported("operator '&' is not allowed".to_string()));
                }
                i += 2;
                prev = Some('&');
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                i += 2;
                prev = Some('|');
            }
            '|' => {
                i += 1;
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }
                let name: String = chars[i..]
                    .iter()
                    .take_while(|ch| ch.is_alphanumeric() || **ch == '_')
                    .collect();
                if !TRANSFORMS.contains(&name.as_str()) {
                    return Err(unsupported(format!("transform '{name}' is not allowed")));
                }
                i += name.chars().count();
                prev = name.chars().last();
            }
            '<' | '>' | '+' | '-' | '*' | '/' | '%' | '^' | '?' => {
                return Err(unsupported(format!(
                    "operator '{c}' is not allowed, only '==', '!=', '&&', '||' and '|length'"
                )));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let word: String = chars[i..]
                    .iter()
                    .take_while(|ch| ch.is_alphanumeric() || **ch == '_' || **ch == '$')
                    .collect();
                if word == "in" && prev != Some('.') {
                    return Err(unsupported("operator 'in' is not allowed".to_string()));
                }
                i += word.chars().count();
                prev = word.chars().last();
            }
            c if c.is_whitespace() => i += 1,
            c => {
                i += 1;
                prev = Some(c);
            }
        }
    }
    Ok(())
}

/// Stateless evaluator; a fresh JEXL evaluator is built per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn evaluator() -> jexl_eval::Evaluator<'static> {
        jexl_eval::Evaluator::new().with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
    }

    /// Evaluate an expression and coerce the result to a boolean.
    ///
    /// The context must be a JSON object. Coercion follows JavaScript-like
    /// truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Ok(truthy(&result))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        check_grammar(expression)?;
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        Self::evaluator()
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
