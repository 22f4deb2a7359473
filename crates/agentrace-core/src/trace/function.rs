//! Named-function registry for `custom` steps.

use std::future::Future;
use std::sync::Arc;

use agentrace_types::error::CollaboratorError;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;

/// A callable registered under a name.
///
/// `args` are the step's configured arguments with templates resolved;
/// `input` is the step input (`{"input": .., "steps": {..}}`).
pub trait CustomFunction: Send + Sync {
    fn call(&self, args: Value, input: Value) -> BoxFuture<'static, Result<Value, CollaboratorError>>;
}

struct FnFunction<F>(F);

impl<F, Fut> CustomFunction for FnFunction<F>
where
    F: Fn(Value, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CollaboratorError>> + Send + 'static,
{
    fn call(&self, args: Value, input: Value) -> BoxFuture<'static, Result<Value, CollaboratorError>> {
        Box::pin((self.0)(args, input))
    }
}

/// Name -> function map. Registration is allowed at any time.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<dyn CustomFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `echo` function, which returns its args.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_fn("echo", |args, _input| async move { Ok(args) });
        registry
    }

    /// Register (or replace) a function.
    pub fn register(&self, name: impl Into<String>, function: Arc<dyn CustomFunction>) {
        self.functions.insert(name.into(), function);
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CollaboratorError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnFunction(f)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomFunction>> {
        self.functions.get(name).map(|f| Arc::clone(f.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closures_are_callable_by_name() {
        let registry = FunctionRegistry::with_builtins();
        registry.register_fn("double", |args, _input| async move {
            match args["n"].as_i64() {
                Some(n) => Ok(json!(n * 2)),
                None => Err(CollaboratorError::Function("n must be an integer".into())),
            }
        });

        assert_eq!(registry.names(), vec!["double".to_string(), "echo".to_string()]);

        let double = registry.get("double").unwrap();
        assert_eq!(double.call(json!({"n": 21}), Value::Null).await.unwrap(), json!(42));
        assert!(double.call(json!({}), Value::Null).await.is_err());

        let echo = registry.get("echo").unwrap();
        assert_eq!(echo.call(json!([1]), Value::Null).await.unwrap(), json!([1]));
        assert!(registry.get("missing").is_none());
    }
}
