//! Stub collaborators and builders shared by the trace tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentrace_types::error::{CollaboratorError, PersistenceError};
use agentrace_types::llm::{ModelRequest, ModelResponse, TokenUsage};
use agentrace_types::trace::{
    CustomConfig, LlmCallConfig, StepConfig, StepTemplate, TemplateSettings, WorkflowTemplate,
};
use chrono::Utc;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::http::{BoxHttpCaller, HttpCaller, HttpRequest, HttpResponse};
use crate::llm::{BoxModelInvoker, ModelInvoker, PricingLookup};
use crate::storage::PersistenceAdapter;

use super::cache::StepCache;
use super::function::FunctionRegistry;
use super::step_executor::{StepCollaborators, StepExecutor};

// ---------------------------------------------------------------------------
// Model invoker
// ---------------------------------------------------------------------------

/// Echoes the prompt back; 10 input + 20 output tokens per call.
pub struct StubInvoker {
    calls: Arc<AtomicUsize>,
    fail: bool,
    delay: Duration,
}

impl StubInvoker {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ModelInvoker for StubInvoker {
    fn name(&self) -> &str {
        "stub"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(CollaboratorError::Provider("scripted failure".to_string()));
        }
        Ok(ModelResponse {
            text: format!("echo: {}", request.prompt),
            model: "stub-model".to_string(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
            attempts: 1,
        })
    }
}

/// $0.001 per token.
pub struct FixedPricing;

impl PricingLookup for FixedPricing {
    fn cost(&self, _provider: &str, _model: &str, usage: &TokenUsage) -> f64 {
        usage.total() as f64 * 0.001
    }
}

// ---------------------------------------------------------------------------
// HTTP caller
// ---------------------------------------------------------------------------

/// Returns a fixed status and body, recording every request.
pub struct StubHttp {
    status: u16,
    body: Value,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl StubHttp {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Value::Null)
        }
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<HttpRequest>>> {
        Arc::clone(&self.requests)
    }
}

impl HttpCaller for StubHttp {
    async fn call(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        self.requests.lock().unwrap().push(request.clone());
        if !(200..300).contains(&self.status) {
            return Err(CollaboratorError::Status {
                status: self.status,
                body: "scripted".to_string(),
            });
        }
        Ok(HttpResponse {
            status: self.status,
            body: self.body.clone(),
            attempts: 1,
        })
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Persistence adapter whose every call fails.
pub struct FailingPersistence;

impl PersistenceAdapter for FailingPersistence {
    async fn get(&self, _key: &str) -> Result<Option<Value>, PersistenceError> {
        Err(PersistenceError::Connection("scripted outage".to_string()))
    }

    async fn put(&self, _key: &str, _value: &Value, _ttl_secs: u64) -> Result<(), PersistenceError> {
        Err(PersistenceError::Connection("scripted outage".to_string()))
    }

    async fn keys(&self, _prefix: &str) -> Result<Vec<String>, PersistenceError> {
        Err(PersistenceError::Connection("scripted outage".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Registry with `echo`, `fail`, `panic` and `sleep` (`{"ms": n}`).
pub fn functions() -> Arc<FunctionRegistry> {
    let registry = FunctionRegistry::with_builtins();
    registry.register_fn("fail", |_args, _input| async move {
        Err(CollaboratorError::Function("scripted failure".to_string()))
    });
    registry.register_fn("panic", |args, _input| async move {
        if args["quiet"].as_bool() != Some(true) {
            panic!("scripted panic");
        }
        Ok(args)
    });
    registry.register_fn("sleep", |args, _input| async move {
        let ms = args["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept": ms }))
    });
    Arc::new(registry)
}

pub fn collaborators_with(invoker: StubInvoker, http: StubHttp) -> StepCollaborators {
    StepCollaborators {
        model: BoxModelInvoker::new(invoker),
        pricing: Arc::new(FixedPricing),
        http: BoxHttpCaller::new(http),
        functions: functions(),
    }
}

pub fn executor_with(invoker: StubInvoker, http: StubHttp) -> StepExecutor {
    StepExecutor::new(
        collaborators_with(invoker, http),
        Arc::new(StepCache::new(Duration::from_secs(3600))),
        1024,
    )
}

pub fn executor() -> StepExecutor {
    executor_with(StubInvoker::new(), StubHttp::ok(json!({})))
}

pub fn llm_config(prompt: &str) -> StepConfig {
    StepConfig::LlmCall(LlmCallConfig {
        model: "stub-model".to_string(),
        provider: "stub".to_string(),
        prompt: prompt.to_string(),
        system: None,
        max_tokens: Some(64),
        temperature: None,
    })
}

pub fn custom_config(function: &str, args: Value) -> StepConfig {
    StepConfig::Custom(CustomConfig {
        function: function.to_string(),
        args,
    })
}

pub fn step(id: &str, deps: &[&str], config: StepConfig) -> StepTemplate {
    StepTemplate {
        id: id.to_string(),
        name: id.to_string(),
        config,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        condition: None,
        extensions: Map::new(),
    }
}

pub fn template(steps: Vec<StepTemplate>, parallelism: Option<u32>) -> WorkflowTemplate {
    WorkflowTemplate {
        id: Uuid::nil(),
        name: "test-trace".to_string(),
        description: None,
        version: "1.0.0".to_string(),
        owner_id: "owner-1".to_string(),
        steps,
        variables: BTreeMap::new(),
        triggers: Vec::new(),
        settings: TemplateSettings {
            parallelism,
            ..TemplateSettings::default()
        },
        tags: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
