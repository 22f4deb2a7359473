//! Workflow template and trace execution types.
//!
//! A `WorkflowTemplate` is the reusable, versioned definition of a dependency
//! graph of steps. An `AgentTraceExecution` is one concrete run of a template:
//! the template's steps are snapshotted into `StepExecution`s and mutated in
//! place by the execution engine as the run progresses.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Template
// ---------------------------------------------------------------------------

/// Reusable workflow definition.
///
/// Immutable once registered: executions reference a template by id and
/// snapshot its steps, they never copy or mutate the template itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// UUIDv7 assigned on registration.
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    /// Human-readable template name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic version string (e.g. "1.0.0").
    pub version: String,
    /// Owner (tenant/user) of this template.
    #[serde(default)]
    pub owner_id: String,
    /// Ordered list of step definitions forming the dependency graph.
    pub steps: Vec<StepTemplate>,
    /// Declared input variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, VariableSpec>,
    /// Declared triggers. Stored for callers; the engine never fires them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<TriggerDefinition>,
    /// Execution settings.
    #[serde(default)]
    pub settings: TemplateSettings,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    /// Look up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&StepTemplate> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// Template-level execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    /// Advisory overall timeout in seconds. Not enforced by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Declarative retry policy, forwarded to step-type collaborators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Maximum number of steps dispatched per batch (None = engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
    /// Whether step outputs are served from and written to the step cache.
    #[serde(default = "default_caching_enabled")]
    pub caching_enabled: bool,
}

fn default_caching_enabled() -> bool {
    true
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            retry_policy: None,
            parallelism: None,
            caching_enabled: default_caching_enabled(),
        }
    }
}

/// Retry policy honored by the LLM and HTTP collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts in milliseconds, doubled per attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Variables and triggers
// ---------------------------------------------------------------------------

/// Declaration of a single template input variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// JSON type a variable value must have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl VariableType {
    /// Whether the given value satisfies this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            VariableType::Any => true,
            VariableType::String => value.is_string(),
            VariableType::Number => value.is_number(),
            VariableType::Boolean => value.is_boolean(),
            VariableType::Array => value.is_array(),
            VariableType::Object => value.is_object(),
        }
    }
}

/// How a template can be triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerDefinition {
    /// Manually triggered via the public surface.
    Manual {},
    /// Periodic schedule (cron expression, interpreted by an external scheduler).
    Schedule { cron: String },
    /// Incoming webhook.
    Webhook { path: String },
    /// Named in-process event.
    Event { event_type: String },
}

// ---------------------------------------------------------------------------
// Step Template
// ---------------------------------------------------------------------------

/// A single step in a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    /// Step ID, unique within the template.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Kind-specific configuration (tagged by `type`).
    pub config: StepConfig,
    /// Step IDs this step depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional branch declaration for conditional steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
    /// Open extension map for forward compatibility.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extensions: serde_json::Map<String, Value>,
}

impl StepTemplate {
    /// The kind of this step, derived from its configuration.
    pub fn kind(&self) -> StepKind {
        self.config.kind()
    }
}

/// Branch declaration attached to a conditional step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCondition {
    /// Restricted boolean expression. May be empty when the step's
    /// conditional config carries the expression.
    #[serde(default)]
    pub expression: String,
    /// Step taken when the expression is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then_id: Option<String>,
    /// Step taken when the expression is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_id: Option<String>,
}

/// The closed set of step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    LlmCall,
    DataProcessing,
    ApiCall,
    Conditional,
    Parallel,
    Custom,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepKind::LlmCall => "llm_call",
            StepKind::DataProcessing => "data_processing",
            StepKind::ApiCall => "api_call",
            StepKind::Conditional => "conditional",
            StepKind::Parallel => "parallel",
            StepKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Kind-specific step configuration.
///
/// Internally tagged by `type`:
/// ```yaml
/// config:
///   type: llm_call
///   model: gpt-4o-mini
///   provider: openai
///   prompt: "Summarize {{ steps.fetch.output }}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    LlmCall(LlmCallConfig),
    DataProcessing(DataProcessingConfig),
    ApiCall(ApiCallConfig),
    Conditional(ConditionalConfig),
    Parallel(ParallelConfig),
    Custom(CustomConfig),
}

impl StepConfig {
    pub fn kind(&self) -> StepKind {
        match self {
            StepConfig::LlmCall(_) => StepKind::LlmCall,
            StepConfig::DataProcessing(_) => StepKind::DataProcessing,
            StepConfig::ApiCall(_) => StepKind::ApiCall,
            StepConfig::Conditional(_) => StepKind::Conditional,
            StepConfig::Parallel(_) => StepKind::Parallel,
            StepConfig::Custom(_) => StepKind::Custom,
        }
    }
}

/// Model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallConfig {
    pub model: String,
    pub provider: String,
    /// Prompt template; supports `{{ ... }}` references.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Named transform applied to the step input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataProcessingConfig {
    pub operation: DataOperation,
}

/// Data processing operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DataOperation {
    /// Project dotted paths of the input into a new object.
    Transform { mapping: BTreeMap<String, String> },
    /// Fail unless every dotted path resolves to a non-null value.
    Validate { required: Vec<String> },
    /// Reduce an array found at `source`.
    Aggregate {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        function: AggregateFunction,
    },
    /// Keep array items whose `field` equals `equals`.
    Filter {
        source: String,
        field: String,
        equals: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// External HTTP call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallConfig {
    /// Endpoint URL template.
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Restricted boolean evaluation against the step input.
///
/// The expression may be given here or on the step's `condition`; this
/// one wins when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// Bounded fan-out of nested sub-tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub tasks: Vec<ParallelTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
}

/// One sub-task of a parallel step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelTask {
    pub name: String,
    pub config: StepConfig,
}

/// Call into the named-function registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomConfig {
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Overall status of a trace execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Trace execution
// ---------------------------------------------------------------------------

/// One concrete run of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTraceExecution {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub owner_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds (set on terminal state).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Snapshot of the template's steps with runtime state.
    pub steps: Vec<StepExecution>,
    #[serde(default)]
    pub input: Value,
    /// Resolved variables (schema defaults merged with caller values).
    #[serde(default)]
    pub variables: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ExecutionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<Uuid>,
}

impl AgentTraceExecution {
    /// Look up a step execution by step id.
    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Mutable lookup of a step execution by step id.
    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    /// Recompute aggregate metadata from the step list.
    ///
    /// Totals cover completed steps only. The cache-hit rate covers steps
    /// whose metadata carries an explicit cache flag.
    pub fn recompute_metadata(&mut self) {
        let completed: Vec<&StepExecution> = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .collect();

        let total_cost = completed.iter().map(|s| s.metadata.cost).sum();
        let total_tokens = completed.iter().map(|s| s.metadata.tokens).sum();

        let flagged: Vec<bool> = self
            .steps
            .iter()
            .filter_map(|s| s.metadata.cache_hit)
            .collect();
        let cache_hit_rate = if flagged.is_empty() {
            0.0
        } else {
            flagged.iter().filter(|hit| **hit).count() as f64 / flagged.len() as f64 * 100.0
        };

        let average_latency_ms = if completed.is_empty() {
            0.0
        } else {
            completed
                .iter()
                .map(|s| s.duration_ms.unwrap_or(0) as f64)
                .sum::<f64>()
                / completed.len() as f64
        };

        self.metadata = ExecutionMetadata {
            total_cost,
            total_tokens,
            cache_hit_rate,
            average_latency_ms,
        };
    }
}

/// Aggregate runtime statistics for an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub total_cost: f64,
    pub total_tokens: u64,
    /// Percentage (0-100) of cache-routed steps served from the cache.
    pub cache_hit_rate: f64,
    pub average_latency_ms: f64,
}

/// Runtime state of one step within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: String,
    pub name: String,
    pub config: StepConfig,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extensions: serde_json::Map<String, Value>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: StepRuntimeMetadata,
}

impl StepExecution {
    /// Snapshot a template step into a pending step execution.
    pub fn pending(step: &StepTemplate) -> Self {
        Self {
            id: step.id.clone(),
            name: step.name.clone(),
            config: step.config.clone(),
            dependencies: step.dependencies.clone(),
            condition: step.condition.clone(),
            extensions: step.extensions.clone(),
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            input: None,
            output: None,
            error: None,
            metadata: StepRuntimeMetadata::default(),
        }
    }

    pub fn kind(&self) -> StepKind {
        self.config.kind()
    }
}

/// Per-step runtime metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRuntimeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// `Some` only for steps routed through the step cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    /// Attempts reported by the collaborator (1 = no retry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
}

// ---------------------------------------------------------------------------
// Execute options
// ---------------------------------------------------------------------------

/// Caller-supplied options for a trace execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Execution name (defaults to the template name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Variable values merged over the template's schema defaults.
    #[serde(default)]
    pub variables: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<Uuid>,
    /// Overrides the template's batch size for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
    /// Token estimate reserved with the quota gate before start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
