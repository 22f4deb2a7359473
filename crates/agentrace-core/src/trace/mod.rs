//! Agent trace orchestration.
//!
//! Leaves first:
//! - `template` / `store`: template validation, YAML loading, registry
//! - `cache`: content-addressed, TTL-bound step output cache
//! - `step_executor`: per-kind step handlers behind the cache
//! - `engine`: batch scheduler, state machine and checkpointing
//! - `metrics`: statistics over persisted execution history
//! - `orchestrator`: the public facade wiring all of the above

pub mod cache;
pub mod checkpoint;
pub mod context;
pub mod dag;
pub mod engine;
pub mod error;
pub mod expression;
pub mod function;
pub mod metrics;
pub mod orchestrator;
pub mod step_executor;
pub mod store;
pub mod template;
pub mod transform;

#[cfg(test)]
pub mod testing;

pub use cache::StepCache;
pub use engine::ExecutionEngine;
pub use error::{StepError, TraceError};
pub use function::{CustomFunction, FunctionRegistry};
pub use orchestrator::TraceOrchestrator;
pub use step_executor::{StepCollaborators, StepExecutor};
pub use store::TemplateStore;
pub use template::{load_template_file, parse_template_yaml, validate_template};
