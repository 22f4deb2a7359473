//! Shared domain types for the agent trace orchestrator.
//!
//! Workflow templates, trace executions, step runtime metadata, metrics,
//! lifecycle events, quota records, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod metrics;
pub mod quota;
pub mod trace;
