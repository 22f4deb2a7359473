//! Persistence adapter trait and key layout.
//!
//! A TTL-scoped key/value store for templates, executions and checkpoints.
//! Callers treat it as best-effort: failures are logged, never fatal.
//! Implementations live here (in-memory) and in agentrace-infra (SQLite).

use agentrace_types::error::PersistenceError;
use serde_json::Value;
use uuid::Uuid;

/// Trait for best-effort key/value persistence with per-entry TTL.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// A `ttl_secs` of 0 stores the entry without expiry.
pub trait PersistenceAdapter: Send + Sync {
    /// Get a live value by key. Expired entries read as `None`.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, PersistenceError>> + Send;

    /// Upsert a value with a time-to-live in seconds.
    fn put(
        &self,
        key: &str,
        value: &Value,
        ttl_secs: u64,
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send;

    /// List live keys starting with `prefix`, sorted ascending.
    fn keys(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, PersistenceError>> + Send;
}

pub const TEMPLATE_PREFIX: &str = "template:";
pub const EXECUTION_PREFIX: &str = "execution:";
pub const CHECKPOINT_PREFIX: &str = "checkpoint:";

pub fn template_key(id: &Uuid) -> String {
    format!("{TEMPLATE_PREFIX}{id}")
}

pub fn execution_key(id: &Uuid) -> String {
    format!("{EXECUTION_PREFIX}{id}")
}

/// Checkpoint keys sort by batch number within an execution.
pub fn checkpoint_key(execution_id: &Uuid, batch: u32) -> String {
    format!("{CHECKPOINT_PREFIX}{execution_id}:{batch:06}")
}

pub fn checkpoint_prefix(execution_id: &Uuid) -> String {
    format!("{CHECKPOINT_PREFIX}{execution_id}:")
}
