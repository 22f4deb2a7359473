//! Checkpoint manager for execution state.
//!
//! Wraps a `PersistenceAdapter` to provide a higher-level API for writing
//! execution snapshots and per-batch checkpoints. Writes are best-effort:
//! a failed write is logged as a persistence warning and the in-memory run
//! continues.

use std::sync::Arc;

use agentrace_types::error::PersistenceError;
use agentrace_types::trace::AgentTraceExecution;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::persistence::{
    EXECUTION_PREFIX, PersistenceAdapter, checkpoint_key, checkpoint_prefix, execution_key,
};

/// A persisted batch checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub batch: u32,
    pub execution: AgentTraceExecution,
}

/// Persists execution snapshots and batch checkpoints.
///
/// Generic over `P: PersistenceAdapter` so it works with any storage backend.
pub struct CheckpointManager<P: PersistenceAdapter> {
    persistence: Arc<P>,
    execution_ttl_secs: u64,
    checkpoint_ttl_secs: u64,
}

impl<P: PersistenceAdapter> CheckpointManager<P> {
    pub fn new(persistence: Arc<P>, execution_ttl_secs: u64, checkpoint_ttl_secs: u64) -> Self {
        Self {
            persistence,
            execution_ttl_secs,
            checkpoint_ttl_secs,
        }
    }

    pub fn persistence(&self) -> &Arc<P> {
        &self.persistence
    }

    // -----------------------------------------------------------------------
    // Writes (best-effort)
    // -----------------------------------------------------------------------

    /// Persist the current execution state.
    pub async fn save_execution(&self, execution: &AgentTraceExecution) {
        let value = match serde_json::to_value(execution) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    warning = "persistence",
                    execution_id = %execution.id,
                    error = %e,
                    "failed to serialize execution"
                );
                return;
            }
        };
        if let Err(e) = self
            .persistence
            .put(&execution_key(&execution.id), &value, self.execution_ttl_secs)
            .await
        {
            tracing::warn!(
                warning = "persistence",
                execution_id = %execution.id,
                error = %e,
                "failed to persist execution state"
            );
        }
    }

    /// Write the checkpoint for a finished batch, then the execution state.
    pub async fn checkpoint_batch(&self, execution: &AgentTraceExecution, batch: u32) {
        let checkpoint = Checkpoint {
            batch,
            execution: execution.clone(),
        };
        match serde_json::to_value(&checkpoint) {
            Ok(value) => {
                if let Err(e) = self
                    .persistence
                    .put(
                        &checkpoint_key(&execution.id, batch),
                        &value,
                        self.checkpoint_ttl_secs,
                    )
                    .await
                {
                    tracing::warn!(
                        warning = "persistence",
                        execution_id = %execution.id,
                        batch,
                        error = %e,
                        "failed to persist checkpoint"
                    );
                }
            }
            Err(e) => tracing::warn!(
                warning = "persistence",
                execution_id = %execution.id,
                batch,
                error = %e,
                "failed to serialize checkpoint"
            ),
        }

        tracing::debug!(execution_id = %execution.id, batch, "checkpointed batch");
        self.save_execution(execution).await;
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn load_execution(&self, id: &Uuid) -> Result<Option<AgentTraceExecution>, PersistenceError> {
        match self.persistence.get(&execution_key(id)).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| PersistenceError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Every persisted execution. Unreadable entries are skipped with a warning.
    pub async fn load_all_executions(&self) -> Result<Vec<AgentTraceExecution>, PersistenceError> {
        let keys = self.persistence.keys(EXECUTION_PREFIX).await?;
        let mut executions = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(value) = self.persistence.get(&key).await? else {
                continue;
            };
            match serde_json::from_value(value) {
                Ok(execution) => executions.push(execution),
                Err(e) => tracing::warn!(
                    warning = "persistence",
                    key = key.as_str(),
                    error = %e,
                    "skipping unreadable execution"
                ),
            }
        }
        Ok(executions)
    }

    /// Checkpoints of one execution, in batch order.
    pub async fn load_checkpoints(&self, execution_id: &Uuid) -> Result<Vec<Checkpoint>, PersistenceError> {
        let keys = self.persistence.keys(&checkpoint_prefix(execution_id)).await?;
        let mut checkpoints = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.persistence.get(&key).await? {
                let checkpoint: Checkpoint = serde_json::from_value(value)
                    .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
                checkpoints.push(checkpoint);
            }
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrace_types::trace::{ExecutionMetadata, ExecutionStatus};
    use chrono::Utc;
    use serde_json::{Value, json};

    use crate::storage::InMemoryPersistence;
    use crate::trace::testing::FailingPersistence;

    fn execution() -> AgentTraceExecution {
        AgentTraceExecution {
            id: Uuid::now_v7(),
            template_id: Uuid::now_v7(),
            name: "t".into(),
            owner_id: "o".into(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            steps: vec![],
            input: Value::Null,
            variables: json!({}),
            output: None,
            error: None,
            metadata: ExecutionMetadata::default(),
            parent_execution_id: None,
        }
    }

    #[tokio::test]
    async fn checkpoints_load_in_batch_order() {
        let manager = CheckpointManager::new(Arc::new(InMemoryPersistence::new()), 60, 60);
        let mut exec = execution();
        manager.checkpoint_batch(&exec, 1).await;
        exec.status = ExecutionStatus::Completed;
        manager.checkpoint_batch(&exec, 2).await;

        let checkpoints = manager.load_checkpoints(&exec.id).await.unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].batch, 1);
        assert_eq!(checkpoints[0].execution.status, ExecutionStatus::Running);
        assert_eq!(checkpoints[1].execution.status, ExecutionStatus::Completed);

        let latest = manager.load_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(latest.status, ExecutionStatus::Completed);
        assert_eq!(manager.load_all_executions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_failures_are_not_fatal() {
        let manager = CheckpointManager::new(Arc::new(FailingPersistence), 60, 60);
        let exec = execution();
        manager.checkpoint_batch(&exec, 1).await;
        manager.save_execution(&exec).await;
        assert!(manager.load_execution(&exec.id).await.is_err());
    }
}
