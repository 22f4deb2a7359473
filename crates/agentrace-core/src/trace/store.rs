//! Template store: memory-first registry backed by the persistence adapter.
//!
//! A persistence failure flips the store into memory-only mode for the rest
//! of the process lifetime. Registration still succeeds in that mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use agentrace_types::trace::WorkflowTemplate;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::storage::persistence::{PersistenceAdapter, TEMPLATE_PREFIX, template_key};

use super::error::TraceError;
use super::template::validate_template;

/// Registers and retrieves workflow templates.
pub struct TemplateStore<P: PersistenceAdapter> {
    templates: DashMap<Uuid, Arc<WorkflowTemplate>>,
    persistence: Arc<P>,
    ttl_secs: u64,
    degraded: AtomicBool,
}

impl<P: PersistenceAdapter> TemplateStore<P> {
    pub fn new(persistence: Arc<P>, ttl_secs: u64) -> Self {
        Self {
            templates: DashMap::new(),
            persistence,
            ttl_secs,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the store has fallen back to memory-only mode.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn degrade(&self, error: &dyn std::fmt::Display) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                warning = "persistence",
                error = %error,
                "template persistence unavailable, continuing memory-only"
            );
        }
    }

    /// Validate, assign an id and store a template.
    pub async fn register(&self, mut template: WorkflowTemplate) -> Result<Arc<WorkflowTemplate>, TraceError> {
        validate_template(&template)?;

        let now = Utc::now();
        template.id = Uuid::now_v7();
        template.created_at = now;
        template.updated_at = now;

        let template = Arc::new(template);
        self.templates.insert(template.id, Arc::clone(&template));

        if !self.is_degraded() {
            match serde_json::to_value(template.as_ref()) {
                Ok(value) => {
                    if let Err(e) = self
                        .persistence
                        .put(&template_key(&template.id), &value, self.ttl_secs)
                        .await
                    {
                        self.degrade(&e);
                    }
                }
                Err(e) => return Err(TraceError::Internal(e.to_string())),
            }
        }

        tracing::info!(
            template_id = %template.id,
            name = template.name.as_str(),
            steps = template.steps.len(),
            "registered template"
        );
        Ok(template)
    }

    /// Memory-first lookup with persistence fallback.
    pub async fn get(&self, id: &Uuid) -> Option<Arc<WorkflowTemplate>> {
        if let Some(template) = self.templates.get(id) {
            return Some(Arc::clone(template.value()));
        }
        if self.is_degraded() {
            return None;
        }

        match self.persistence.get(&template_key(id)).await {
            Ok(Some(value)) => match serde_json::from_value::<WorkflowTemplate>(value) {
                Ok(template) => {
                    let template = Arc::new(template);
                    self.templates.insert(*id, Arc::clone(&template));
                    Some(template)
                }
                Err(e) => {
                    tracing::warn!(
                        warning = "persistence",
                        template_id = %id,
                        error = %e,
                        "unreadable persisted template"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.degrade(&e);
                None
            }
        }
    }

    /// Templates of one owner, newest first.
    ///
    /// Reads persisted templates; in memory-only mode, the in-memory set.
    pub async fn list(&self, owner_id: &str) -> Vec<Arc<WorkflowTemplate>> {
        let mut templates = if self.is_degraded() {
            self.memory_templates()
        } else {
            match self.persisted_templates().await {
                Ok(templates) => templates,
                Err(e) => {
                    self.degrade(&e);
                    self.memory_templates()
                }
            }
        };

        templates.retain(|t| t.owner_id == owner_id);
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        templates
    }

    fn memory_templates(&self) -> Vec<Arc<WorkflowTemplate>> {
        self.templates.iter().map(|e| Arc::clone(e.value())).collect()
    }

    async fn persisted_templates(
        &self,
    ) -> Result<Vec<Arc<WorkflowTemplate>>, agentrace_types::error::PersistenceError> {
        let keys = self.persistence.keys(TEMPLATE_PREFIX).await?;
        let mut templates = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(value) = self.persistence.get(&key).await? else {
                continue;
            };
            match serde_json::from_value::<WorkflowTemplate>(value) {
                Ok(template) => {
                    let template = self
                        .templates
                        .entry(template.id)
                        .or_insert_with(|| Arc::new(template))
                        .clone();
                    templates.push(template);
                }
                Err(e) => tracing::warn!(
                    warning = "persistence",
                    key = key.as_str(),
                    error = %e,
                    "skipping unreadable template"
                ),
            }
        }
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::storage::InMemoryPersistence;
    use crate::trace::testing::{FailingPersistence, custom_config, step, template};

    fn sample(owner: &str) -> WorkflowTemplate {
        let mut t = template(vec![step("a", &[], custom_config("echo", json!({})))], None);
        t.owner_id = owner.to_string();
        t
    }

    #[tokio::test]
    async fn register_assigns_id_and_persists() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = TemplateStore::new(Arc::clone(&persistence), 60);

        let stored = store.register(sample("o")).await.unwrap();
        assert!(!stored.id.is_nil());
        assert_eq!(persistence.len(), 1);

        // A second store over the same persistence finds it on a miss.
        let other = TemplateStore::new(persistence, 60);
        let loaded = other.get(&stored.id).await.unwrap();
        assert_eq!(loaded.name, stored.name);
        assert!(other.get(&Uuid::now_v7()).await.is_none());
    }

    #[tokio::test]
    async fn register_rejects_invalid_templates() {
        let store = TemplateStore::new(Arc::new(InMemoryPersistence::new()), 60);
        let err = store.register(template(vec![], None)).await.unwrap_err();
        assert!(matches!(err, TraceError::Validation(_)));
    }

    #[tokio::test]
    async fn list_filters_by_owner_newest_first() {
        let store = TemplateStore::new(Arc::new(InMemoryPersistence::new()), 60);
        let first = store.register(sample("alice")).await.unwrap();
        let second = store.register(sample("alice")).await.unwrap();
        store.register(sample("bob")).await.unwrap();

        let listed = store.list("alice").await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn persistence_outage_degrades_to_memory() {
        let store = TemplateStore::new(Arc::new(FailingPersistence), 60);
        let stored = store.register(sample("o")).await.unwrap();
        assert!(store.is_degraded());

        assert!(store.get(&stored.id).await.is_some());
        assert_eq!(store.list("o").await.len(), 1);
    }
}
