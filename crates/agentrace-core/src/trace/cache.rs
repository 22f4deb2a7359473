//! Content-addressed, TTL-bound cache of step outputs.
//!
//! Entries are keyed by the SHA-256 of `(template_id, step_id, input,
//! variables)`. Concurrent writers may race on the same key; writes are
//! idempotent overwrites so the worst case is duplicate population.
//!
//! Time is read from tokio's clock so tests can run with a paused clock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A cached step result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub output: Value,
    pub cost: f64,
    pub tokens: u64,
    pub inserted_at: Instant,
}

/// Step output cache shared by all executions in the process.
#[derive(Debug)]
pub struct StepCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl StepCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deterministic key for a step invocation.
    ///
    /// Object keys are sorted before hashing so logically equal inputs map
    /// to the same key regardless of insertion order.
    pub fn key(template_id: &Uuid, step_id: &str, input: &Value, variables: &Value) -> String {
        let material = canonicalize(&json!([template_id.to_string(), step_id, input, variables]));
        let bytes = serde_json::to_vec(&material).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }

    /// Live entry for `key`, if inserted less than one TTL ago.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Insert or overwrite an entry.
    pub fn put(&self, key: String, output: Value, cost: f64, tokens: u64) {
        self.entries.insert(
            key,
            CacheEntry {
                output,
                cost,
                tokens,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Evict entries past their TTL. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "step cache swept");
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), canonicalize(&map[k])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic_and_order_insensitive() {
        let id = Uuid::now_v7();
        let a = StepCache::key(&id, "s", &json!({"x": 1, "y": [1, 2]}), &json!({"v": true}));
        let b = StepCache::key(&id, "s", &json!({"y": [1, 2], "x": 1}), &json!({"v": true}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_changes_with_any_component() {
        let id = Uuid::now_v7();
        let base = StepCache::key(&id, "s", &json!(1), &json!({}));
        assert_ne!(base, StepCache::key(&Uuid::now_v7(), "s", &json!(1), &json!({})));
        assert_ne!(base, StepCache::key(&id, "t", &json!(1), &json!({})));
        assert_ne!(base, StepCache::key(&id, "s", &json!(2), &json!({})));
        assert_ne!(base, StepCache::key(&id, "s", &json!(1), &json!({"a": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = StepCache::new(Duration::from_secs(60));
        cache.put("k".into(), json!("out"), 0.5, 10);

        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.output, json!("out"));
        assert_eq!(hit.tokens, 10);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_and_resets_age() {
        let cache = StepCache::new(Duration::from_secs(60));
        cache.put("k".into(), json!(1), 0.0, 0);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.put("k".into(), json!(2), 0.0, 0);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get("k").unwrap().output, json!(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_expired() {
        let cache = StepCache::new(Duration::from_secs(60));
        cache.put("old".into(), json!(1), 0.0, 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.put("new".into(), json!(2), 0.0, 0);

        assert_eq!(cache.sweep(), 1);
        assert!(cache.get("new").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_interval_until_cancelled() {
        let cache = Arc::new(StepCache::new(Duration::from_secs(10)));
        cache.put("k".into(), json!(1), 0.0, 0);
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(300), cancel.clone());

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
