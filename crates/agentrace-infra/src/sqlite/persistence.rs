//! SQLite implementation of the persistence adapter.
//!
//! One `kv_entries` table holds templates, executions and checkpoints as
//! JSON text. Expiry is enforced on read; [`SqlitePersistence::purge_expired`]
//! reclaims the rows.

use agentrace_core::storage::PersistenceAdapter;
use agentrace_types::error::PersistenceError;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `PersistenceAdapter`.
pub struct SqlitePersistence {
    pool: DatabasePool,
}

impl SqlitePersistence {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Delete every expired row. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}

fn query_error(e: sqlx::Error) -> PersistenceError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PersistenceError::Connection(e.to_string())
        }
        other => PersistenceError::Query(other.to_string()),
    }
}

/// Absolute expiry in unix milliseconds; `None` for a TTL of 0.
fn expires_at(ttl_secs: u64) -> Option<i64> {
    if ttl_secs == 0 {
        return None;
    }
    let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    Some(Utc::now().timestamp_millis().saturating_add(ttl_ms))
}

impl PersistenceAdapter for SqlitePersistence {
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        let row = sqlx::query(
            "SELECT value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let text: String = row.try_get("value").map_err(query_error)?;
                let value = serde_json::from_str(&text)
                    .map_err(|e| PersistenceError::Serialization(format!("{key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &Value, ttl_secs: u64) -> Result<(), PersistenceError> {
        let text = serde_json::to_string(value)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO kv_entries (key, value, expires_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   expires_at = excluded.expires_at,
                   updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(&text)
        .bind(expires_at(ttl_secs))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        // substr() instead of LIKE: keys may contain `_`.
        let rows = sqlx::query(
            r#"SELECT key FROM kv_entries
               WHERE substr(key, 1, length(?)) = ?
                 AND (expires_at IS NULL OR expires_at > ?)
               ORDER BY key ASC"#,
        )
        .bind(prefix)
        .bind(prefix)
        .bind(Utc::now().timestamp_millis())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(query_error))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_persistence() -> (SqlitePersistence, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqlitePersistence::new(pool), dir)
    }

    async fn insert_expired(persistence: &SqlitePersistence, key: &str) {
        sqlx::query("INSERT INTO kv_entries (key, value, expires_at, updated_at) VALUES (?, '1', ?, ?)")
            .bind(key)
            .bind(Utc::now().timestamp_millis() - 1_000)
            .bind(Utc::now().to_rfc3339())
            .execute(&persistence.pool.writer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_get_and_overwrite() {
        let (store, _dir) = test_persistence().await;

        store.put("template:a", &json!({"name": "first"}), 60).await.unwrap();
        assert_eq!(
            store.get("template:a").await.unwrap(),
            Some(json!({"name": "first"}))
        );

        store.put("template:a", &json!({"name": "second"}), 0).await.unwrap();
        assert_eq!(
            store.get("template:a").await.unwrap(),
            Some(json!({"name": "second"}))
        );
        assert_eq!(store.get("template:missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_match_prefix_in_order() {
        let (store, _dir) = test_persistence().await;
        for key in ["checkpoint:x:000002", "checkpoint:x:000001", "checkpoint:y:000001", "execution:x"] {
            store.put(key, &json!(1), 60).await.unwrap();
        }
        store.put("checkpoint_x", &json!(1), 60).await.unwrap();

        let keys = store.keys("checkpoint:x:").await.unwrap();
        assert_eq!(keys, vec!["checkpoint:x:000001", "checkpoint:x:000002"]);
        assert_eq!(store.keys("checkpoint:").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_purged() {
        let (store, _dir) = test_persistence().await;
        insert_expired(&store, "execution:old").await;
        store.put("execution:new", &json!(2), 60).await.unwrap();

        assert_eq!(store.get("execution:old").await.unwrap(), None);
        assert_eq!(store.keys("execution:").await.unwrap(), vec!["execution:new"]);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[test]
    fn zero_ttl_never_expires() {
        assert_eq!(expires_at(0), None);
        assert!(expires_at(1).unwrap() > Utc::now().timestamp_millis());
        assert!(expires_at(u64::MAX).is_some());
    }
}
