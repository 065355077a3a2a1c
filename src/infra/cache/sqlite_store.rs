use crate::core::cache::{CacheStoreError, VerdictStore};
use crate::core::content::ModerationVerdict;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// SQLite-backed implementation of VerdictStore.
///
/// The verdict itself is stored as one JSON column; expiry is a separate
/// unix-seconds column so lookups can filter dead rows in SQL without
/// deserializing them.
pub struct SqliteVerdictStore {
    pool: Pool<Sqlite>,
}

impl SqliteVerdictStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verdicts (
                content_id TEXT PRIMARY KEY,
                verdict TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_verdicts_expires ON verdicts (expires_at)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every expired row. Expiry is otherwise enforced per-query, so
    /// this only reclaims disk space and can run on any schedule.
    pub async fn purge_expired(&self) -> Result<u64, CacheStoreError> {
        let result = sqlx::query("DELETE FROM verdicts WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| CacheStoreError::Storage(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VerdictStore for SqliteVerdictStore {
    async fn get(&self, content_id: &str) -> Result<Option<ModerationVerdict>, CacheStoreError> {
        let row = sqlx::query("SELECT verdict FROM verdicts WHERE content_id = ? AND expires_at > ?")
            .bind(content_id)
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CacheStoreError::Storage(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let json: String = row.get("verdict");
                let verdict = serde_json::from_str(&json)
                    .map_err(|e| CacheStoreError::Serialization(e.to_string()))?;
                Ok(Some(verdict))
            }
        }
    }

    async fn put(&self, verdict: ModerationVerdict) -> Result<(), CacheStoreError> {
        let expires_at = verdict.created_at.timestamp() + verdict.ttl.as_secs() as i64;
        let json = serde_json::to_string(&verdict)
            .map_err(|e| CacheStoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO verdicts (content_id, verdict, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET
                verdict = excluded.verdict,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&verdict.content_id)
        .bind(json)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, content_id: &str) -> Result<(), CacheStoreError> {
        sqlx::query("DELETE FROM verdicts WHERE content_id = ?")
            .bind(content_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheStoreError> {
        sqlx::query("DELETE FROM verdicts")
            .execute(&self.pool)
            .await
            .map_err(|e| CacheStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheStoreError> {
        // LIKE treats % and _ as wildcards; escape them so a literal prefix
        // like "batch_" matches only itself.
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");

        let rows = sqlx::query(
            r#"
            SELECT content_id FROM verdicts
            WHERE content_id LIKE ? ESCAPE '\' AND expires_at > ?
            ORDER BY content_id
            "#,
        )
        .bind(format!("{}%", escaped))
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheStoreError::Storage(e.to_string()))?;

        Ok(rows.iter().map(|row| row.get("content_id")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content::Decision;
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn verdict(content_id: &str, ttl: Duration) -> ModerationVerdict {
        ModerationVerdict {
            content_id: content_id.to_string(),
            decision: Decision::Review,
            confidence: 0.72,
            categories: BTreeSet::from(["scam".to_string()]),
            vendor_scores: BTreeMap::from([("acme".to_string(), 0.72)]),
            created_at: Utc::now(),
            ttl,
        }
    }

    async fn temp_store() -> (tempfile::TempDir, SqliteVerdictStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("verdicts.db").display());
        let store = SqliteVerdictStore::new(&url).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn round_trips_a_verdict() {
        let (_dir, store) = temp_store().await;
        let original = verdict("c-1", Duration::from_secs(3600));
        store.put(original.clone()).await.unwrap();

        let loaded = store.get("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.content_id, original.content_id);
        assert_eq!(loaded.decision, Decision::Review);
        assert_eq!(loaded.categories, original.categories);
        assert_eq!(loaded.vendor_scores, original.vendor_scores);
        assert_eq!(loaded.ttl, original.ttl);
    }

    #[tokio::test]
    async fn expired_rows_are_invisible() {
        let (_dir, store) = temp_store().await;
        // ttl of zero makes the row dead on arrival
        store.put(verdict("c-1", Duration::ZERO)).await.unwrap();
        assert!(store.get("c-1").await.unwrap().is_none());

        // purge actually deletes it
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn put_replaces_existing_verdict() {
        let (_dir, store) = temp_store().await;
        store.put(verdict("c-1", Duration::from_secs(60))).await.unwrap();

        let mut updated = verdict("c-1", Duration::from_secs(60));
        updated.decision = Decision::Block;
        store.put(updated).await.unwrap();

        let loaded = store.get("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.decision, Decision::Block);
    }

    #[tokio::test]
    async fn scan_prefix_filters_and_escapes() {
        let (_dir, store) = temp_store().await;
        store.put(verdict("user:1", Duration::from_secs(60))).await.unwrap();
        store.put(verdict("user:2", Duration::from_secs(60))).await.unwrap();
        store.put(verdict("userX9", Duration::from_secs(60))).await.unwrap();

        let ids = store.scan_prefix("user:").await.unwrap();
        assert_eq!(ids, vec!["user:1".to_string(), "user:2".to_string()]);
    }
}
