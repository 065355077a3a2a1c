// This is the infra layer - it implements the traits defined in core.
// This file provides an IN-MEMORY implementation of VerdictStore.
//
// DashMap gives us a concurrent HashMap that multiple pipeline tasks can hit
// without an outer Mutex. Expiry is lazy: an entry past its deadline is
// removed the next time it is read or scanned, so `get` never hands back a
// stale verdict even though there is no background sweeper.

use crate::core::cache::{CacheStoreError, VerdictStore};
use crate::core::content::ModerationVerdict;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Clone)]
struct StoredVerdict {
    verdict: ModerationVerdict,
    expires_at: Instant,
}

/// In-memory implementation of VerdictStore.
pub struct InMemoryVerdictStore {
    entries: DashMap<String, StoredVerdict>,
}

impl InMemoryVerdictStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for InMemoryVerdictStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VerdictStore for InMemoryVerdictStore {
    async fn get(&self, content_id: &str) -> Result<Option<ModerationVerdict>, CacheStoreError> {
        // Clone out of the map guard before any removal to avoid holding a
        // shard lock while mutating the same key.
        let found = self
            .entries
            .get(content_id)
            .map(|entry| (entry.verdict.clone(), entry.expires_at));

        match found {
            None => Ok(None),
            Some((_, expires_at)) if expires_at <= Instant::now() => {
                self.entries.remove(content_id);
                Ok(None)
            }
            Some((verdict, _)) => Ok(Some(verdict)),
        }
    }

    async fn put(&self, verdict: ModerationVerdict) -> Result<(), CacheStoreError> {
        let expires_at = Instant::now() + verdict.ttl;
        self.entries.insert(
            verdict.content_id.clone(),
            StoredVerdict { verdict, expires_at },
        );
        Ok(())
    }

    async fn remove(&self, content_id: &str) -> Result<(), CacheStoreError> {
        self.entries.remove(content_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheStoreError> {
        self.entries.clear();
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheStoreError> {
        let now = Instant::now();
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.expires_at > now)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content::Decision;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn verdict(content_id: &str, ttl: Duration) -> ModerationVerdict {
        ModerationVerdict {
            content_id: content_id.to_string(),
            decision: Decision::Allow,
            confidence: 0.1,
            categories: BTreeSet::new(),
            vendor_scores: BTreeMap::new(),
            created_at: Utc::now(),
            ttl,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_live_before_ttl_and_gone_after() {
        let store = InMemoryVerdictStore::new();
        store
            .put(verdict("c-1", Duration::from_secs(10)))
            .await
            .unwrap();

        // Immediately after insertion: hit.
        assert!(store.get("c-1").await.unwrap().is_some());

        // 11 seconds later: miss, and the entry is purged.
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("c-1").await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn put_replaces_and_refreshes_ttl() {
        let store = InMemoryVerdictStore::new();
        store
            .put(verdict("c-1", Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        store
            .put(verdict("c-1", Duration::from_secs(5)))
            .await
            .unwrap();

        // The original deadline has passed but the rewrite reset it.
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.get("c-1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn scan_prefix_skips_expired_entries() {
        let store = InMemoryVerdictStore::new();
        store
            .put(verdict("user:1", Duration::from_secs(2)))
            .await
            .unwrap();
        store
            .put(verdict("user:2", Duration::from_secs(60)))
            .await
            .unwrap();
        store
            .put(verdict("post:1", Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        let ids = store.scan_prefix("user:").await.unwrap();
        assert_eq!(ids, vec!["user:2".to_string()]);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let store = InMemoryVerdictStore::new();
        store
            .put(verdict("c-1", Duration::from_secs(60)))
            .await
            .unwrap();
        store
            .put(verdict("c-2", Duration::from_secs(60)))
            .await
            .unwrap();

        store.remove("c-1").await.unwrap();
        assert!(store.get("c-1").await.unwrap().is_none());
        assert!(store.get("c-2").await.unwrap().is_some());

        store.clear().await.unwrap();
        assert_eq!(store.len(), 0);
    }
}
