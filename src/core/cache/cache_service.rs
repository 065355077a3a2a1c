// Result cache - TTL-bounded verdict lookups in front of the vendor path.
//
// The cache is an optimization, not a correctness requirement: if the backing
// store is unreachable the pipeline proceeds in bypass mode (every lookup
// misses, writes are dropped) rather than failing submissions.
//
// NO storage engine dependencies here - the store is injected via a trait.

use crate::core::content::ModerationVerdict;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Verdict serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Trait for persisting verdicts with TTL.
///
/// Implementations own expiry: `get` must never return an entry whose TTL has
/// elapsed, whether that is enforced lazily on read or by a sweep.
#[async_trait]
pub trait VerdictStore: Send + Sync {
    /// Fetch the live verdict for a content id, if any.
    async fn get(&self, content_id: &str) -> Result<Option<ModerationVerdict>, CacheStoreError>;

    /// Write a verdict, replacing any prior verdict for the same id.
    async fn put(&self, verdict: ModerationVerdict) -> Result<(), CacheStoreError>;

    /// Remove one entry.
    async fn remove(&self, content_id: &str) -> Result<(), CacheStoreError>;

    /// Drop every entry. Destructive and immediate.
    async fn clear(&self) -> Result<(), CacheStoreError>;

    /// List live content ids starting with a prefix (maintenance surface).
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheStoreError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Verdict cache over an injected store, with degrade-to-bypass semantics.
pub struct ResultCache<S: VerdictStore> {
    store: S,
}

impl<S: VerdictStore> ResultCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Look up a live verdict. A store failure is a miss, not an error.
    pub async fn get(&self, content_id: &str) -> Option<ModerationVerdict> {
        match self.store.get(content_id).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(content_id, "Verdict store read failed, bypassing cache: {err}");
                None
            }
        }
    }

    /// Write a verdict, unconditionally replacing any prior one for the id.
    /// A store failure drops the write.
    pub async fn put(&self, verdict: ModerationVerdict) {
        let content_id = verdict.content_id.clone();
        if let Err(err) = self.store.put(verdict).await {
            tracing::warn!(content_id, "Verdict store write failed, result not cached: {err}");
        }
    }

    /// Fetch the subset of ids that are present and unexpired. Missing ids
    /// are simply absent from the result.
    pub async fn batch_get(&self, content_ids: &[String]) -> HashMap<String, ModerationVerdict> {
        let mut found = HashMap::new();
        for id in content_ids {
            if let Some(verdict) = self.get(id).await {
                found.insert(id.clone(), verdict);
            }
        }
        found
    }

    pub async fn remove(&self, content_id: &str) -> Result<(), CacheStoreError> {
        self.store.remove(content_id).await
    }

    /// Drop everything. Invoked under memory-pressure policy by operators.
    pub async fn clear(&self) -> Result<(), CacheStoreError> {
        self.store.clear().await
    }

    /// List cached ids by prefix (maintenance surface).
    #[allow(dead_code)]
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheStoreError> {
        self.store.scan_prefix(prefix).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
