// Duplicate index - maps content ids to fingerprints for near-duplicate
// lookups on new submissions.
//
// The index is split by fingerprint family (text vs visual) because the two
// are never comparable. Scans walk each family in insertion order so lookups
// are deterministic and testable.

use crate::core::hashing::{Fingerprint, FingerprintFamily, HashingEngine};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Which entry wins when several clear the similarity threshold.
///
/// First-insertion is the historical behavior; highest-similarity is
/// available for deployments that prefer the best match over the oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    #[default]
    FirstInsertion,
    HighestSimilarity,
}

/// A near-duplicate hit.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    /// Content id of the earlier submission this one duplicates.
    pub original_id: String,
    pub similarity: f64,
}

#[derive(Default)]
struct FamilyIndex {
    /// Content ids in insertion order.
    order: Vec<String>,
    entries: HashMap<String, Fingerprint>,
}

/// Insertion-ordered fingerprint index, shared across concurrent submissions.
pub struct DuplicateIndex {
    engine: HashingEngine,
    policy: MatchPolicy,
    families: RwLock<HashMap<FingerprintFamily, FamilyIndex>>,
    /// Exact digest -> content id of the first submission that carried it.
    exact: RwLock<HashMap<String, String>>,
}

impl DuplicateIndex {
    pub fn new(engine: HashingEngine) -> Self {
        Self::with_policy(engine, MatchPolicy::default())
    }

    pub fn with_policy(engine: HashingEngine, policy: MatchPolicy) -> Self {
        Self {
            engine,
            policy,
            families: RwLock::new(HashMap::new()),
            exact: RwLock::new(HashMap::new()),
        }
    }

    /// Add or overwrite the fingerprint for a content id.
    ///
    /// Overwriting keeps the id's original insertion position, so re-indexed
    /// content does not jump the scan order.
    pub async fn insert(&self, fingerprint: Fingerprint) {
        let family = fingerprint.algorithm.family();
        let mut families = self.families.write().await;
        let index = families.entry(family).or_default();

        let id = fingerprint.content_id.clone();
        if index.entries.insert(id.clone(), fingerprint).is_none() {
            index.order.push(id);
        }
    }

    /// Record an exact content digest. The first id to carry a digest keeps
    /// it, so identical-content lookups resolve to the earliest submission.
    pub async fn insert_exact(&self, fingerprint: &Fingerprint) {
        let mut exact = self.exact.write().await;
        exact
            .entry(fingerprint.encoded.clone())
            .or_insert_with(|| fingerprint.content_id.clone());
    }

    /// O(1) lookup for byte-identical content, tried before the similarity
    /// scan. An exact hit is by definition similarity 1.0.
    pub async fn find_exact(&self, candidate: &Fingerprint) -> Option<DuplicateMatch> {
        let exact = self.exact.read().await;
        let original_id = exact.get(&candidate.encoded)?;
        if original_id == &candidate.content_id {
            return None;
        }
        Some(DuplicateMatch {
            original_id: original_id.clone(),
            similarity: 1.0,
        })
    }

    /// Find an already-indexed entry whose similarity to the candidate is at
    /// or above the threshold.
    ///
    /// Only same-family entries are scanned. An empty index always returns
    /// `None`, whatever the threshold.
    pub async fn find_duplicate(
        &self,
        candidate: &Fingerprint,
        threshold: f64,
    ) -> Option<DuplicateMatch> {
        let families = self.families.read().await;
        let index = families.get(&candidate.algorithm.family())?;

        let mut best: Option<DuplicateMatch> = None;
        for id in &index.order {
            // The candidate may already be indexed (re-submission of the same
            // id); it is not a duplicate of itself.
            if id == &candidate.content_id {
                continue;
            }
            let Some(entry) = index.entries.get(id) else {
                continue;
            };

            let similarity = self.engine.similarity(candidate, entry);
            if similarity < threshold {
                continue;
            }

            match self.policy {
                MatchPolicy::FirstInsertion => {
                    return Some(DuplicateMatch {
                        original_id: id.clone(),
                        similarity,
                    });
                }
                MatchPolicy::HighestSimilarity => {
                    if best.as_ref().is_none_or(|b| similarity > b.similarity) {
                        best = Some(DuplicateMatch {
                            original_id: id.clone(),
                            similarity,
                        });
                    }
                }
            }
        }
        best
    }

    /// Number of indexed fingerprints across all families.
    pub async fn len(&self) -> usize {
        let families = self.families.read().await;
        families.values().map(|f| f.entries.len()).sum()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hashing::FingerprintAlgorithm;

    fn fp(id: &str, encoded: &str) -> Fingerprint {
        Fingerprint {
            content_id: id.to_string(),
            algorithm: FingerprintAlgorithm::SimHash64,
            encoded: encoded.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_index_never_matches() {
        let index = DuplicateIndex::new(HashingEngine::new());
        let candidate = fp("c1", "0000000000000000");

        assert!(index.find_duplicate(&candidate, 0.0).await.is_none());
        assert!(index.find_duplicate(&candidate, 1.0).await.is_none());
    }

    #[tokio::test]
    async fn identical_fingerprint_is_found() {
        let index = DuplicateIndex::new(HashingEngine::new());
        index.insert(fp("c1", "aabbccddeeff0011")).await;

        let hit = index
            .find_duplicate(&fp("c2", "aabbccddeeff0011"), 0.9)
            .await
            .unwrap();
        assert_eq!(hit.original_id, "c1");
        assert_eq!(hit.similarity, 1.0);
    }

    #[tokio::test]
    async fn first_inserted_match_wins_by_default() {
        let index = DuplicateIndex::new(HashingEngine::new());
        // Both entries are identical to the candidate.
        index.insert(fp("old", "ffffffffffffffff")).await;
        index.insert(fp("new", "ffffffffffffffff")).await;

        let hit = index
            .find_duplicate(&fp("c3", "ffffffffffffffff"), 0.9)
            .await
            .unwrap();
        assert_eq!(hit.original_id, "old");
    }

    #[tokio::test]
    async fn highest_similarity_policy_prefers_closer_match() {
        let index =
            DuplicateIndex::with_policy(HashingEngine::new(), MatchPolicy::HighestSimilarity);
        // "near" differs from the candidate by one bit, "exact" by none.
        index.insert(fp("near", "fffffffffffffffe")).await;
        index.insert(fp("exact", "ffffffffffffffff")).await;

        let hit = index
            .find_duplicate(&fp("c3", "ffffffffffffffff"), 0.9)
            .await
            .unwrap();
        assert_eq!(hit.original_id, "exact");
        assert_eq!(hit.similarity, 1.0);
    }

    #[tokio::test]
    async fn below_threshold_entries_do_not_match() {
        let index = DuplicateIndex::new(HashingEngine::new());
        index.insert(fp("c1", "ffffffffffffffff")).await;

        // All 64 bits differ.
        assert!(index
            .find_duplicate(&fp("c2", "0000000000000000"), 0.5)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn candidate_does_not_match_its_own_entry() {
        let index = DuplicateIndex::new(HashingEngine::new());
        index.insert(fp("c1", "aabbccddeeff0011")).await;

        assert!(index
            .find_duplicate(&fp("c1", "aabbccddeeff0011"), 0.9)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn families_are_separate_index_spaces() {
        let index = DuplicateIndex::new(HashingEngine::new());
        index.insert(fp("text", "aabbccddeeff0011")).await;

        let visual = Fingerprint {
            content_id: "img".to_string(),
            algorithm: FingerprintAlgorithm::DHash64,
            encoded: "aabbccddeeff0011".to_string(),
        };
        assert!(index.find_duplicate(&visual, 0.9).await.is_none());
    }

    fn exact_fp(id: &str, digest: &str) -> Fingerprint {
        Fingerprint {
            content_id: id.to_string(),
            algorithm: FingerprintAlgorithm::Sha256,
            encoded: digest.to_string(),
        }
    }

    #[tokio::test]
    async fn exact_digest_resolves_to_the_first_submission() {
        let index = DuplicateIndex::new(HashingEngine::new());
        index.insert_exact(&exact_fp("c1", "digest-a")).await;
        index.insert_exact(&exact_fp("c2", "digest-a")).await;

        let hit = index.find_exact(&exact_fp("c3", "digest-a")).await.unwrap();
        assert_eq!(hit.original_id, "c1");
        assert_eq!(hit.similarity, 1.0);
    }

    #[tokio::test]
    async fn exact_lookup_misses_on_unknown_digest() {
        let index = DuplicateIndex::new(HashingEngine::new());
        index.insert_exact(&exact_fp("c1", "digest-a")).await;

        assert!(index.find_exact(&exact_fp("c2", "digest-b")).await.is_none());
    }

    #[tokio::test]
    async fn exact_lookup_skips_the_candidates_own_digest() {
        let index = DuplicateIndex::new(HashingEngine::new());
        index.insert_exact(&exact_fp("c1", "digest-a")).await;

        assert!(index.find_exact(&exact_fp("c1", "digest-a")).await.is_none());
    }

    #[tokio::test]
    async fn overwrite_keeps_insertion_position() {
        let index = DuplicateIndex::new(HashingEngine::new());
        index.insert(fp("c1", "0000000000000000")).await;
        index.insert(fp("c2", "ffffffffffffffff")).await;
        // Re-index c1 with the same value as c2.
        index.insert(fp("c1", "ffffffffffffffff")).await;

        assert_eq!(index.len().await, 2);
        let hit = index
            .find_duplicate(&fp("c3", "ffffffffffffffff"), 0.9)
            .await
            .unwrap();
        // c1 kept its earlier position, so it wins over c2.
        assert_eq!(hit.original_id, "c1");
    }
}
