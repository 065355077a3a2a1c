// Pipeline domain models - configuration and per-submission results.

use crate::core::content::ModerationVerdict;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    /// An unexpected error scoped to one submission. Sibling submissions in
    /// the same batch are unaffected.
    #[error("Processing failed for content {content_id}: {cause}")]
    Processing { content_id: String, cause: String },
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Similarity at or above which a submission reuses an earlier verdict.
    pub duplicate_threshold: f64,
    /// TTL for verdicts built entirely from vendor scores.
    pub verdict_ttl: Duration,
    /// Shorter TTL for verdicts that leaned on the local fallback, so real
    /// vendor verdicts replace them soon after an outage ends.
    pub fallback_ttl: Duration,
    /// How long one caller waits for its batch response before giving up.
    /// The batch itself is never cancelled by this.
    pub vendor_timeout: Duration,
    /// Concurrency window for `batch_process`.
    pub batch_chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.9,
            verdict_ttl: Duration::from_secs(3600),
            fallback_ttl: Duration::from_secs(300),
            vendor_timeout: Duration::from_secs(10),
            batch_chunk_size: 10,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// What the pipeline returns for one submission.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationOutcome {
    pub verdict: ModerationVerdict,
    /// The verdict came straight from the result cache.
    pub from_cache: bool,
    /// The submission near-duplicated earlier content; the verdict is the
    /// original's.
    pub is_duplicate: bool,
}

impl ModerationOutcome {
    pub fn fresh(verdict: ModerationVerdict) -> Self {
        Self {
            verdict,
            from_cache: false,
            is_duplicate: false,
        }
    }

    pub fn cached(verdict: ModerationVerdict) -> Self {
        Self {
            verdict,
            from_cache: true,
            is_duplicate: false,
        }
    }

    pub fn duplicate(verdict: ModerationVerdict) -> Self {
        Self {
            verdict,
            from_cache: false,
            is_duplicate: true,
        }
    }
}
