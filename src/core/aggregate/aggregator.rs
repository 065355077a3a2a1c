// Aggregator - folds per-vendor scores into one moderation decision.
//
// Confidence is the arithmetic mean of vendor confidences, categories are the
// union of vendor labels, and the decision thresholds apply to the single
// highest vendor score.

use crate::core::content::Decision;
use crate::core::vendors::VendorOutcome;
use std::collections::{BTreeMap, BTreeSet};

/// Decision thresholds over the maximum individual vendor score.
///
/// Max-score thresholding is the historical behavior; deployments that want a
/// different policy tune these cutoffs.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    pub block_threshold: f64,
    pub review_threshold: f64,
    pub limit_threshold: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            block_threshold: 0.9,
            review_threshold: 0.7,
            limit_threshold: 0.5,
        }
    }
}

/// The combined multi-vendor result, before it is stamped into a verdict.
#[derive(Debug, Clone)]
pub struct AggregatedVerdict {
    pub decision: Decision,
    pub confidence: f64,
    pub categories: BTreeSet<String>,
    pub vendor_scores: BTreeMap<String, f64>,
}

pub struct Aggregator {
    policy: DecisionPolicy,
}

impl Aggregator {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self { policy }
    }

    /// Combine all vendor (and fallback) outcomes into one decision.
    ///
    /// No outcomes at all aggregates to a zero-confidence `allow`.
    pub fn aggregate(&self, outcomes: &[VendorOutcome]) -> AggregatedVerdict {
        let mut categories = BTreeSet::new();
        let mut vendor_scores = BTreeMap::new();
        let mut sum = 0.0;
        let mut max = 0.0f64;

        for outcome in outcomes {
            sum += outcome.score.confidence;
            max = max.max(outcome.score.confidence);
            categories.extend(outcome.score.categories.iter().cloned());
            vendor_scores.insert(outcome.vendor.clone(), outcome.score.confidence);
        }

        let confidence = if outcomes.is_empty() {
            0.0
        } else {
            sum / outcomes.len() as f64
        };

        let decision = if max >= self.policy.block_threshold {
            Decision::Block
        } else if max >= self.policy.review_threshold {
            Decision::Review
        } else if max >= self.policy.limit_threshold {
            Decision::Limit
        } else {
            Decision::Allow
        };

        AggregatedVerdict {
            decision,
            confidence,
            categories,
            vendor_scores,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DecisionPolicy::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
