// Fallback classifier - local rule-based moderation for when vendors are
// unreachable.
//
// A deliberately simple keyword matcher over an externally configurable rule
// set. It produces low-confidence scores, and the pipeline stores verdicts
// that leaned on it with a shorter TTL so real vendor verdicts replace them
// soon after the outage ends.

use crate::core::content::{ContentPayload, ContentSubmission};
use crate::core::vendors::VendorScore;

/// One suspicious term and the category label it maps to.
#[derive(Debug, Clone)]
pub struct FallbackRule {
    pub term: String,
    pub category: String,
}

impl FallbackRule {
    pub fn new(term: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            term: term.into().to_lowercase(),
            category: category.into(),
        }
    }
}

/// Local rule-based classifier used as the circuit breaker fallback path.
pub struct FallbackClassifier {
    rules: Vec<FallbackRule>,
    /// Confidence reported when at least one rule matches. Kept below the
    /// review threshold so fallback verdicts lean permissive.
    matched_confidence: f64,
}

impl FallbackClassifier {
    pub fn new(rules: Vec<FallbackRule>, matched_confidence: f64) -> Self {
        Self {
            rules,
            matched_confidence,
        }
    }

    /// Default rule set used when no external configuration is provided.
    pub fn with_default_rules() -> Self {
        let rules = [
            ("free money", "scam"),
            ("wire transfer", "scam"),
            ("crypto giveaway", "scam"),
            ("click here", "spam"),
            ("limited time offer", "spam"),
            ("kill yourself", "harassment"),
        ]
        .into_iter()
        .map(|(term, category)| FallbackRule::new(term, category))
        .collect();
        Self::new(rules, 0.6)
    }

    /// Classify a submission locally. Media content cannot be inspected by
    /// keyword rules and always scores clean.
    pub fn classify(&self, submission: &ContentSubmission) -> VendorScore {
        let text = match &submission.payload {
            ContentPayload::Text(text) | ContentPayload::Url(text) => text.to_lowercase(),
            ContentPayload::Media(_) => {
                return VendorScore {
                    confidence: 0.0,
                    categories: vec![],
                }
            }
        };

        let mut categories: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| text.contains(&rule.term))
            .map(|rule| rule.category.clone())
            .collect();
        categories.sort();
        categories.dedup();

        if categories.is_empty() {
            VendorScore {
                confidence: 0.0,
                categories,
            }
        } else {
            VendorScore {
                confidence: self.matched_confidence,
                categories,
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
