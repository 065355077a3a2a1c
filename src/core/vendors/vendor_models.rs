// Vendor contract - the boundary between the pipeline and paid
// classification vendors.
//
// Vendor responses are validated into these typed results at the client
// boundary; nothing downstream ever sees raw vendor JSON.

use crate::core::content::{ContentKind, ContentPayload};
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Vendor call failures. Cloneable because one batched failure is delivered
/// to every caller waiting on that batch.
#[derive(Debug, Clone, Error)]
pub enum VendorError {
    #[error("Vendor request timed out")]
    Timeout,

    #[error("Vendor rate limit exceeded")]
    RateLimited,

    #[error("Vendor unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid vendor response: {0}")]
    InvalidResponse(String),

    #[error("Dispatcher shut down before the batch flushed")]
    DispatcherClosed,
}

/// Error kind, used for the circuit breaker's expected-error allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorErrorKind {
    Timeout,
    RateLimited,
    Unavailable,
    InvalidResponse,
    DispatcherClosed,
}

impl VendorError {
    pub fn kind(&self) -> VendorErrorKind {
        match self {
            VendorError::Timeout => VendorErrorKind::Timeout,
            VendorError::RateLimited => VendorErrorKind::RateLimited,
            VendorError::Unavailable(_) => VendorErrorKind::Unavailable,
            VendorError::InvalidResponse(_) => VendorErrorKind::InvalidResponse,
            VendorError::DispatcherClosed => VendorErrorKind::DispatcherClosed,
        }
    }
}

// ============================================================================
// MODELS
// ============================================================================

/// One content item inside a vendor batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub content_id: String,
    pub kind: ContentKind,
    pub payload: ContentPayload,
}

/// A single vendor's classification of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorScore {
    /// 0.0..=1.0, higher means more likely to violate policy.
    pub confidence: f64,
    pub categories: Vec<String>,
}

/// A scored outcome attributed to the vendor (or fallback) that produced it.
/// This is what the aggregator consumes.
#[derive(Debug, Clone)]
pub struct VendorOutcome {
    pub vendor: String,
    pub score: VendorScore,
}

// ============================================================================
// CLIENT TRAIT (PORT)
// ============================================================================

/// Trait for vendor classification clients.
///
/// Implementations translate one batch into however many wire calls the
/// vendor needs and must return exactly one score per item, in order.
#[async_trait]
pub trait VendorClient: Send + Sync {
    fn name(&self) -> &str;

    async fn classify_batch(&self, items: &[BatchItem]) -> Result<Vec<VendorScore>, VendorError>;
}
