// Content domain models - data structures shared by the whole pipeline.
//
// These are pure domain types with no transport or storage dependencies.
// The infra layer converts these to vendor-specific request shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// What kind of content a submission carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Image,
    Video,
    Url,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Text => write!(f, "text"),
            ContentKind::Image => write!(f, "image"),
            ContentKind::Video => write!(f, "video"),
            ContentKind::Url => write!(f, "url"),
        }
    }
}

/// The raw payload of a submission.
///
/// Media bytes travel base64-encoded in JSON so submissions can cross the
/// stdin/stdout surface without a side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContentPayload {
    Text(String),
    Url(String),
    Media(#[serde(with = "base64_bytes")] Vec<u8>),
}

/// A single piece of user-submitted content. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSubmission {
    /// Unique per submission.
    pub id: String,
    pub kind: ContentKind,
    pub payload: ContentPayload,
    /// Who submitted it.
    pub submitter: String,
    /// Free-form metadata carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Final moderation decision for a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Limit,
    Review,
    Block,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Limit => write!(f, "limit"),
            Decision::Review => write!(f, "review"),
            Decision::Block => write!(f, "block"),
        }
    }
}

/// A cached, aggregated verdict for one content id.
///
/// At most one live (unexpired) verdict exists per content id; writing a new
/// one replaces the old one atomically at the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub content_id: String,
    pub decision: Decision,
    /// Mean vendor confidence, 0.0..=1.0.
    pub confidence: f64,
    /// Union of all vendor-reported category labels.
    pub categories: BTreeSet<String>,
    /// Per-vendor score that went into the decision.
    pub vendor_scores: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    /// How long this verdict may be served from cache.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
}

/// Serialize media payloads as base64 strings.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Serialize TTLs as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
