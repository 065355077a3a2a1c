// Hashing engine - fingerprints for duplicate detection.
//
// Two fingerprint families that are never compared against each other:
// - Text/URL content gets an exact SHA-256 digest plus a 64-bit simhash over
//   word shingles (robust to minor edits).
// - Image/video content gets a 64-bit difference hash computed on a small
//   grayscale grid (robust to rescaling and recompression).
//
// NO vendor or storage dependencies here - just pure fingerprint math.

use crate::core::content::{ContentKind, ContentPayload, ContentSubmission};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Undecodable {kind} content: {reason}")]
    Undecodable { kind: ContentKind, reason: String },

    #[error("Empty payload for content {0}")]
    EmptyPayload(String),

    #[error("Payload does not match declared kind {0}")]
    PayloadMismatch(ContentKind),
}

// ============================================================================
// MODELS
// ============================================================================

/// Which algorithm produced a fingerprint. Fingerprints only compare within
/// the same algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintAlgorithm {
    /// Exact content digest - any character difference changes it.
    Sha256,
    /// Shingle-based near-duplicate signature for text.
    SimHash64,
    /// Perceptual difference hash for visual content.
    DHash64,
}

/// Index space a fingerprint lives in. Text and visual fingerprints are not
/// comparable, so the duplicate index keeps them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintFamily {
    Text,
    Visual,
}

impl FingerprintAlgorithm {
    pub fn family(&self) -> FingerprintFamily {
        match self {
            FingerprintAlgorithm::Sha256 | FingerprintAlgorithm::SimHash64 => {
                FingerprintFamily::Text
            }
            FingerprintAlgorithm::DHash64 => FingerprintFamily::Visual,
        }
    }
}

/// A comparable fingerprint for one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub content_id: String,
    pub algorithm: FingerprintAlgorithm,
    /// Hex-encoded hash value, fixed length per algorithm.
    pub encoded: String,
}

/// Both text representations, so duplicate checks can distinguish
/// "identical" from "near-identical".
#[derive(Debug, Clone)]
pub struct TextFingerprints {
    /// SHA-256 over the raw text.
    pub exact: Fingerprint,
    /// Simhash over normalized word shingles.
    pub near: Fingerprint,
}

/// The fingerprints computed for one submission.
#[derive(Debug, Clone)]
pub struct SubmissionFingerprints {
    /// The fingerprint that goes into the duplicate index.
    pub indexable: Fingerprint,
    /// Exact digest, present for text-family content only.
    pub exact: Option<Fingerprint>,
}

// ============================================================================
// ENGINE
// ============================================================================

// dHash compares each pixel to its right neighbor on an 8x8 grid, so the
// normalized image is one column wider than the comparison grid.
const DHASH_WIDTH: u32 = 9;
const DHASH_HEIGHT: u32 = 8;
const SHINGLE_SIZE: usize = 3;

/// Produces comparable fingerprints and similarity scores.
pub struct HashingEngine;

impl HashingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Fingerprint a submission according to its declared kind.
    ///
    /// Text and URL content hash through the text path; image and video
    /// content through the perceptual path (video uses its first decodable
    /// frame).
    pub fn fingerprint(
        &self,
        submission: &ContentSubmission,
    ) -> Result<SubmissionFingerprints, FingerprintError> {
        match (&submission.kind, &submission.payload) {
            (ContentKind::Text, ContentPayload::Text(text)) => {
                let prints = self.hash_text(&submission.id, text);
                Ok(SubmissionFingerprints {
                    indexable: prints.near,
                    exact: Some(prints.exact),
                })
            }
            (ContentKind::Url, ContentPayload::Url(url))
            | (ContentKind::Url, ContentPayload::Text(url)) => {
                let prints = self.hash_text(&submission.id, url);
                Ok(SubmissionFingerprints {
                    indexable: prints.near,
                    exact: Some(prints.exact),
                })
            }
            (ContentKind::Image, ContentPayload::Media(bytes))
            | (ContentKind::Video, ContentPayload::Media(bytes)) => {
                let print = self.hash_image(&submission.id, submission.kind, bytes)?;
                Ok(SubmissionFingerprints {
                    indexable: print,
                    exact: None,
                })
            }
            (kind, _) => Err(FingerprintError::PayloadMismatch(*kind)),
        }
    }

    /// Compute a difference hash for visual content.
    ///
    /// The image is shrunk to a 9x8 grayscale grid, which strips resolution
    /// and encoding variance before comparison. Each pixel is compared to its
    /// right neighbor: 1 if darker, 0 otherwise, packed into 16 hex chars.
    pub fn hash_image(
        &self,
        content_id: &str,
        kind: ContentKind,
        bytes: &[u8],
    ) -> Result<Fingerprint, FingerprintError> {
        if bytes.is_empty() {
            return Err(FingerprintError::EmptyPayload(content_id.to_string()));
        }

        // For animated formats this decodes the first frame, which is all we
        // need for video-style content.
        let decoded =
            image::load_from_memory(bytes).map_err(|e| FingerprintError::Undecodable {
                kind,
                reason: e.to_string(),
            })?;

        let grid = decoded
            .resize_exact(DHASH_WIDTH, DHASH_HEIGHT, FilterType::Triangle)
            .to_luma8();

        let mut bits: u64 = 0;
        for y in 0..DHASH_HEIGHT {
            for x in 0..DHASH_WIDTH - 1 {
                let left = grid.get_pixel(x, y).0[0];
                let right = grid.get_pixel(x + 1, y).0[0];
                bits = (bits << 1) | u64::from(left > right);
            }
        }

        Ok(Fingerprint {
            content_id: content_id.to_string(),
            algorithm: FingerprintAlgorithm::DHash64,
            encoded: format!("{:016x}", bits),
        })
    }

    /// Compute both text fingerprints.
    pub fn hash_text(&self, content_id: &str, text: &str) -> TextFingerprints {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let exact = Fingerprint {
            content_id: content_id.to_string(),
            algorithm: FingerprintAlgorithm::Sha256,
            encoded: hex::encode(hasher.finalize()),
        };

        let near = Fingerprint {
            content_id: content_id.to_string(),
            algorithm: FingerprintAlgorithm::SimHash64,
            encoded: format!("{:016x}", Self::simhash(text)),
        };

        TextFingerprints { exact, near }
    }

    /// Normalized Hamming similarity between two fingerprints.
    ///
    /// Returns 0.0 - never an error - when the algorithms differ, the encoded
    /// lengths differ, or either value fails to decode. Symmetric.
    pub fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if a.algorithm != b.algorithm || a.encoded.len() != b.encoded.len() {
            return 0.0;
        }

        let (Ok(a_bytes), Ok(b_bytes)) = (hex::decode(&a.encoded), hex::decode(&b.encoded))
        else {
            return 0.0;
        };
        if a_bytes.is_empty() {
            return 0.0;
        }

        let differing: u32 = a_bytes
            .iter()
            .zip(b_bytes.iter())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum();
        let total = (a_bytes.len() * 8) as f64;

        1.0 - f64::from(differing) / total
    }

    /// 64-bit simhash over word shingles of normalized text.
    fn simhash(text: &str) -> u64 {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        let shingles: Vec<String> = if words.len() < SHINGLE_SIZE {
            vec![words.join(" ")]
        } else {
            words
                .windows(SHINGLE_SIZE)
                .map(|w| w.join(" "))
                .collect()
        };

        let mut weights = [0i32; 64];
        for shingle in &shingles {
            let feature = Self::feature_hash(shingle);
            for (bit, weight) in weights.iter_mut().enumerate() {
                if feature >> bit & 1 == 1 {
                    *weight += 1;
                } else {
                    *weight -= 1;
                }
            }
        }

        let mut hash: u64 = 0;
        for (bit, weight) in weights.iter().enumerate() {
            if *weight > 0 {
                hash |= 1 << bit;
            }
        }
        hash
    }

    /// Stable 64-bit feature hash for one shingle.
    fn feature_hash(shingle: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(shingle.as_bytes());
        let digest = hasher.finalize();
        u64::from_be_bytes(digest[..8].try_into().unwrap_or([0u8; 8]))
    }
}

impl Default for HashingEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
