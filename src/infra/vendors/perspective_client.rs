use crate::core::content::ContentPayload;
use crate::core::vendors::{BatchItem, VendorClient, VendorError, VendorScore};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

const ANALYZE_URL: &str =
    "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Attributes we request from Perspective, and the summary-score cutoff above
/// which an attribute is reported as a category on the verdict.
const ATTRIBUTES: [&str; 4] = ["TOXICITY", "SEVERE_TOXICITY", "INSULT", "THREAT"];
const CATEGORY_CUTOFF: f64 = 0.5;

/// Client for Google's Perspective comment-analysis API.
///
/// Perspective has no batch endpoint, so one batch becomes one wire call per
/// item. Media items are outside its scope and score 0.0 unconditionally.
pub struct PerspectiveClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl PerspectiveClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: ANALYZE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn parse_response(body: &Value) -> Result<VendorScore, VendorError> {
        let attribute_scores = body["attributeScores"].as_object().ok_or_else(|| {
            VendorError::InvalidResponse("missing attributeScores".to_string())
        })?;

        let mut confidence = 0.0_f64;
        let mut categories = Vec::new();
        for (attribute, entry) in attribute_scores {
            let value = entry["summaryScore"]["value"].as_f64().ok_or_else(|| {
                VendorError::InvalidResponse(format!("missing summaryScore for {attribute}"))
            })?;
            confidence = confidence.max(value);
            if value >= CATEGORY_CUTOFF {
                categories.push(attribute.to_lowercase());
            }
        }
        categories.sort();

        Ok(VendorScore { confidence, categories })
    }

    async fn analyze(&self, text: &str) -> Result<VendorScore, VendorError> {
        let mut requested = serde_json::Map::new();
        for attribute in ATTRIBUTES {
            requested.insert(attribute.to_string(), json!({}));
        }

        let payload = json!({
            "comment": { "text": text },
            "requestedAttributes": requested,
            "doNotStore": true,
        });

        let response = self
            .client
            .post(&self.base_url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VendorError::Timeout
                } else {
                    VendorError::Unavailable(e.to_string())
                }
            })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(VendorError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VendorError::Unavailable(format!(
                "Perspective API error: {} - {}",
                status, text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| VendorError::InvalidResponse(e.to_string()))?;

        Self::parse_response(&body)
    }
}

#[async_trait]
impl VendorClient for PerspectiveClient {
    fn name(&self) -> &str {
        "perspective"
    }

    async fn classify_batch(&self, items: &[BatchItem]) -> Result<Vec<VendorScore>, VendorError> {
        let mut scores = Vec::with_capacity(items.len());
        for item in items {
            let score = match &item.payload {
                ContentPayload::Text(text) => self.analyze(text).await?,
                ContentPayload::Url(url) => self.analyze(url).await?,
                ContentPayload::Media(_) => VendorScore {
                    confidence: 0.0,
                    categories: Vec::new(),
                },
            };
            scores.push(score);
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_max_attribute_score_and_cutoff_categories() {
        let body = json!({
            "attributeScores": {
                "TOXICITY": { "summaryScore": { "value": 0.83 } },
                "INSULT": { "summaryScore": { "value": 0.61 } },
                "THREAT": { "summaryScore": { "value": 0.04 } },
            }
        });

        let score = PerspectiveClient::parse_response(&body).unwrap();
        assert!((score.confidence - 0.83).abs() < 1e-9);
        assert_eq!(score.categories, vec!["insult", "toxicity"]);
    }

    #[test]
    fn malformed_score_is_an_invalid_response() {
        let body = json!({
            "attributeScores": { "TOXICITY": { "summaryScore": {} } }
        });
        let err = PerspectiveClient::parse_response(&body).unwrap_err();
        assert!(matches!(err, VendorError::InvalidResponse(_)));
    }
}
