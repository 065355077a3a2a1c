use crate::core::vendors::{BatchItem, VendorClient, VendorError, VendorScore};
use crate::core::content::ContentPayload;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

const MODERATIONS_URL: &str = "https://api.openai.com/v1/moderations";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for the OpenAI moderation endpoint (omni-moderation).
///
/// The endpoint accepts a whole array of inputs per request, so one batch
/// maps to exactly one wire call.
pub struct OpenAiModerationClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiModerationClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: MODERATIONS_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint (stub servers in tests).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn encode_input(item: &BatchItem) -> Value {
        match &item.payload {
            ContentPayload::Text(text) => json!({ "type": "text", "text": text }),
            ContentPayload::Url(url) => json!({ "type": "text", "text": url }),
            ContentPayload::Media(bytes) => json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{}", BASE64.encode(bytes)) },
            }),
        }
    }

    fn parse_result(result: &Value) -> Result<VendorScore, VendorError> {
        let scores = result["category_scores"].as_object().ok_or_else(|| {
            VendorError::InvalidResponse("missing category_scores".to_string())
        })?;

        let confidence = scores
            .values()
            .filter_map(Value::as_f64)
            .fold(0.0_f64, f64::max);

        let flags = result["categories"].as_object().ok_or_else(|| {
            VendorError::InvalidResponse("missing categories".to_string())
        })?;

        let mut categories: Vec<String> = flags
            .iter()
            .filter(|(_, flagged)| flagged.as_bool().unwrap_or(false))
            .map(|(name, _)| name.clone())
            .collect();
        categories.sort();

        Ok(VendorScore { confidence, categories })
    }
}

#[async_trait]
impl VendorClient for OpenAiModerationClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn classify_batch(&self, items: &[BatchItem]) -> Result<Vec<VendorScore>, VendorError> {
        let inputs: Vec<Value> = items.iter().map(Self::encode_input).collect();

        let payload = json!({
            "model": "omni-moderation-latest",
            "input": inputs,
        });

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
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
                "OpenAI moderation error: {} - {}",
                status, text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| VendorError::InvalidResponse(e.to_string()))?;

        let results = body["results"]
            .as_array()
            .ok_or_else(|| VendorError::InvalidResponse("missing results".to_string()))?;

        if results.len() != items.len() {
            return Err(VendorError::InvalidResponse(format!(
                "expected {} results, got {}",
                items.len(),
                results.len()
            )));
        }

        results.iter().map(Self::parse_result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_into_max_score_and_flagged_categories() {
        let result = json!({
            "flagged": true,
            "categories": { "harassment": true, "violence": false, "sexual": true },
            "category_scores": { "harassment": 0.91, "violence": 0.12, "sexual": 0.55 },
        });

        let score = OpenAiModerationClient::parse_result(&result).unwrap();
        assert!((score.confidence - 0.91).abs() < 1e-9);
        assert_eq!(score.categories, vec!["harassment", "sexual"]);
    }

    #[test]
    fn missing_scores_is_an_invalid_response() {
        let result = json!({ "flagged": false });
        let err = OpenAiModerationClient::parse_result(&result).unwrap_err();
        assert!(matches!(err, VendorError::InvalidResponse(_)));
    }

    #[test]
    fn media_payload_becomes_a_data_url_input() {
        let item = BatchItem {
            content_id: "c-1".to_string(),
            kind: crate::core::content::ContentKind::Image,
            payload: ContentPayload::Media(vec![1, 2, 3]),
        };
        let input = OpenAiModerationClient::encode_input(&item);
        assert_eq!(input["type"], "image_url");
        let url = input["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }
}
