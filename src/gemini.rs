//! Gemini API backend for the finance assistant
//!
//! Uses the process-wide reqwest::Client for connection pooling. The API key
//! travels in the `x-goog-api-key` header so it never appears in URLs or in
//! transport error messages.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::assistant::{Completion, CompletionBackend, CompletionRequest};
use crate::config::AssistantSettings;
use crate::error::{AssistantError, UnavailableReason};

/// Gemini `generateContent` client
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(client: Client, settings: &AssistantSettings) -> Self {
        Self {
            client,
            api_key: settings.gemini_api_key.clone(),
            base_url: settings.gemini_base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AssistantError> {
        let body = GeminiRequest::from_completion(request);

        info!(model = %self.model, "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("Gemini API request failed: {}", e);
                if e.is_timeout() {
                    AssistantError::unavailable(UnavailableReason::Timeout, "Gemini did not answer in time")
                } else {
                    AssistantError::unavailable(UnavailableReason::Upstream, format!("Gemini API error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), "Gemini API error response");
            let reason = if status == StatusCode::TOO_MANY_REQUESTS {
                UnavailableReason::RateLimited
            } else {
                UnavailableReason::Upstream
            };
            return Err(AssistantError::unavailable(
                reason,
                format!("Gemini API returned HTTP {}", status.as_u16()),
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e.without_url());
            AssistantError::unavailable(UnavailableReason::Upstream, "Gemini response could not be parsed")
        })?;

        gemini_response.into_completion(&self.model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

impl GeminiRequest {
    fn from_completion(request: &CompletionRequest) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.prompt.clone()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(request.system_prompt.clone()),
                }],
            },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

impl GeminiResponse {
    fn into_completion(self, model: &str) -> Result<Completion, AssistantError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(match self.prompt_feedback.and_then(|f| f.block_reason) {
                Some(reason) => {
                    warn!(block_reason = %reason, "Prompt blocked by Gemini safety filter");
                    AssistantError::unavailable(UnavailableReason::Blocked, format!("prompt blocked: {}", reason))
                }
                None => {
                    warn!("No candidates returned from Gemini");
                    AssistantError::unavailable(UnavailableReason::EmptyResponse, "no candidates returned")
                }
            });
        };

        let text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();

        if text.trim().is_empty() {
            warn!(finish_reason = ?candidate.finish_reason, "No text found in Gemini response");
            return Err(AssistantError::unavailable(
                UnavailableReason::EmptyResponse,
                format!(
                    "empty answer (finish reason: {})",
                    candidate.finish_reason.as_deref().unwrap_or("N/A")
                ),
            ));
        }

        let usage = self.usage_metadata;
        Ok(Completion {
            text,
            model: model.to_string(),
            prompt_tokens: usage.as_ref().and_then(|u| u.prompt_token_count),
            output_tokens: usage.as_ref().and_then(|u| u.candidates_token_count),
            finish_reason: candidate.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn completion_request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "You are a financial guide".to_string(),
            prompt: "What is an index fund?".to_string(),
            temperature: 0.2,
            max_output_tokens: 1024,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_value(GeminiRequest::from_completion(&completion_request())).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "What is an index fund?");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "You are a financial guide");
        assert!(json["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_parts_are_concatenated() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "An index fund "}, {"text": "tracks a market index."}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 42, "candidatesTokenCount": 7}
        }))
        .unwrap();

        let completion = response.into_completion("gemini-2.5-flash").unwrap();
        assert_eq!(completion.text, "An index fund tracks a market index.");
        assert_eq!(completion.prompt_tokens, Some(42));
        assert_eq!(completion.output_tokens, Some(7));
        assert_eq!(completion.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_blocked_prompt() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();

        let err = response.into_completion("gemini-2.5-flash").unwrap_err();
        assert!(matches!(
            err,
            AssistantError::Unavailable { reason: UnavailableReason::Blocked, .. }
        ));
    }

    #[test]
    fn test_empty_candidate_text() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();

        let err = response.into_completion("gemini-2.5-flash").unwrap_err();
        assert!(matches!(
            err,
            AssistantError::Unavailable { reason: UnavailableReason::EmptyResponse, .. }
        ));
    }

    #[test]
    fn test_endpoint_never_contains_key() {
        let settings = AssistantSettings {
            gemini_api_key: "super-secret".to_string(),
            gemini_base_url: "https://gemini.test/v1beta/models/".to_string(),
            model: "gemini-2.5-flash".to_string(),
            timeout: Duration::from_secs(30),
            max_output_tokens: 1024,
            max_context_turns: 6,
            max_context_tokens: 2000,
        };
        let backend = GeminiBackend::new(Client::new(), &settings);

        let endpoint = backend.endpoint();
        assert_eq!(endpoint, "https://gemini.test/v1beta/models/gemini-2.5-flash:generateContent");
        assert!(!endpoint.contains("super-secret"));
    }
}
