use async_trait::async_trait;
use serde_json::json;

use crate::http::{map_http_error, send_error};
use crate::{ChatRequest, ProviderAdapter, ProviderKind};
use blogpilot_types::{PipelineError, Result};

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GeminiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: ProviderKind::Gemini.default_base_url().to_string(),
            default_model: ProviderKind::Gemini.default_model().to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        json!({
            "systemInstruction": {
                "parts": [{ "text": request.system_prompt }]
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.user_prompt }]
            }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
                "responseMimeType": "application/json",
            },
        })
    }

    fn parse_response(&self, json: &serde_json::Value) -> Result<String> {
        let candidate = json["candidates"]
            .get(0)
            .ok_or_else(|| PipelineError::Http {
                provider: "gemini".into(),
                status: 200,
                message: block_reason(json).unwrap_or_else(|| "Missing candidates in response".into()),
                retry_after_ms: None,
            })?;
        Ok(candidate["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string())
    }
}

fn block_reason(json: &serde_json::Value) -> Option<String> {
    json["promptFeedback"]["blockReason"]
        .as_str()
        .map(|r| format!("Prompt blocked: {r}"))
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn generate(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.build_request_body(request))
            .send()
            .await
            .map_err(|e| send_error("gemini", e))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(|e| send_error("gemini", e))?;
        if !status.is_success() {
            return Err(map_http_error("gemini", status, &headers, &body));
        }

        let json: serde_json::Value = serde_json::from_str(&body).map_err(|_| PipelineError::NonJson {
            provider: "gemini".into(),
        })?;
        self.parse_response(&json)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
