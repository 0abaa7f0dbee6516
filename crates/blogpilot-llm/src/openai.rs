use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::batch::{BatchBackend, BatchJob, BatchStatus};
use crate::http::{map_http_error, send_error};
use crate::{ChatRequest, ProviderAdapter, ProviderKind};
use blogpilot_types::{PipelineError, Result};

/// Endpoint path every batch request line targets.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

// ---------------------------------------------------------------------------
// OpenAiCompatibleAdapter
// ---------------------------------------------------------------------------

/// Chat-completions adapter shared by OpenAI and OpenAI-compatible hosts.
#[derive(Debug)]
pub struct OpenAiCompatibleAdapter {
    kind: ProviderKind,
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OpenAiCompatibleAdapter {
    pub fn new(kind: ProviderKind, api_key: String) -> Self {
        Self {
            kind,
            api_key,
            client: reqwest::Client::new(),
            base_url: kind.default_base_url().to_string(),
            default_model: kind.default_model().to_string(),
        }
    }

    pub fn openai(api_key: String) -> Self {
        Self::new(ProviderKind::OpenAi, api_key)
    }

    pub fn groq(api_key: String) -> Self {
        Self::new(ProviderKind::Groq, api_key)
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn provider(&self) -> &'static str {
        self.kind.as_str()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn read_body(&self, resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(|e| send_error(self.provider(), e))?;
        if !status.is_success() {
            return Err(map_http_error(self.provider(), status, &headers, &body));
        }
        Ok(body)
    }

    async fn read_json(&self, resp: reqwest::Response) -> Result<serde_json::Value> {
        let body = self.read_body(resp).await?;
        serde_json::from_str(&body).map_err(|_| PipelineError::NonJson {
            provider: self.provider().to_string(),
        })
    }
}

/// Request body for one chat completion in JSON-object response mode.
pub fn chat_completion_body(request: &ChatRequest) -> serde_json::Value {
    json!({
        "model": request.model,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "response_format": { "type": "json_object" },
        "messages": [
            { "role": "system", "content": request.system_prompt },
            { "role": "user", "content": request.user_prompt },
        ],
    })
}

/// Text of the first choice of a chat-completion response body.
pub fn completion_text(body: &serde_json::Value) -> &str {
    body["choices"][0]["message"]["content"].as_str().unwrap_or("")
}

fn parse_batch_job(body: &serde_json::Value) -> Result<BatchJob> {
    let id = body["id"]
        .as_str()
        .ok_or_else(|| PipelineError::Other("batch response missing id".into()))?;
    Ok(BatchJob {
        id: id.to_string(),
        status: BatchStatus::parse(body["status"].as_str().unwrap_or("")),
        output_file_id: body["output_file_id"].as_str().map(String::from),
        error_file_id: body["error_file_id"].as_str().map(String::from),
    })
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    async fn generate(&self, request: &ChatRequest) -> Result<String> {
        let resp = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&chat_completion_body(request))
            .send()
            .await
            .map_err(|e| send_error(self.provider(), e))?;

        let json = self.read_json(resp).await?;
        Ok(completion_text(&json).to_string())
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn batch_backend(&self) -> Option<&dyn BatchBackend> {
        match self.kind {
            ProviderKind::OpenAi => Some(self),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// BatchBackend implementation (files + batches endpoints)
// ---------------------------------------------------------------------------

#[async_trait]
impl BatchBackend for OpenAiCompatibleAdapter {
    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        chat_completion_body(request)
    }

    async fn upload_requests(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch.jsonl".to_string());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/jsonl")
            .map_err(|e| send_error(self.provider(), e))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let resp = self
            .client
            .post(self.endpoint("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_error(self.provider(), e))?;
        let json = self.read_json(resp).await?;
        json["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PipelineError::Other("file upload response missing id".into()))
    }

    async fn create_batch(&self, input_file_id: &str) -> Result<BatchJob> {
        let resp = self
            .client
            .post(self.endpoint("batches"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "input_file_id": input_file_id,
                "endpoint": CHAT_COMPLETIONS_PATH,
                "completion_window": "24h",
            }))
            .send()
            .await
            .map_err(|e| send_error(self.provider(), e))?;
        parse_batch_job(&self.read_json(resp).await?)
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob> {
        let resp = self
            .client
            .get(self.endpoint(&format!("batches/{batch_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| send_error(self.provider(), e))?;
        parse_batch_job(&self.read_json(resp).await?)
    }

    async fn download_file(&self, file_id: &str) -> Result<String> {
        let resp = self
            .client
            .get(self.endpoint(&format!("files/{file_id}/content")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| send_error(self.provider(), e))?;
        self.read_body(resp).await
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint(&format!("batches/{batch_id}/cancel")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| send_error(self.provider(), e))?;
        self.read_json(resp).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
