//! Asynchronous bulk generation: one uploaded request file, one job, polled
//! until it settles.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use blogpilot_types::{BatchGenerationResult, BatchJobItem, DraftPayload, PipelineError, Result};

use crate::config::{DEFAULT_BATCH_MAX_WAIT, DEFAULT_BATCH_POLL_INTERVAL};
use crate::json::parse_draft;
use crate::openai::{completion_text, CHAT_COMPLETIONS_PATH};
use crate::provider::DraftGenerator;
use crate::router::ProviderRouter;
use crate::ChatRequest;

// ---------------------------------------------------------------------------
// Batch job model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
    Unknown(String),
}

impl BatchStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "validating" => BatchStatus::Validating,
            "in_progress" => BatchStatus::InProgress,
            "finalizing" => BatchStatus::Finalizing,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            "expired" => BatchStatus::Expired,
            "cancelling" => BatchStatus::Cancelling,
            "cancelled" | "canceled" => BatchStatus::Cancelled,
            other => BatchStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BatchStatus::Validating => "validating",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Unknown(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Expired | BatchStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub id: String,
    pub status: BatchStatus,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
}

/// Provider side of a batch job: file upload, job creation and polling.
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Request body for one line of the upload file.
    fn request_body(&self, request: &ChatRequest) -> serde_json::Value;
    /// Upload an NDJSON request file, returning its file id.
    async fn upload_requests(&self, path: &Path) -> Result<String>;
    async fn create_batch(&self, input_file_id: &str) -> Result<BatchJob>;
    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob>;
    async fn download_file(&self, file_id: &str) -> Result<String>;
    async fn cancel_batch(&self, batch_id: &str) -> Result<()>;
}

/// One line of the upload file.
pub fn build_request_line(custom_id: &str, body: serde_json::Value) -> serde_json::Value {
    json!({
        "custom_id": custom_id,
        "method": "POST",
        "url": CHAT_COMPLETIONS_PATH,
        "body": body,
    })
}

/// Parse the output file. Each line is judged on its own: a non-200 response
/// or unparseable content becomes an error for that id, and lines without a
/// `custom_id` are skipped.
pub fn parse_batch_output(provider: &str, ndjson: &str) -> BatchGenerationResult {
    let mut result = BatchGenerationResult::default();
    for line in ndjson.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed batch output line");
                continue;
            }
        };
        let Some(id) = value["custom_id"].as_str() else {
            tracing::warn!("Skipping batch output line without custom_id");
            continue;
        };

        let response = &value["response"];
        let status = response["status_code"].as_u64().unwrap_or(0);
        if status != 200 {
            let message = response["body"]["error"]["message"]
                .as_str()
                .or_else(|| response["error"]["message"].as_str())
                .or_else(|| value["error"]["message"].as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("status {status}"));
            result.record_error(id, message);
            continue;
        }

        match parse_draft(provider, completion_text(&response["body"])) {
            Ok(draft) => result.record_output(id, draft),
            Err(e) => result.record_error(id, e.to_string()),
        }
    }
    result
}

// ---------------------------------------------------------------------------
// BatchJobOrchestrator
// ---------------------------------------------------------------------------

/// Consecutive transient poll or download failures tolerated for a live job.
const MAX_POLL_FAILURES: u32 = 5;

/// Generates drafts for many rows at once, through the primary provider's
/// batch endpoint when it has one and one routed call per row otherwise.
pub struct BatchJobOrchestrator {
    router: Arc<ProviderRouter>,
    poll_interval: Duration,
    max_wait: Duration,
    work_dir: PathBuf,
}

impl BatchJobOrchestrator {
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self {
            router,
            poll_interval: DEFAULT_BATCH_POLL_INTERVAL,
            max_wait: DEFAULT_BATCH_MAX_WAIT,
            work_dir: std::env::temp_dir(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Directory for the temporary request file.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Whether the primary provider can run batch jobs. Later providers in
    /// the order are not consulted.
    pub fn supports_batch(&self) -> bool {
        self.primary_backend().is_some()
    }

    fn primary_backend(&self) -> Option<&dyn BatchBackend> {
        self.router
            .provider(self.router.primary())
            .and_then(|p| p.batch_backend())
    }

    pub async fn run(&self, items: &[BatchJobItem], model_hint: Option<&str>) -> Result<BatchGenerationResult> {
        if items.is_empty() {
            return Ok(BatchGenerationResult::default());
        }
        match self.primary_backend() {
            Some(backend) => self.run_batch(backend, items, model_hint).await,
            None => {
                tracing::info!(
                    provider = %self.router.primary(),
                    items = items.len(),
                    "Primary provider has no batch support, generating sequentially"
                );
                Ok(self.run_sequential(items, model_hint).await)
            }
        }
    }

    async fn run_sequential(&self, items: &[BatchJobItem], model_hint: Option<&str>) -> BatchGenerationResult {
        let mut result = BatchGenerationResult::default();
        for item in items {
            match self
                .router
                .call_llm(&item.system_prompt, model_hint, item.user_prompt.as_deref())
                .await
            {
                Ok(draft) => result.record_output(&item.id, draft),
                Err(e) => {
                    tracing::warn!(id = %item.id, error = %e, "Sequential generation failed for item");
                    result.record_error(&item.id, e.to_string());
                }
            }
        }
        result
    }

    async fn run_batch(
        &self,
        backend: &dyn BatchBackend,
        items: &[BatchJobItem],
        model_hint: Option<&str>,
    ) -> Result<BatchGenerationResult> {
        let primary = self.router.primary();
        let model = self.router.resolve_model(primary, model_hint);
        let path = self.work_dir.join(format!("batch-{}.jsonl", uuid::Uuid::new_v4()));

        let mut lines = String::new();
        for item in items {
            let request = ChatRequest::new(model.as_str(), item.system_prompt.as_str(), item.user_prompt.as_deref());
            let line = build_request_line(&item.id, backend.request_body(&request));
            lines.push_str(&serde_json::to_string(&line)?);
            lines.push('\n');
        }
        let outcome = match tokio::fs::write(&path, lines).await {
            Ok(()) => self.submit_and_collect(backend, &path, primary.as_str()).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!(path = %path.display(), error = %e, "Could not remove batch request file");
        }
        outcome
    }

    async fn submit_and_collect(
        &self,
        backend: &dyn BatchBackend,
        path: &Path,
        provider: &str,
    ) -> Result<BatchGenerationResult> {
        let file_id = backend.upload_requests(path).await?;
        let job = backend.create_batch(&file_id).await?;
        tracing::info!(batch_id = %job.id, status = job.status.as_str(), "Batch job created");

        // A created job is billed; resubmitting it is never a retry.
        let batch_id = job.id.clone();
        self.await_job(backend, job, provider).await.map_err(|e| match e {
            PipelineError::BatchFailed { .. } => e,
            other => PipelineError::BatchFailed {
                batch_id,
                status: format!("unreachable: {other}"),
            },
        })
    }

    async fn await_job(
        &self,
        backend: &dyn BatchBackend,
        mut job: BatchJob,
        provider: &str,
    ) -> Result<BatchGenerationResult> {
        let started = tokio::time::Instant::now();
        let mut poll_failures = 0;
        while !job.status.is_terminal() {
            if started.elapsed() >= self.max_wait {
                tracing::warn!(
                    batch_id = %job.id,
                    max_wait_ms = self.max_wait.as_millis() as u64,
                    "Batch job did not settle in time, cancelling"
                );
                if let Err(e) = backend.cancel_batch(&job.id).await {
                    tracing::warn!(batch_id = %job.id, error = %e, "Could not cancel batch job");
                }
                return Err(PipelineError::BatchFailed {
                    batch_id: job.id,
                    status: "timed out".into(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            match backend.retrieve_batch(&job.id).await {
                Ok(polled) => {
                    poll_failures = 0;
                    job = polled;
                    tracing::debug!(batch_id = %job.id, status = job.status.as_str(), "Polled batch job");
                }
                Err(e) if e.is_transient() && poll_failures + 1 < MAX_POLL_FAILURES => {
                    poll_failures += 1;
                    tracing::warn!(batch_id = %job.id, attempt = poll_failures, error = %e, "Batch poll failed");
                }
                Err(e) => return Err(e),
            }
        }

        if job.status != BatchStatus::Completed {
            return Err(PipelineError::BatchFailed {
                batch_id: job.id,
                status: job.status.as_str().to_string(),
            });
        }
        let output_file_id = job.output_file_id.ok_or_else(|| PipelineError::BatchFailed {
            batch_id: job.id.clone(),
            status: "completed without output file".into(),
        })?;

        let mut attempt = 1;
        let output = loop {
            match backend.download_file(&output_file_id).await {
                Ok(body) => break body,
                Err(e) if e.is_transient() && attempt < MAX_POLL_FAILURES => {
                    tracing::warn!(batch_id = %job.id, attempt, error = %e, "Batch output download failed");
                    attempt += 1;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        };
        let result = parse_batch_output(provider, &output);
        tracing::info!(
            batch_id = %job.id,
            outputs = result.outputs.len(),
            errors = result.errors.len(),
            "Batch job completed"
        );
        Ok(result)
    }
}

#[async_trait]
impl DraftGenerator for BatchJobOrchestrator {
    async fn generate_draft(
        &self,
        system_prompt: &str,
        model_hint: Option<&str>,
        user_prompt: Option<&str>,
    ) -> Result<DraftPayload> {
        self.router.call_llm(system_prompt, model_hint, user_prompt).await
    }

    async fn generate_batch(
        &self,
        items: &[BatchJobItem],
        model_hint: Option<&str>,
    ) -> Result<BatchGenerationResult> {
        self.run(items, model_hint).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::chat_completion_body;
    use crate::{ProviderAdapter, ProviderKind};
    use std::sync::Mutex;

    const GOOD: &str = r#"{"title":"Farm stays","html":"<p>ok</p>"}"#;

    fn output_line(id: &str, status: u64, content: &str) -> String {
        json!({
            "custom_id": id,
            "response": {
                "status_code": status,
                "body": { "choices": [{ "message": { "content": content } }] }
            }
        })
        .to_string()
    }

    #[derive(Default)]
    struct BackendState {
        uploaded: Option<String>,
        upload_path: Option<PathBuf>,
        polls: usize,
        created: usize,
        cancelled: Vec<String>,
        /// Upcoming poll failures, as HTTP statuses.
        poll_failures: Vec<u16>,
        download_failures: usize,
    }

    /// Fake batch provider: reports `statuses` in order on successive polls.
    struct FakeBatchProvider {
        statuses: Vec<&'static str>,
        output: String,
        state: Arc<Mutex<BackendState>>,
    }

    fn unavailable(status: u16) -> PipelineError {
        PipelineError::Http {
            provider: "openai".into(),
            status,
            message: "unavailable".into(),
            retry_after_ms: None,
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeBatchProvider {
        async fn generate(&self, _request: &ChatRequest) -> Result<String> {
            Ok(GOOD.to_string())
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        fn default_model(&self) -> &str {
            "fake-model"
        }

        fn batch_backend(&self) -> Option<&dyn BatchBackend> {
            Some(self)
        }
    }

    #[async_trait]
    impl BatchBackend for FakeBatchProvider {
        fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
            chat_completion_body(request)
        }

        async fn upload_requests(&self, path: &Path) -> Result<String> {
            let content = tokio::fs::read_to_string(path).await?;
            let mut state = self.state.lock().unwrap();
            state.uploaded = Some(content);
            state.upload_path = Some(path.to_path_buf());
            Ok("file_in".into())
        }

        async fn create_batch(&self, _input_file_id: &str) -> Result<BatchJob> {
            self.state.lock().unwrap().created += 1;
            Ok(BatchJob {
                id: "batch_1".into(),
                status: BatchStatus::Validating,
                output_file_id: None,
                error_file_id: None,
            })
        }

        async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob> {
            let mut state = self.state.lock().unwrap();
            if !state.poll_failures.is_empty() {
                let status = state.poll_failures.remove(0);
                return Err(unavailable(status));
            }
            let status = self.statuses[state.polls.min(self.statuses.len() - 1)];
            state.polls += 1;
            Ok(BatchJob {
                id: batch_id.to_string(),
                status: BatchStatus::parse(status),
                output_file_id: Some("file_out".into()),
                error_file_id: None,
            })
        }

        async fn download_file(&self, _file_id: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            if state.download_failures > 0 {
                state.download_failures -= 1;
                return Err(unavailable(503));
            }
            Ok(self.output.clone())
        }

        async fn cancel_batch(&self, batch_id: &str) -> Result<()> {
            self.state.lock().unwrap().cancelled.push(batch_id.to_string());
            Ok(())
        }
    }

    struct PlainProvider {
        kind: ProviderKind,
    }

    #[async_trait]
    impl ProviderAdapter for PlainProvider {
        async fn generate(&self, request: &ChatRequest) -> Result<String> {
            if request.system_prompt.contains("bad") {
                return Err(PipelineError::Http {
                    provider: self.kind.to_string(),
                    status: 400,
                    message: "rejected".into(),
                    retry_after_ms: None,
                });
            }
            Ok(GOOD.to_string())
        }

        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn default_model(&self) -> &str {
            "plain"
        }
    }

    fn items(ids: &[&str]) -> Vec<BatchJobItem> {
        ids.iter()
            .map(|id| BatchJobItem {
                id: id.to_string(),
                system_prompt: format!("Write about {id}"),
                user_prompt: None,
            })
            .collect()
    }

    fn batch_orchestrator(
        statuses: Vec<&'static str>,
        output: String,
        dir: &Path,
    ) -> (BatchJobOrchestrator, Arc<Mutex<BackendState>>) {
        let state = Arc::new(Mutex::new(BackendState::default()));
        let mut router = ProviderRouter::new(vec![ProviderKind::OpenAi]);
        router.register_provider(FakeBatchProvider {
            statuses,
            output,
            state: state.clone(),
        });
        let orchestrator = BatchJobOrchestrator::new(Arc::new(router))
            .with_poll_interval(Duration::from_millis(1))
            .with_work_dir(dir);
        (orchestrator, state)
    }

    #[test]
    fn status_terminality() {
        assert!(BatchStatus::parse("completed").is_terminal());
        assert!(BatchStatus::parse("expired").is_terminal());
        assert!(BatchStatus::parse("canceled").is_terminal());
        assert!(!BatchStatus::parse("in_progress").is_terminal());
        assert!(!BatchStatus::parse("cancelling").is_terminal());
        assert_eq!(BatchStatus::parse("paused"), BatchStatus::Unknown("paused".into()));
    }

    #[test]
    fn request_line_targets_chat_completions() {
        let line = build_request_line("https://a", json!({"model": "m"}));
        assert_eq!(line["custom_id"], "https://a");
        assert_eq!(line["method"], "POST");
        assert_eq!(line["url"], "/v1/chat/completions");
        assert_eq!(line["body"]["model"], "m");
    }

    #[test]
    fn output_parsing_isolates_lines() {
        let ndjson = [
            output_line("a", 200, GOOD),
            output_line("b", 500, ""),
            json!({"custom_id": "c", "response": {"status_code": 429, "body": {"error": {"message": "Rate limit reached"}}}})
                .to_string(),
            "not json at all".to_string(),
            output_line("d", 200, "no braces here"),
            String::new(),
            output_line("e", 200, GOOD),
        ]
        .join("\n");

        let result = parse_batch_output("openai", &ndjson);
        assert_eq!(result.outputs.keys().collect::<Vec<_>>(), vec!["a", "e"]);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.errors["b"], "status 500");
        assert_eq!(result.errors["c"], "Rate limit reached");
        assert_eq!(result.errors["d"], "LLM returned non-JSON (openai)");
    }

    #[tokio::test]
    async fn completed_batch_returns_parsed_output_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let output = [output_line("a", 200, GOOD), output_line("b", 500, "")].join("\n");
        let (orchestrator, state) =
            batch_orchestrator(vec!["in_progress", "finalizing", "completed"], output, dir.path());

        let result = orchestrator.run(&items(&["a", "b"]), Some("gpt-4o")).await.unwrap();
        assert!(result.outputs.contains_key("a"));
        assert_eq!(result.errors["b"], "status 500");

        let state = state.lock().unwrap();
        assert_eq!(state.polls, 3);
        let uploaded = state.uploaded.as_deref().unwrap();
        let lines: Vec<serde_json::Value> = uploaded
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["custom_id"], "a");
        assert_eq!(lines[0]["body"]["model"], "gpt-4o");
        assert_eq!(lines[1]["body"]["messages"][0]["content"], "Write about b");
        assert!(!state.upload_path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn failed_batch_is_a_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, state) = batch_orchestrator(
            vec!["in_progress", "expired"],
            output_line("a", 200, GOOD),
            dir.path(),
        );
        let err = orchestrator.run(&items(&["a"]), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::BatchFailed { ref status, .. } if status == "expired"));
        assert!(!state.lock().unwrap().upload_path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn stuck_job_is_cancelled_and_not_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, state) = batch_orchestrator(vec!["in_progress"], String::new(), dir.path());
        let orchestrator = orchestrator.with_max_wait(Duration::from_millis(20));
        let err = orchestrator.run(&items(&["a"]), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::BatchFailed { ref status, .. } if status == "timed out"));
        assert!(!err.is_transient());

        let state = state.lock().unwrap();
        assert_eq!(state.created, 1);
        assert_eq!(state.cancelled, vec!["batch_1".to_string()]);
    }

    #[tokio::test]
    async fn transient_poll_errors_keep_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let output = output_line("a", 200, GOOD);
        let (orchestrator, state) = batch_orchestrator(vec!["in_progress", "completed"], output, dir.path());
        {
            let mut state = state.lock().unwrap();
            state.poll_failures = vec![503, 429];
            state.download_failures = 1;
        }
        let result = orchestrator.run(&items(&["a"]), None).await.unwrap();
        assert!(result.outputs.contains_key("a"));

        let state = state.lock().unwrap();
        assert_eq!(state.created, 1);
        assert_eq!(state.polls, 2);
        assert!(state.cancelled.is_empty());
    }

    #[tokio::test]
    async fn unreachable_live_job_fails_without_resubmission() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, state) = batch_orchestrator(vec!["in_progress"], String::new(), dir.path());
        state.lock().unwrap().poll_failures = vec![503; MAX_POLL_FAILURES as usize];
        let err = orchestrator.run(&items(&["a"]), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::BatchFailed { ref batch_id, .. } if batch_id == "batch_1"));
        assert!(!err.is_transient());
        assert_eq!(state.lock().unwrap().created, 1);
    }

    #[tokio::test]
    async fn request_file_write_failure_stops_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let (orchestrator, state) = batch_orchestrator(vec!["completed"], String::new(), &missing);
        let err = orchestrator.run(&items(&["a"]), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(state.lock().unwrap().uploaded.is_none());
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn empty_input_skips_submission() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, state) = batch_orchestrator(vec!["completed"], String::new(), dir.path());
        let result = orchestrator.run(&[], None).await.unwrap();
        assert_eq!(result, BatchGenerationResult::default());
        assert!(state.lock().unwrap().uploaded.is_none());
    }

    #[tokio::test]
    async fn primary_without_batch_falls_back_to_sequential_calls() {
        let mut router = ProviderRouter::new(vec![ProviderKind::Gemini, ProviderKind::OpenAi]);
        router.register_provider(PlainProvider {
            kind: ProviderKind::Gemini,
        });
        let orchestrator = BatchJobOrchestrator::new(Arc::new(router));
        assert!(!orchestrator.supports_batch());

        let mut jobs = items(&["a", "b"]);
        jobs[1].system_prompt = "bad prompt".into();
        let result = orchestrator.generate_batch(&jobs, None).await.unwrap();
        assert!(result.outputs.contains_key("a"));
        assert_eq!(result.errors["b"], "gemini HTTP 400: rejected");
    }
}
