//! Shared error taxonomy and data model for the Blogpilot drafting pipeline.
//!
//! This crate provides the foundational types used across all other Blogpilot crates:
//! - `PipelineError`: unified error taxonomy with retry/fallback classification
//! - `QueueItem`, `QueueStatus`: rows of the external work queue
//! - `DraftPayload`: generated article content prior to publication
//! - `BatchJobItem`, `BatchGenerationResult`: bulk generation requests and results
//! - `RunSummary`: the per-run artifact consumed by monitoring
//! - `RunInfo`, `RunMode`, `PipelineFlags`: supervisor inputs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Unified error type for all Blogpilot subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // === Provider Errors ===
    #[error("Missing credential for provider {provider}")]
    MissingCredential { provider: String },

    #[error("{provider} HTTP {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Request to {provider} failed: {message}")]
    Transport { provider: String, message: String },

    #[error("LLM returned non-JSON ({provider})")]
    NonJson { provider: String },

    // === Draft Errors ===
    #[error("Invalid draft: {0}")]
    InvalidDraft(String),

    // === Batch Errors ===
    #[error("Batch {batch_id} ended with status {status}")]
    BatchFailed { batch_id: String, status: String },

    #[error("Batch output missing for row {id}")]
    BatchOutputMissing { id: String },

    #[error("{0}")]
    BatchItem(String),

    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    // === Collaborator Errors ===
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Dispatch rejected: {0}")]
    Dispatch(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    ///
    /// Rate limits, timeouts, transport failures and 5xx responses qualify.
    /// Malformed responses and other 4xx responses do not.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Timeout { .. } | PipelineError::Transport { .. } => true,
            PipelineError::Http { status, .. } => *status == 0 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Provider-declared wait hint, if the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::Http {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Numeric HTTP status, when the failure came from an HTTP response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            PipelineError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Provider name attached to provider-level failures.
    pub fn provider(&self) -> Option<&str> {
        match self {
            PipelineError::MissingCredential { provider }
            | PipelineError::Http { provider, .. }
            | PipelineError::Timeout { provider, .. }
            | PipelineError::Transport { provider, .. }
            | PipelineError::NonJson { provider } => Some(provider),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// One row of the work queue, keyed by its source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub source_url: String,
    #[serde(default)]
    pub published_url: String,
}

impl QueueItem {
    pub fn new(source_url: impl Into<String>, published_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            published_url: published_url.into(),
        }
    }

    /// A row is eligible for processing iff it has a source and no published URL yet.
    pub fn is_pending(&self) -> bool {
        !self.source_url.is_empty() && self.published_url.is_empty()
    }
}

/// Keep only pending rows, in queue order, capped at `limit`.
pub fn pending_items(rows: impl IntoIterator<Item = QueueItem>, limit: usize) -> Vec<QueueItem> {
    rows.into_iter()
        .filter(QueueItem::is_pending)
        .take(limit)
        .collect()
}

/// Summary of the queue as seen by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total_pending: usize,
    pub sample_urls: Vec<String>,
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftImage {
    #[serde(default)]
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// Generated article content prior to publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPayload {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_title: Option<String>,
    #[serde(
        default,
        rename = "meta_desc",
        alias = "meta_description",
        skip_serializing_if = "Option::is_none"
    )]
    pub meta_description: Option<String>,
    pub html: String,
    #[serde(default)]
    pub images: Vec<DraftImage>,
}

impl DraftPayload {
    /// First image with a usable source, used as the featured image.
    pub fn featured_image(&self) -> Option<&DraftImage> {
        self.images.iter().find(|img| !img.src.trim().is_empty())
    }

    /// Every text field that must stay free of year tokens.
    pub fn text_fields(&self) -> [(&'static str, &str); 4] {
        [
            ("title", self.title.as_str()),
            ("seo_title", self.seo_title.as_deref().unwrap_or("")),
            ("meta_desc", self.meta_description.as_deref().unwrap_or("")),
            ("html", self.html.as_str()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// One row's generation request inside a batch job. `id` is the row's source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobItem {
    pub id: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
}

/// Outputs and errors of a bulk generation, keyed by item id.
///
/// An id is recorded in at most one of the two maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGenerationResult {
    pub outputs: BTreeMap<String, DraftPayload>,
    pub errors: BTreeMap<String, String>,
}

impl BatchGenerationResult {
    pub fn record_output(&mut self, id: impl Into<String>, draft: DraftPayload) {
        let id = id.into();
        self.errors.remove(&id);
        self.outputs.insert(id, draft);
    }

    pub fn record_error(&mut self, id: impl Into<String>, message: impl Into<String>) {
        let id = id.into();
        self.outputs.remove(&id);
        self.errors.insert(id, message.into());
    }

    /// Resolve the draft for one row: an error entry wins, a missing entry is an error.
    pub fn draft_for(&self, id: &str) -> Result<DraftPayload> {
        if let Some(message) = self.errors.get(id) {
            return Err(PipelineError::BatchItem(message.clone()));
        }
        self.outputs
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::BatchOutputMissing { id: id.to_string() })
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub url: String,
    pub error: String,
}

/// Per-run counters. At the end of a run `attempted == processed + failed`
/// and `errors.len() == failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
}

impl RunSummary {
    pub fn new(attempted: usize) -> Self {
        Self {
            attempted,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
    }

    pub fn record_failure(&mut self, url: impl Into<String>, error: impl fmt::Display) {
        self.failed += 1;
        self.errors.push(ItemError {
            url: url.into(),
            error: error.to_string(),
        });
    }

    pub fn is_balanced(&self) -> bool {
        self.attempted == self.processed + self.failed && self.errors.len() == self.failed
    }
}

// ---------------------------------------------------------------------------
// Run history and flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Review,
    Publish,
}

impl RunMode {
    /// Infer the mode of a historical run from its display name.
    pub fn from_run_name(name: Option<&str>) -> Self {
        match name {
            Some(n) if n.to_ascii_lowercase().contains("publish") => RunMode::Publish,
            _ => RunMode::Review,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Review => "review",
            RunMode::Publish => "publish",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "review" => Ok(RunMode::Review),
            "publish" => Ok(RunMode::Publish),
            other => Err(PipelineError::Config(format!("unknown run mode '{other}'"))),
        }
    }
}

/// A historical pipeline execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
    pub mode: RunMode,
    pub url: String,
}

impl RunInfo {
    pub fn is_failure(&self) -> bool {
        self.conclusion.as_deref() == Some("failure")
    }

    pub fn is_success(&self) -> bool {
        self.conclusion.as_deref() == Some("success")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowPublish {
    HumanEnabled,
    HumanDisabled,
}

impl AllowPublish {
    /// Only the exact value `human_enabled` unlocks publishing.
    pub fn from_flag(value: &str) -> Self {
        if value == "human_enabled" {
            AllowPublish::HumanEnabled
        } else {
            AllowPublish::HumanDisabled
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllowPublish::HumanEnabled => "human_enabled",
            AllowPublish::HumanDisabled => "human_disabled",
        }
    }
}

/// External switches the supervisor reads and may only ever turn off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFlags {
    pub workflow_enabled: bool,
    pub allow_publish: AllowPublish,
}

impl PipelineFlags {
    pub const WORKFLOW_ENABLED: &'static str = "WF_ENABLED";
    pub const ALLOW_PUBLISH: &'static str = "ALLOW_PUBLISH";

    /// Build flags from raw stored values; absent values are treated as disabled.
    pub fn from_raw(workflow_enabled: Option<&str>, allow_publish: Option<&str>) -> Self {
        Self {
            workflow_enabled: workflow_enabled
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            allow_publish: AllowPublish::from_flag(allow_publish.unwrap_or("human_disabled")),
        }
    }

    pub fn disabled() -> Self {
        Self {
            workflow_enabled: false,
            allow_publish: AllowPublish::HumanDisabled,
        }
    }
}
