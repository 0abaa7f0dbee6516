//! Interfaces to the external systems the executor and supervisor drive.
//!
//! Concrete HTTP implementations live in `blogpilot-integrations`; tests use
//! hand-written fakes.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use blogpilot_types::{DraftPayload, QueueItem, QueueStatus, Result, RunInfo, RunMode};

// ---------------------------------------------------------------------------
// Executor side
// ---------------------------------------------------------------------------

/// The spreadsheet-backed work queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Pending rows in queue order, at most `limit`.
    async fn read_pending(&self, limit: usize) -> Result<Vec<QueueItem>>;

    /// Key/value settings kept next to the queue.
    async fn read_config(&self) -> Result<HashMap<String, String>>;

    /// Record the published URL on the row whose source is `source_url`.
    async fn backfill(&self, source_url: &str, published_url: &str) -> Result<()>;
}

/// What the storefront returned for a created article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArticle {
    pub id: Option<u64>,
    pub handle: Option<String>,
}

#[async_trait]
pub trait ArticlePublisher: Send + Sync {
    async fn publish(&self, blog_handle: &str, author: &str, draft: &DraftPayload) -> Result<PublishedArticle>;

    /// Public URL of an article.
    fn article_url(&self, blog_handle: &str, article_handle: &str) -> String;
}

// ---------------------------------------------------------------------------
// Supervisor side
// ---------------------------------------------------------------------------

#[async_trait]
pub trait QueueStatusSource: Send + Sync {
    async fn queue_status(&self, sample_limit: usize) -> Result<QueueStatus>;
}

#[async_trait]
pub trait RunHistory: Send + Sync {
    /// Most recent runs first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunInfo>>;
}

/// Externally stored pipeline switches.
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn read_flag(&self, name: &str) -> Result<Option<String>>;
    async fn write_flag(&self, name: &str, value: &str) -> Result<()>;
}

#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    async fn dispatch(&self, mode: RunMode, reason: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub links: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait IncidentTracker: Send + Sync {
    async fn open_incident(&self, severity: Severity, summary: &str, details: &str) -> Result<()>;
}
