//! The executor run: read the queue, draft each pending row, then preview or
//! publish it, isolating every per-row failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blogpilot_llm::DraftGenerator;
use blogpilot_types::{
    BatchGenerationResult, BatchJobItem, DraftPayload, PipelineError, QueueItem, Result, RunMode, RunSummary,
};

use crate::collaborators::{ArticlePublisher, QueueStore};
use crate::preview::PreviewWriter;
use crate::prompt::PromptTemplate;
use crate::retry::{with_retry, RetryPolicy};
use crate::validation::validate_no_years;

pub const DEFAULT_BATCH_SIZE: usize = 30;
pub const DEFAULT_BLOG_HANDLE: &str = "agritourism";
pub const DEFAULT_AUTHOR: &str = "The Rike";
pub const DEFAULT_OUT_DIR: &str = "out";

const CONTROL_PROMPT_KEY: &str = "LLM_CONTROL_PROMPT";
const BLOG_HANDLE_KEY: &str = "BLOG_HANDLE";
const AUTHOR_KEY: &str = "AUTHOR";

/// An explicit `review`/`publish` wins; otherwise publish iff the workflow
/// flag is exactly `true`.
pub fn resolve_mode(explicit: Option<&str>, workflow_enabled: Option<&str>) -> RunMode {
    match explicit.and_then(|m| m.parse::<RunMode>().ok()) {
        Some(mode) => mode,
        None if workflow_enabled == Some("true") => RunMode::Publish,
        None => RunMode::Review,
    }
}

// ---------------------------------------------------------------------------
// Settings and context
// ---------------------------------------------------------------------------

/// Executor settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub mode: RunMode,
    pub batch_size: usize,
    pub blog_handle: Option<String>,
    pub author: Option<String>,
    pub control_prompt: Option<String>,
    pub model_hint: Option<String>,
    pub use_batch: bool,
    pub out_dir: PathBuf,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::Review,
            batch_size: DEFAULT_BATCH_SIZE,
            blog_handle: None,
            author: None,
            control_prompt: None,
            model_hint: None,
            use_batch: false,
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
        }
    }
}

impl ExecutorSettings {
    /// Reads `MODE`, `WF_ENABLED`, `BATCH_SIZE`, `BLOG_HANDLE`, `AUTHOR`,
    /// `LLM_CONTROL_PROMPT` and `OUT_DIR`. Model hint and batch mode come
    /// from the generation config.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            mode: resolve_mode(get("MODE").as_deref(), get("WF_ENABLED").as_deref()),
            batch_size: get("BATCH_SIZE")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            blog_handle: get(BLOG_HANDLE_KEY),
            author: get(AUTHOR_KEY),
            control_prompt: lookup(CONTROL_PROMPT_KEY).filter(|v| !v.trim().is_empty()),
            out_dir: get("OUT_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)),
            ..Self::default()
        }
    }
}

/// Everything one run needs to turn a queue row into a draft.
#[derive(Debug, Clone)]
pub struct ExecutorContext {
    pub publish_enabled: bool,
    pub blog_handle: String,
    pub author: String,
    pub model_hint: Option<String>,
    pub use_batch: bool,
    pub prompt: PromptTemplate,
}

impl ExecutorContext {
    /// Merge settings with the queue's key/value sheet (sheet values win) and
    /// validate the control prompt.
    pub fn resolve(settings: &ExecutorSettings, sheet: &HashMap<String, String>) -> Result<Self> {
        let pick = |key: &str, fallback: Option<&String>| {
            sheet
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .or(fallback)
                .cloned()
        };
        let prompt = pick(CONTROL_PROMPT_KEY, settings.control_prompt.as_ref()).unwrap_or_default();
        Ok(Self {
            publish_enabled: settings.mode == RunMode::Publish,
            blog_handle: pick(BLOG_HANDLE_KEY, settings.blog_handle.as_ref())
                .unwrap_or_else(|| DEFAULT_BLOG_HANDLE.to_string()),
            author: pick(AUTHOR_KEY, settings.author.as_ref()).unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            model_hint: settings.model_hint.clone(),
            use_batch: settings.use_batch,
            prompt: PromptTemplate::parse(prompt)?,
        })
    }
}

// ---------------------------------------------------------------------------
// QueueProcessor
// ---------------------------------------------------------------------------

/// What a run produced. `fatal` is set when the run failed as a whole (bad
/// configuration, dead batch job); the summary is still balanced and every
/// affected row is recorded as failed.
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub fatal: Option<PipelineError>,
}

impl RunOutcome {
    fn completed(summary: RunSummary) -> Self {
        Self { summary, fatal: None }
    }

    /// Every row fails with `error`.
    fn aborted(items: &[QueueItem], error: PipelineError) -> Self {
        let mut summary = RunSummary::new(items.len());
        for item in items {
            summary.record_failure(&item.source_url, &error);
        }
        Self {
            summary,
            fatal: Some(error),
        }
    }

    /// The summary, or the fatal error when there is one.
    pub fn into_result(self) -> Result<RunSummary> {
        match self.fatal {
            Some(e) => Err(e),
            None => Ok(self.summary),
        }
    }
}

pub struct QueueProcessor {
    generator: Arc<dyn DraftGenerator>,
    queue: Arc<dyn QueueStore>,
    publisher: Arc<dyn ArticlePublisher>,
    previews: PreviewWriter,
    retry: RetryPolicy,
}

impl QueueProcessor {
    pub fn new(
        generator: Arc<dyn DraftGenerator>,
        queue: Arc<dyn QueueStore>,
        publisher: Arc<dyn ArticlePublisher>,
        out_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            generator,
            queue,
            publisher,
            previews: PreviewWriter::new(out_dir.as_ref().join("review")),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// One executor run. Only a failure to read the queue is an `Err`; once
    /// rows are known, a run-wide failure marks them all failed and is
    /// reported through [`RunOutcome::fatal`].
    pub async fn execute(&self, settings: &ExecutorSettings) -> Result<RunOutcome> {
        let sheet = self.queue.read_config().await?;
        let items = self.queue.read_pending(settings.batch_size).await?;
        if items.is_empty() {
            tracing::info!("No pending items");
            return Ok(RunOutcome::completed(RunSummary::new(0)));
        }

        let ctx = match ExecutorContext::resolve(settings, &sheet) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(error = %e, items = items.len(), "Invalid run configuration, no row is drafted");
                return Ok(RunOutcome::aborted(&items, e));
            }
        };
        let mode = if ctx.publish_enabled { RunMode::Publish } else { RunMode::Review };
        tracing::info!(
            mode = %mode,
            items = items.len(),
            blog = %ctx.blog_handle,
            batch = ctx.use_batch,
            "Processing queue"
        );
        Ok(self.process(&ctx, &items).await)
    }

    /// Process `items` strictly in order.
    pub async fn process(&self, ctx: &ExecutorContext, items: &[QueueItem]) -> RunOutcome {
        let precomputed = match self.pregenerate(ctx, items).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Batch generation failed, no row gets a draft");
                return RunOutcome::aborted(items, e);
            }
        };

        let mut summary = RunSummary::new(items.len());
        for item in items {
            match self.process_item(ctx, item, precomputed.as_ref()).await {
                Ok(()) => summary.record_success(),
                Err(e) => {
                    tracing::error!(url = %item.source_url, error = %e, "Item failed");
                    summary.record_failure(&item.source_url, &e);
                }
            }
        }
        RunOutcome::completed(summary)
    }

    async fn pregenerate(&self, ctx: &ExecutorContext, items: &[QueueItem]) -> Result<Option<BatchGenerationResult>> {
        if !ctx.use_batch || items.is_empty() {
            return Ok(None);
        }
        let jobs: Vec<BatchJobItem> = items
            .iter()
            .map(|item| BatchJobItem {
                id: item.source_url.clone(),
                system_prompt: ctx.prompt.render(&item.source_url),
                user_prompt: None,
            })
            .collect();
        let hint = ctx.model_hint.as_deref();
        let result = with_retry(&self.retry, "batch", || self.generator.generate_batch(&jobs, hint)).await?;
        Ok(Some(result))
    }

    async fn draft_for(
        &self,
        ctx: &ExecutorContext,
        item: &QueueItem,
        precomputed: Option<&BatchGenerationResult>,
    ) -> Result<DraftPayload> {
        if let Some(batch) = precomputed {
            return batch.draft_for(&item.source_url);
        }
        let system_prompt = ctx.prompt.render(&item.source_url);
        let hint = ctx.model_hint.as_deref();
        with_retry(&self.retry, "generate", || {
            self.generator.generate_draft(&system_prompt, hint, None)
        })
        .await
    }

    async fn process_item(
        &self,
        ctx: &ExecutorContext,
        item: &QueueItem,
        precomputed: Option<&BatchGenerationResult>,
    ) -> Result<()> {
        let draft = self.draft_for(ctx, item, precomputed).await?;
        validate_no_years(&draft)?;

        let preview = self
            .previews
            .write(&item.source_url, &ctx.blog_handle, &ctx.author, &draft)
            .await?;
        if !ctx.publish_enabled {
            tracing::info!(url = %item.source_url, path = %preview.html.display(), "Draft saved for review");
            return Ok(());
        }

        let article = self.publisher.publish(&ctx.blog_handle, &ctx.author, &draft).await?;
        let handle = article
            .handle
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PipelineError::Publish("response missing article handle".into()))?;
        let url = self.publisher.article_url(&ctx.blog_handle, &handle);

        with_retry(&self.retry, "backfill", || self.queue.backfill(&item.source_url, &url)).await?;
        tracing::info!(url = %item.source_url, published = %url, "Published");
        Ok(())
    }
}

/// Write `summary.json` under `out_dir` and log it on one line.
pub async fn write_summary(out_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    tokio::fs::create_dir_all(out_dir).await?;
    let path = out_dir.join("summary.json");
    tokio::fs::write(&path, serde_json::to_string_pretty(summary)?).await?;
    tracing::info!("SUMMARY {}", serde_json::to_string(summary)?);
    Ok(path)
}
