//! CLI binary for the Blogpilot executor and supervisor.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use blogpilot_integrations::{GitHubClient, SheetsConfig, SheetsQueue, ShopifyPublisher, SlackNotifier};
use blogpilot_llm::{BatchJobOrchestrator, ProviderRouter};
use blogpilot_pipeline::supervisor::DEFAULT_SAMPLE_LIMIT;
use blogpilot_pipeline::{
    write_summary, ArticlePublisher, PublishedArticle, QueueProcessor, QueueStatusSource, Supervisor,
};
use blogpilot_types::{DraftPayload, PipelineError, RunMode, RunSummary};

use crate::config::{RunSettings, SuperviseSettings};

#[derive(Parser)]
#[command(name = "blogpilot", version, about = "Queue-driven article drafting and publishing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Draft pending queue rows, then save previews or publish
    Run {
        /// review or publish (default: MODE, else WF_ENABLED)
        #[arg(short, long)]
        mode: Option<RunMode>,

        /// Maximum rows to process (default: BATCH_SIZE or 30)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Output directory for previews and summary.json
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Evaluate pipeline health once and dispatch the next run
    Supervise {
        /// Number of recent runs to inspect
        #[arg(long)]
        history: Option<usize>,
    },

    /// Print the pending queue count and a few sample rows
    Queue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            mode,
            batch_size,
            out_dir,
        } => {
            let settings = RunSettings::from_env()?.with_overrides(mode, batch_size, out_dir)?;
            cmd_run(settings).await?;
        }
        Commands::Supervise { history } => {
            let mut settings = SuperviseSettings::from_env()?;
            if let Some(window) = history.filter(|n| *n > 0) {
                settings.supervisor.history_window = window;
            }
            cmd_supervise(settings).await?;
        }
        Commands::Queue => {
            cmd_queue(SheetsConfig::from_lookup(|key| std::env::var(key).ok())?).await?;
        }
    }

    Ok(())
}

async fn cmd_run(settings: RunSettings) -> anyhow::Result<()> {
    let router = Arc::new(ProviderRouter::from_config(&settings.llm));
    tracing::info!(providers = ?router.order(), "Provider order");
    let generator = BatchJobOrchestrator::new(router)
        .with_poll_interval(settings.llm.batch_poll_interval)
        .with_max_wait(settings.llm.batch_max_wait)
        .with_work_dir(&settings.executor.out_dir);

    let publisher: Arc<dyn ArticlePublisher> = match settings.shopify.clone() {
        Some(config) => Arc::new(ShopifyPublisher::new(config).with_retry_policy(settings.retry.clone())),
        None => Arc::new(UnconfiguredPublisher),
    };

    let processor = QueueProcessor::new(
        Arc::new(generator),
        Arc::new(SheetsQueue::new(settings.sheets.clone())),
        publisher,
        &settings.executor.out_dir,
    )
    .with_retry_policy(settings.retry.clone());

    let outcome = match processor.execute(&settings.executor).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Nothing was read, so nothing was attempted.
            tracing::error!(error = %e, "Could not read the queue");
            write_summary(&settings.executor.out_dir, &RunSummary::new(0)).await?;
            return Err(e.into());
        }
    };
    let summary = &outcome.summary;
    let path = write_summary(&settings.executor.out_dir, summary).await?;
    println!(
        "Processed {}/{} ({} failed). Summary: {}",
        summary.processed,
        summary.attempted,
        summary.failed,
        path.display()
    );
    if let Some(e) = outcome.fatal {
        tracing::error!(error = %e, "Run aborted");
        return Err(e.into());
    }
    Ok(())
}

async fn cmd_supervise(settings: SuperviseSettings) -> anyhow::Result<()> {
    let github = Arc::new(GitHubClient::new(settings.github));
    let supervisor = Supervisor::new(
        settings.supervisor,
        Arc::new(SheetsQueue::new(settings.sheets)),
        github.clone(),
        github.clone(),
        github.clone(),
        Arc::new(SlackNotifier::new(settings.slack_webhook)),
        github,
    );
    let decision = supervisor.tick().await?;
    println!("Decision: {decision:?}");
    Ok(())
}

async fn cmd_queue(config: SheetsConfig) -> anyhow::Result<()> {
    let status = SheetsQueue::new(config).queue_status(DEFAULT_SAMPLE_LIMIT).await?;
    println!("Pending: {}", status.total_pending);
    for url in &status.sample_urls {
        println!("  {url}");
    }
    Ok(())
}

/// Stands in for the storefront on review runs started without Shopify
/// credentials. Review runs never publish.
struct UnconfiguredPublisher;

#[async_trait]
impl ArticlePublisher for UnconfiguredPublisher {
    async fn publish(&self, _blog_handle: &str, _author: &str, _draft: &DraftPayload) -> blogpilot_types::Result<PublishedArticle> {
        Err(PipelineError::Config("SHOPIFY_SHOP and SHOPIFY_TOKEN are not set".into()))
    }

    fn article_url(&self, blog_handle: &str, article_handle: &str) -> String {
        format!("/blogs/{blog_handle}/{article_handle}")
    }
}
