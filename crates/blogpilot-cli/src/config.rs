//! Per-command settings, resolved once from the environment at startup.

use std::path::PathBuf;

use blogpilot_integrations::{GitHubConfig, SheetsConfig, ShopifyConfig};
use blogpilot_llm::LlmConfig;
use blogpilot_pipeline::{ExecutorSettings, RetryPolicy, SupervisorConfig};
use blogpilot_types::{PipelineError, PipelineFlags, Result, RunMode};

pub struct RunSettings {
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub executor: ExecutorSettings,
    pub sheets: SheetsConfig,
    /// Only required when the run publishes.
    pub shopify: Option<ShopifyConfig>,
}

impl RunSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let llm = LlmConfig::from_lookup(&lookup);
        let mut executor = ExecutorSettings::from_lookup(&lookup);
        executor.model_hint = llm.model_hint.clone();
        executor.use_batch = llm.use_batch;

        let settings = Self {
            retry: RetryPolicy::from_lookup(&lookup),
            sheets: SheetsConfig::from_lookup(&lookup)?,
            shopify: ShopifyConfig::from_lookup(&lookup).ok(),
            llm,
            executor,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Apply command-line overrides, then re-check.
    pub fn with_overrides(
        mut self,
        mode: Option<RunMode>,
        batch_size: Option<usize>,
        out_dir: Option<PathBuf>,
    ) -> Result<Self> {
        if let Some(mode) = mode {
            self.executor.mode = mode;
        }
        if let Some(size) = batch_size.filter(|n| *n > 0) {
            self.executor.batch_size = size;
        }
        if let Some(dir) = out_dir {
            self.executor.out_dir = dir;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.executor.mode == RunMode::Publish && self.shopify.is_none() {
            return Err(PipelineError::Config(
                "SHOPIFY_SHOP and SHOPIFY_TOKEN are required in publish mode".into(),
            ));
        }
        Ok(())
    }
}

pub struct SuperviseSettings {
    pub sheets: SheetsConfig,
    pub github: GitHubConfig,
    pub slack_webhook: Option<String>,
    pub supervisor: SupervisorConfig,
}

impl SuperviseSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Process values of the flags serve as fallbacks when the variables
    /// store has none.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            sheets: SheetsConfig::from_lookup(&lookup)?,
            github: GitHubConfig::from_lookup(&lookup)?,
            slack_webhook: lookup("SLACK_WEBHOOK"),
            supervisor: SupervisorConfig {
                fallback_workflow_enabled: lookup(PipelineFlags::WORKFLOW_ENABLED),
                fallback_allow_publish: lookup(PipelineFlags::ALLOW_PUBLISH),
                ..SupervisorConfig::default()
            },
        })
    }
}
