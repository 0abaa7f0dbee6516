use async_trait::async_trait;

use blogpilot_types::{BatchGenerationResult, BatchJobItem, DraftPayload, Result};

use crate::{BatchBackend, ChatRequest, ProviderKind};

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// Capability interface shared by every provider variant.
///
/// `generate` returns the raw text the model produced; the router owns
/// parsing it into a [`DraftPayload`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn generate(&self, request: &ChatRequest) -> Result<String>;
    fn kind(&self) -> ProviderKind;
    fn default_model(&self) -> &str;

    /// Asynchronous bulk generation, for providers that offer it.
    fn batch_backend(&self) -> Option<&dyn BatchBackend> {
        None
    }
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

pub struct DynProvider(Box<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn generate(&self, request: &ChatRequest) -> Result<String> {
        self.0.generate(request).await
    }

    pub fn kind(&self) -> ProviderKind {
        self.0.kind()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }

    pub fn batch_backend(&self) -> Option<&dyn BatchBackend> {
        self.0.batch_backend()
    }
}

// ---------------------------------------------------------------------------
// DraftGenerator
// ---------------------------------------------------------------------------

/// What the queue processor needs from the generation layer.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    /// One live draft, routed across providers.
    async fn generate_draft(
        &self,
        system_prompt: &str,
        model_hint: Option<&str>,
        user_prompt: Option<&str>,
    ) -> Result<DraftPayload>;

    /// Drafts for many rows at once, keyed by [`BatchJobItem::id`].
    async fn generate_batch(
        &self,
        items: &[BatchJobItem],
        model_hint: Option<&str>,
    ) -> Result<BatchGenerationResult>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
