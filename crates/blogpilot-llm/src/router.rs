//! Ordered provider fallback for single draft requests.

use std::collections::HashMap;
use std::time::Duration;

use blogpilot_types::{DraftPayload, PipelineError, Result};

use crate::config::{LlmConfig, DEFAULT_PROVIDER, DEFAULT_REQUEST_TIMEOUT};
use crate::json::parse_draft;
use crate::{ChatRequest, DynProvider, GeminiAdapter, OpenAiCompatibleAdapter, ProviderAdapter, ProviderKind};

/// Phrases in a failure message that indicate an exhausted quota or rate limit.
const QUOTA_MARKERS: [&str; 8] = [
    "quota",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "insufficient",
    "resource_exhausted",
    "resource exhausted",
];

/// How the router reacts to one provider's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Try the next provider in order.
    Fallback,
    /// Stop routing and surface the error.
    Fatal,
}

/// Classify a provider failure. Timeouts only fall back when they come from
/// a non-primary provider.
pub fn classify_failure(err: &PipelineError, is_primary: bool) -> FailureClass {
    match err {
        PipelineError::MissingCredential { .. } => FailureClass::Fallback,
        PipelineError::Http {
            status: 401 | 403 | 429,
            ..
        } => FailureClass::Fallback,
        PipelineError::Timeout { .. } if !is_primary => FailureClass::Fallback,
        _ if mentions_quota(err) => FailureClass::Fallback,
        _ => FailureClass::Fatal,
    }
}

fn mentions_quota(err: &PipelineError) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    QUOTA_MARKERS.iter().any(|marker| message.contains(marker))
}

// ---------------------------------------------------------------------------
// ProviderRouter
// ---------------------------------------------------------------------------

/// Explicit per-run provider context: the registered adapters, their order,
/// model overrides and the per-call deadline.
pub struct ProviderRouter {
    providers: HashMap<ProviderKind, DynProvider>,
    order: Vec<ProviderKind>,
    model_overrides: HashMap<ProviderKind, String>,
    timeout: Duration,
}

impl ProviderRouter {
    /// An empty order collapses to the default provider.
    pub fn new(order: Vec<ProviderKind>) -> Self {
        let mut deduped: Vec<ProviderKind> = Vec::new();
        for kind in order {
            if !deduped.contains(&kind) {
                deduped.push(kind);
            }
        }
        if deduped.is_empty() {
            deduped.push(DEFAULT_PROVIDER);
        }
        Self {
            providers: HashMap::new(),
            order: deduped,
            model_overrides: HashMap::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build the router once per run. Providers without a credential are not
    /// registered and report a missing credential when reached.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut router = Self::new(config.provider_order.clone()).with_timeout(config.request_timeout);
        router.model_overrides = config.model_overrides.clone();

        for kind in router.order.clone() {
            let Some(key) = config.api_keys.get(&kind).cloned() else {
                continue;
            };
            let base_url = config.base_urls.get(&kind).cloned();
            match kind {
                ProviderKind::OpenAi | ProviderKind::Groq => {
                    let mut adapter = OpenAiCompatibleAdapter::new(kind, key);
                    if let Some(url) = base_url {
                        adapter = adapter.with_base_url(url);
                    }
                    router.register_provider(adapter);
                }
                ProviderKind::Gemini => {
                    let mut adapter = GeminiAdapter::new(key);
                    if let Some(url) = base_url {
                        adapter = adapter.with_base_url(url);
                    }
                    router.register_provider(adapter);
                }
            }
        }
        router
    }

    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let kind = provider.kind();
        self.providers.insert(kind, DynProvider::new(provider));
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model_override(mut self, kind: ProviderKind, model: impl Into<String>) -> Self {
        self.model_overrides.insert(kind, model.into());
        self
    }

    pub fn order(&self) -> &[ProviderKind] {
        &self.order
    }

    pub fn primary(&self) -> ProviderKind {
        self.order[0]
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&DynProvider> {
        self.providers.get(&kind)
    }

    /// Override, then the caller's hint (primary provider only), then the
    /// provider's own default.
    pub fn resolve_model(&self, kind: ProviderKind, model_hint: Option<&str>) -> String {
        if let Some(model) = self.model_overrides.get(&kind) {
            return model.clone();
        }
        if kind == self.primary() {
            if let Some(hint) = model_hint.filter(|h| !h.is_empty()) {
                return hint.to_string();
            }
        }
        match self.providers.get(&kind) {
            Some(provider) => provider.default_model().to_string(),
            None => kind.default_model().to_string(),
        }
    }

    /// Request one draft, walking the configured provider order until a
    /// provider succeeds or fails fatally.
    pub async fn call_llm(
        &self,
        system_prompt: &str,
        model_hint: Option<&str>,
        user_prompt: Option<&str>,
    ) -> Result<DraftPayload> {
        let mut last_err = None;
        for (index, kind) in self.order.iter().copied().enumerate() {
            let is_primary = index == 0;
            let request = ChatRequest::new(self.resolve_model(kind, model_hint), system_prompt, user_prompt);
            match self.call_provider(kind, &request).await {
                Ok(draft) => {
                    tracing::debug!(provider = %kind, model = %request.model, "Draft generated");
                    return Ok(draft);
                }
                Err(e) => match classify_failure(&e, is_primary) {
                    FailureClass::Fallback => {
                        tracing::warn!(provider = %kind, error = %e, "Provider unavailable, trying next");
                        // An unregistered fallback must not mask a real failure upstream of it.
                        let unregistered = matches!(e, PipelineError::MissingCredential { .. });
                        if last_err.is_none() || !unregistered {
                            last_err = Some(e);
                        }
                    }
                    FailureClass::Fatal => {
                        tracing::error!(provider = %kind, error = %e, "Provider failed");
                        return Err(e);
                    }
                },
            }
        }
        Err(last_err.unwrap_or_else(|| PipelineError::Config("no providers configured".into())))
    }

    async fn call_provider(&self, kind: ProviderKind, request: &ChatRequest) -> Result<DraftPayload> {
        let provider = self.providers.get(&kind).ok_or_else(|| PipelineError::MissingCredential {
            provider: kind.to_string(),
        })?;
        let text = match tokio::time::timeout(self.timeout, provider.generate(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PipelineError::Timeout {
                    provider: kind.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };
        parse_draft(kind.as_str(), &text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    const GOOD: &str = r#"{"title":"Farm stays","html":"<p>ok</p>"}"#;

    #[derive(Clone)]
    enum Behavior {
        Reply(&'static str),
        Fail(u16, &'static str),
        Hang,
    }

    struct ScriptedProvider {
        kind: ProviderKind,
        behavior: Behavior,
        calls: Arc<Mutex<Vec<(ProviderKind, String)>>>,
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        async fn generate(&self, request: &ChatRequest) -> Result<String> {
            self.calls.lock().unwrap().push((self.kind, request.model.clone()));
            match &self.behavior {
                Behavior::Reply(text) => Ok(text.to_string()),
                Behavior::Fail(status, message) => Err(PipelineError::Http {
                    provider: self.kind.to_string(),
                    status: *status,
                    message: message.to_string(),
                    retry_after_ms: None,
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(GOOD.to_string())
                }
            }
        }

        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn default_model(&self) -> &str {
            self.kind.default_model()
        }
    }

    fn router_with(
        specs: &[(ProviderKind, Behavior)],
    ) -> (ProviderRouter, Arc<Mutex<Vec<(ProviderKind, String)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut router = ProviderRouter::new(specs.iter().map(|(k, _)| *k).collect())
            .with_timeout(Duration::from_millis(50));
        for (kind, behavior) in specs {
            router.register_provider(ScriptedProvider {
                kind: *kind,
                behavior: behavior.clone(),
                calls: calls.clone(),
            });
        }
        (router, calls)
    }

    fn called(calls: &Arc<Mutex<Vec<(ProviderKind, String)>>>) -> Vec<ProviderKind> {
        calls.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn classification_rules() {
        let http = |status, message: &str| PipelineError::Http {
            provider: "p".into(),
            status,
            message: message.into(),
            retry_after_ms: None,
        };
        let timeout = PipelineError::Timeout {
            provider: "p".into(),
            timeout_ms: 1,
        };
        assert_eq!(classify_failure(&http(401, ""), true), FailureClass::Fallback);
        assert_eq!(classify_failure(&http(403, ""), true), FailureClass::Fallback);
        assert_eq!(classify_failure(&http(429, ""), true), FailureClass::Fallback);
        assert_eq!(
            classify_failure(&http(400, "You exceeded your current quota"), true),
            FailureClass::Fallback
        );
        assert_eq!(
            classify_failure(&http(500, "Insufficient balance"), true),
            FailureClass::Fallback
        );
        assert_eq!(classify_failure(&http(500, "boom"), true), FailureClass::Fatal);
        assert_eq!(classify_failure(&http(400, "bad request"), false), FailureClass::Fatal);
        assert_eq!(classify_failure(&timeout, true), FailureClass::Fatal);
        assert_eq!(classify_failure(&timeout, false), FailureClass::Fallback);
        assert_eq!(
            classify_failure(&PipelineError::MissingCredential { provider: "p".into() }, true),
            FailureClass::Fallback
        );
        assert_eq!(
            classify_failure(&PipelineError::NonJson { provider: "p".into() }, false),
            FailureClass::Fatal
        );
    }

    #[tokio::test]
    async fn primary_success_skips_others() {
        let (router, calls) = router_with(&[
            (ProviderKind::OpenAi, Behavior::Reply(GOOD)),
            (ProviderKind::Gemini, Behavior::Reply(GOOD)),
        ]);
        let draft = router.call_llm("sys", None, None).await.unwrap();
        assert_eq!(draft.title, "Farm stays");
        assert_eq!(called(&calls), vec![ProviderKind::OpenAi]);
    }

    #[tokio::test]
    async fn rate_limited_primary_falls_back_in_order() {
        let (router, calls) = router_with(&[
            (ProviderKind::Groq, Behavior::Fail(429, "slow down")),
            (ProviderKind::OpenAi, Behavior::Fail(401, "bad key")),
            (ProviderKind::Gemini, Behavior::Reply(GOOD)),
        ]);
        router.call_llm("sys", None, None).await.unwrap();
        assert_eq!(
            called(&calls),
            vec![ProviderKind::Groq, ProviderKind::OpenAi, ProviderKind::Gemini]
        );
    }

    #[tokio::test]
    async fn fatal_error_stops_routing() {
        let (router, calls) = router_with(&[
            (ProviderKind::OpenAi, Behavior::Fail(400, "bad request")),
            (ProviderKind::Gemini, Behavior::Reply(GOOD)),
        ]);
        let err = router.call_llm("sys", None, None).await.unwrap_err();
        assert_eq!(err.http_status(), Some(400));
        assert_eq!(called(&calls), vec![ProviderKind::OpenAi]);
    }

    #[tokio::test]
    async fn non_json_reply_is_fatal() {
        let (router, calls) = router_with(&[
            (ProviderKind::OpenAi, Behavior::Reply("sorry, I cannot")),
            (ProviderKind::Gemini, Behavior::Reply(GOOD)),
        ]);
        let err = router.call_llm("sys", None, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::NonJson { .. }));
        assert_eq!(called(&calls), vec![ProviderKind::OpenAi]);
    }

    #[tokio::test]
    async fn exhausted_providers_surface_last_error() {
        let (router, _calls) = router_with(&[
            (ProviderKind::OpenAi, Behavior::Fail(429, "slow down")),
            (ProviderKind::Gemini, Behavior::Fail(403, "forbidden")),
        ]);
        let err = router.call_llm("sys", None, None).await.unwrap_err();
        assert_eq!(err.http_status(), Some(403));
    }

    #[tokio::test]
    async fn missing_credential_falls_back() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut router = ProviderRouter::new(vec![ProviderKind::OpenAi, ProviderKind::Gemini]);
        router.register_provider(ScriptedProvider {
            kind: ProviderKind::Gemini,
            behavior: Behavior::Reply(GOOD),
            calls: calls.clone(),
        });
        router.call_llm("sys", None, None).await.unwrap();
        assert_eq!(called(&calls), vec![ProviderKind::Gemini]);
    }

    #[tokio::test]
    async fn unregistered_fallback_keeps_upstream_rate_limit() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut router = ProviderRouter::new(crate::DEFAULT_PROVIDER_ORDER.to_vec());
        router.register_provider(ScriptedProvider {
            kind: ProviderKind::OpenAi,
            behavior: Behavior::Fail(429, "slow down"),
            calls: calls.clone(),
        });
        let err = router.call_llm("sys", None, None).await.unwrap_err();
        assert_eq!(err.http_status(), Some(429));
        assert!(err.is_transient());
        assert_eq!(called(&calls), vec![ProviderKind::OpenAi]);
    }

    #[tokio::test]
    async fn no_registered_provider_reports_missing_credential() {
        let router = ProviderRouter::new(vec![ProviderKind::OpenAi, ProviderKind::Gemini]);
        let err = router.call_llm("sys", None, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingCredential { ref provider } if provider == "openai"));
    }

    #[tokio::test]
    async fn primary_timeout_is_fatal() {
        let (router, calls) = router_with(&[
            (ProviderKind::OpenAi, Behavior::Hang),
            (ProviderKind::Gemini, Behavior::Reply(GOOD)),
        ]);
        let err = router.call_llm("sys", None, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { timeout_ms: 50, .. }));
        assert_eq!(called(&calls), vec![ProviderKind::OpenAi]);
    }

    #[tokio::test]
    async fn secondary_timeout_falls_back() {
        let (router, calls) = router_with(&[
            (ProviderKind::OpenAi, Behavior::Fail(429, "slow down")),
            (ProviderKind::Groq, Behavior::Hang),
            (ProviderKind::Gemini, Behavior::Reply(GOOD)),
        ]);
        router.call_llm("sys", None, None).await.unwrap();
        assert_eq!(
            called(&calls),
            vec![ProviderKind::OpenAi, ProviderKind::Groq, ProviderKind::Gemini]
        );
    }

    #[tokio::test]
    async fn model_resolution_order() {
        let (router, calls) = router_with(&[
            (ProviderKind::OpenAi, Behavior::Fail(429, "slow down")),
            (ProviderKind::Gemini, Behavior::Reply(GOOD)),
        ]);
        router.call_llm("sys", Some("gpt-4o"), None).await.unwrap();
        let models: Vec<String> = calls.lock().unwrap().iter().map(|(_, m)| m.clone()).collect();
        assert_eq!(models, vec!["gpt-4o".to_string(), "gemini-2.0-flash".to_string()]);

        let router = ProviderRouter::new(vec![ProviderKind::OpenAi])
            .with_model_override(ProviderKind::OpenAi, "gpt-4.1-mini");
        assert_eq!(router.resolve_model(ProviderKind::OpenAi, Some("gpt-4o")), "gpt-4.1-mini");
    }

    #[test]
    fn new_dedups_and_defaults() {
        let router = ProviderRouter::new(vec![ProviderKind::Gemini, ProviderKind::Gemini]);
        assert_eq!(router.order(), &[ProviderKind::Gemini]);
        let router = ProviderRouter::new(vec![]);
        assert_eq!(router.primary(), ProviderKind::OpenAi);
    }

    #[test]
    fn from_config_registers_only_credentialed_providers() {
        let mut config = LlmConfig::default();
        config.api_keys.insert(ProviderKind::Gemini, "g".into());
        let router = ProviderRouter::from_config(&config);
        assert!(router.provider(ProviderKind::OpenAi).is_none());
        assert_eq!(router.provider(ProviderKind::Gemini).map(|p| p.kind()), Some(ProviderKind::Gemini));
    }
}
