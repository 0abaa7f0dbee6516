//! Generation-layer settings, resolved once at startup.

use std::collections::HashMap;
use std::time::Duration;

use crate::ProviderKind;

pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::OpenAi;
pub const DEFAULT_PROVIDER_ORDER: [ProviderKind; 2] = [ProviderKind::OpenAi, ProviderKind::Gemini];
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_BATCH_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider_order: Vec<ProviderKind>,
    pub model_overrides: HashMap<ProviderKind, String>,
    pub api_keys: HashMap<ProviderKind, String>,
    pub base_urls: HashMap<ProviderKind, String>,
    /// Applied to the primary provider when it has no override.
    pub model_hint: Option<String>,
    pub use_batch: bool,
    pub request_timeout: Duration,
    pub batch_poll_interval: Duration,
    pub batch_max_wait: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider_order: DEFAULT_PROVIDER_ORDER.to_vec(),
            model_overrides: HashMap::new(),
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
            model_hint: None,
            use_batch: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            batch_poll_interval: DEFAULT_BATCH_POLL_INTERVAL,
            batch_max_wait: DEFAULT_BATCH_MAX_WAIT,
        }
    }
}

impl LlmConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve every setting through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self {
            provider_order: parse_provider_order(get("LLM_PROVIDER_ORDER").as_deref()),
            model_hint: get("LLM_MODEL"),
            use_batch: get("USE_BATCH").as_deref() == Some("true"),
            ..Self::default()
        };

        for kind in ProviderKind::ALL {
            let prefix = kind.env_prefix();
            let key = get(&format!("{prefix}_API_KEY")).or_else(|| match kind {
                ProviderKind::Gemini => get("GOOGLE_API_KEY"),
                _ => None,
            });
            if let Some(key) = key {
                config.api_keys.insert(kind, key);
            }
            if let Some(model) = get(&format!("{prefix}_MODEL")) {
                config.model_overrides.insert(kind, model);
            }
            if let Some(url) = get(&format!("{prefix}_BASE_URL")) {
                config.base_urls.insert(kind, url);
            }
        }

        if let Some(ms) = get("LLM_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()).filter(|ms| *ms > 0) {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = get("BATCH_POLL_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            config.batch_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = get("BATCH_MAX_WAIT_MS").and_then(|v| v.parse::<u64>().ok()).filter(|ms| *ms > 0) {
            config.batch_max_wait = Duration::from_millis(ms);
        }
        config
    }
}

/// Parse a comma-separated provider list, dropping unknown and duplicate
/// entries. An empty result collapses to the single default provider.
pub fn parse_provider_order(raw: Option<&str>) -> Vec<ProviderKind> {
    let Some(raw) = raw else {
        return DEFAULT_PROVIDER_ORDER.to_vec();
    };
    let mut order: Vec<ProviderKind> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse::<ProviderKind>() {
            Ok(kind) if !order.contains(&kind) => order.push(kind),
            Ok(_) => {}
            Err(e) => tracing::warn!(entry, error = %e, "Ignoring provider in LLM_PROVIDER_ORDER"),
        }
    }
    if order.is_empty() {
        order.push(DEFAULT_PROVIDER);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn provider_order_defaults() {
        assert_eq!(parse_provider_order(None), vec![ProviderKind::OpenAi, ProviderKind::Gemini]);
    }

    #[test]
    fn provider_order_dedups_and_filters() {
        assert_eq!(
            parse_provider_order(Some("gemini, openai, gemini,unknown,,groq")),
            vec![ProviderKind::Gemini, ProviderKind::OpenAi, ProviderKind::Groq]
        );
    }

    #[test]
    fn provider_order_empty_after_filtering_uses_default() {
        assert_eq!(parse_provider_order(Some("nope, ,")), vec![ProviderKind::OpenAi]);
    }

    #[test]
    fn from_lookup_reads_keys_models_and_toggles() {
        let pairs = [
            ("LLM_PROVIDER_ORDER", "groq,openai"),
            ("OPENAI_API_KEY", "sk-1"),
            ("GOOGLE_API_KEY", "g-1"),
            ("GROQ_MODEL", "mixtral"),
            ("USE_BATCH", "true"),
            ("LLM_TIMEOUT_MS", "5000"),
            ("LLM_MODEL", "gpt-4o"),
            ("BATCH_POLL_INTERVAL_MS", "0"),
        ];
        let config = LlmConfig::from_lookup(lookup(&pairs));
        assert_eq!(config.provider_order, vec![ProviderKind::Groq, ProviderKind::OpenAi]);
        assert_eq!(config.api_keys.get(&ProviderKind::OpenAi).map(String::as_str), Some("sk-1"));
        assert_eq!(config.api_keys.get(&ProviderKind::Gemini).map(String::as_str), Some("g-1"));
        assert!(!config.api_keys.contains_key(&ProviderKind::Groq));
        assert_eq!(config.model_overrides.get(&ProviderKind::Groq).map(String::as_str), Some("mixtral"));
        assert_eq!(config.model_hint.as_deref(), Some("gpt-4o"));
        assert!(config.use_batch);
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.batch_poll_interval, Duration::ZERO);
    }

    #[test]
    fn from_lookup_defaults() {
        let config = LlmConfig::from_lookup(|_| None);
        assert_eq!(config.provider_order, DEFAULT_PROVIDER_ORDER.to_vec());
        assert!(!config.use_batch);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.batch_poll_interval, DEFAULT_BATCH_POLL_INTERVAL);
        assert!(config.api_keys.is_empty());
    }
}
