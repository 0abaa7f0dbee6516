//! The operator-supplied control prompt and the per-row system prompt built from it.

use blogpilot_types::{PipelineError, Result};

/// Placeholder replaced by the row's source URL.
pub const URL_PLACEHOLDER: &str = "{{URL_BLOG}}";

/// Shortest control prompt accepted.
pub const MIN_TEMPLATE_LEN: usize = 50;

/// Output rules appended to every system prompt.
pub const RULES_SUFFIX: &str = "Rules: Return JSON only {title, seo_title, meta_desc, html, images:[{src,alt}]}; HTML Shopify-safe; NO YEARS; up to 4 images.";

/// A validated control prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    raw: String,
}

impl PromptTemplate {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.chars().count() < MIN_TEMPLATE_LEN {
            return Err(PipelineError::Config(format!(
                "Invalid LLM_CONTROL_PROMPT: must be at least {MIN_TEMPLATE_LEN} characters"
            )));
        }
        if !raw.contains(URL_PLACEHOLDER) {
            return Err(PipelineError::Config(format!(
                "Invalid LLM_CONTROL_PROMPT: missing {URL_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self { raw })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// System prompt for one row: every placeholder replaced, then a blank
    /// line and the rules suffix.
    pub fn render(&self, source_url: &str) -> String {
        format!("{}\n\n{}", self.raw.replace(URL_PLACEHOLDER, source_url), RULES_SUFFIX)
    }
}
