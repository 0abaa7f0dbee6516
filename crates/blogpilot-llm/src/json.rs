//! Lenient parsing of model output into a [`DraftPayload`].

use std::sync::OnceLock;

use regex::Regex;

use blogpilot_types::{DraftPayload, PipelineError, Result};

fn leading_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```[a-zA-Z]*\n?").expect("valid fence regex"))
}

/// Strip Markdown code fences and curly quotes, then parse as JSON. Falls
/// back to the span between the first `{` and the last `}`.
pub fn parse_json_relaxed(input: &str) -> Option<serde_json::Value> {
    let trimmed = input.trim();
    let unfenced = leading_fence().replace(trimmed, "");
    let unfenced = unfenced.trim_end();
    let unfenced = unfenced.strip_suffix("```").unwrap_or(unfenced);
    let normalized = unfenced
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    if let Ok(value) = serde_json::from_str(&normalized) {
        return Some(value);
    }

    let start = normalized.find('{')?;
    let end = normalized.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&normalized[start..=end]).ok()
}

/// Parse provider text into a draft. Unparseable text is a non-JSON failure;
/// JSON of the wrong shape is an invalid draft.
pub fn parse_draft(provider: &str, text: &str) -> Result<DraftPayload> {
    let value = parse_json_relaxed(text).ok_or_else(|| PipelineError::NonJson {
        provider: provider.to_string(),
    })?;
    serde_json::from_value(value)
        .map_err(|e| PipelineError::InvalidDraft(format!("unexpected draft shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let v = parse_json_relaxed(r#"{"title":"a","html":"b"}"#).unwrap();
        assert_eq!(v["title"], "a");
    }

    #[test]
    fn strips_code_fences() {
        let v = parse_json_relaxed("```json\n{\"title\":\"a\",\"html\":\"b\"}\n```").unwrap();
        assert_eq!(v["html"], "b");
    }

    #[test]
    fn normalizes_curly_quotes() {
        let v = parse_json_relaxed("{\u{201C}title\u{201D}: \u{201C}It\u{2019}s\u{201D}}").unwrap();
        assert_eq!(v["title"], "It's");
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let v = parse_json_relaxed("Sure! Here you go: {\"title\":\"x\"} hope it helps").unwrap();
        assert_eq!(v["title"], "x");
    }

    #[test]
    fn rejects_text_without_object() {
        assert!(parse_json_relaxed("no json here").is_none());
        assert!(parse_json_relaxed("} backwards {").is_none());
    }

    #[test]
    fn parse_draft_classifies_failures() {
        let err = parse_draft("openai", "not json").unwrap_err();
        assert!(matches!(err, PipelineError::NonJson { ref provider } if provider == "openai"));
        assert_eq!(err.to_string(), "LLM returned non-JSON (openai)");

        let err = parse_draft("openai", r#"{"title":"missing html"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDraft(_)));
    }

    #[test]
    fn parse_draft_success() {
        let draft = parse_draft(
            "gemini",
            "```\n{\"title\":\"T\",\"seo_title\":\"S\",\"meta_desc\":\"M\",\"html\":\"<p>x</p>\",\"images\":[{\"src\":\"u\"}]}\n```",
        )
        .unwrap();
        assert_eq!(draft.title, "T");
        assert_eq!(draft.meta_description.as_deref(), Some("M"));
        assert_eq!(draft.images[0].src, "u");
    }
}
