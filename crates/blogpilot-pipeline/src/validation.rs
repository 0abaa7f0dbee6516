//! Content rules a draft must satisfy before it is previewed or published.

use std::sync::OnceLock;

use regex::Regex;

use blogpilot_types::{DraftPayload, PipelineError, Result};

fn year_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid year regex"))
}

/// Field name and matched token of the first four-digit year in the draft.
pub fn find_year(draft: &DraftPayload) -> Option<(&'static str, String)> {
    draft.text_fields().into_iter().find_map(|(field, text)| {
        year_pattern()
            .find(text)
            .map(|m| (field, m.as_str().to_string()))
    })
}

/// Reject drafts that mention a year in the title, SEO title, meta
/// description or body.
pub fn validate_no_years(draft: &DraftPayload) -> Result<()> {
    match find_year(draft) {
        Some((field, year)) => {
            tracing::debug!(field, year = %year, "Draft mentions a year");
            Err(PipelineError::InvalidDraft("NO YEARS violation".into()))
        }
        None => Ok(()),
    }
}
