//! Local review artifacts: one HTML page and one JSON record per draft.

use std::path::{Path, PathBuf};

use serde::Serialize;

use blogpilot_types::{DraftPayload, Result};

const MAX_SLUG_LEN: usize = 80;

/// Lowercase ASCII alphanumerics joined by single dashes, capped at 80
/// characters. Falls back to `draft` when nothing usable remains.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let capped = &slug[..slug.len().min(MAX_SLUG_LEN)];
    let capped = capped.trim_end_matches('-');
    if capped.is_empty() {
        "draft".to_string()
    } else {
        capped.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewPaths {
    pub html: PathBuf,
    pub json: PathBuf,
}

#[derive(Serialize)]
struct PreviewRecord<'a> {
    source: &'a str,
    blog: &'a str,
    author: &'a str,
    content: &'a DraftPayload,
}

/// Writes review artifacts under one directory.
#[derive(Debug, Clone)]
pub struct PreviewWriter {
    dir: PathBuf,
}

impl PreviewWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write(
        &self,
        source_url: &str,
        blog_handle: &str,
        author: &str,
        draft: &DraftPayload,
    ) -> Result<PreviewPaths> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let slug = slugify(&draft.title);
        let paths = PreviewPaths {
            html: self.dir.join(format!("{slug}.html")),
            json: self.dir.join(format!("{slug}.json")),
        };

        tokio::fs::write(&paths.html, render_html(blog_handle, author, draft)).await?;
        let record = PreviewRecord {
            source: source_url,
            blog: blog_handle,
            author,
            content: draft,
        };
        tokio::fs::write(&paths.json, serde_json::to_string_pretty(&record)?).await?;
        Ok(paths)
    }
}

fn render_html(blog_handle: &str, author: &str, draft: &DraftPayload) -> String {
    format!(
        "<!doctype html><meta charset=\"utf-8\">\n\
         <title>{title}</title>\n\
         <h1>{title}</h1>\n\
         <p><strong>Blog:</strong> {blog_handle}</p>\n\
         <p><strong>Author:</strong> {author}</p>\n\
         <p><strong>SEO Title:</strong> {seo}</p>\n\
         <p><strong>Meta Desc:</strong> {meta}</p>\n\
         <hr/>\n\
         {body}",
        title = draft.title,
        seo = draft.seo_title.as_deref().unwrap_or(""),
        meta = draft.meta_description.as_deref().unwrap_or(""),
        body = draft.html,
    )
}
