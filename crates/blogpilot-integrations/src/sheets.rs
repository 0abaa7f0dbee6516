//! Work queue backed by a Google Sheets range (column A source URL, column B
//! published URL, first row a header).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use blogpilot_llm::send_error;
use blogpilot_pipeline::{QueueStatusSource, QueueStore};
use blogpilot_types::{pending_items, PipelineError, QueueItem, QueueStatus, Result};

use crate::http::{read_json, require};

const SERVICE: &str = "sheets";
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";
pub const DEFAULT_QUEUE_RANGE: &str = "Sheet1!A:B";
pub const DEFAULT_CONFIG_RANGE: &str = "CONFIG!A:B";
pub const DEFAULT_SHEETS_TIMEOUT: Duration = Duration::from_millis(20_000);

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub access_token: String,
    pub queue_range: String,
    pub config_range: String,
    pub timeout: Duration,
    pub base_url: String,
}

impl SheetsConfig {
    /// Reads `SHEETS_ID`, `SHEETS_ACCESS_TOKEN`, `SHEETS_RANGE`,
    /// `CONFIG_RANGE` and `SHEETS_TIMEOUT_MS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            spreadsheet_id: require(lookup("SHEETS_ID"), "SHEETS_ID")?,
            access_token: require(lookup("SHEETS_ACCESS_TOKEN"), "SHEETS_ACCESS_TOKEN")?,
            queue_range: lookup("SHEETS_RANGE")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_QUEUE_RANGE.to_string()),
            config_range: lookup("CONFIG_RANGE")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_CONFIG_RANGE.to_string()),
            timeout: lookup("SHEETS_TIMEOUT_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SHEETS_TIMEOUT),
            base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(|c| c.trim()).unwrap_or("")
}

/// Cell grid from a `values.get` response.
pub fn parse_values(body: &serde_json::Value) -> Vec<Vec<String>> {
    body["values"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|c| match c {
                                    serde_json::Value::String(s) => s.clone(),
                                    serde_json::Value::Null => String::new(),
                                    other => other.to_string(),
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Queue rows below the header, trimmed.
pub fn queue_rows(values: &[Vec<String>]) -> Vec<QueueItem> {
    values
        .iter()
        .skip(1)
        .map(|row| QueueItem::new(cell(row, 0), cell(row, 1)))
        .collect()
}

/// Key/value pairs below the header; rows without a key are skipped.
pub fn config_map(values: &[Vec<String>]) -> HashMap<String, String> {
    values
        .iter()
        .skip(1)
        .filter(|row| !cell(row, 0).is_empty())
        .map(|row| (cell(row, 0).to_string(), cell(row, 1).to_string()))
        .collect()
}

pub fn queue_status(values: &[Vec<String>], sample_limit: usize) -> QueueStatus {
    let pending = pending_items(queue_rows(values), usize::MAX);
    QueueStatus {
        total_pending: pending.len(),
        sample_urls: pending
            .into_iter()
            .take(sample_limit)
            .map(|item| item.source_url)
            .collect(),
    }
}

/// Single-cell column B range for the row whose column A equals `source_url`.
pub fn backfill_range(queue_range: &str, values: &[Vec<String>], source_url: &str) -> Result<String> {
    let index = values
        .iter()
        .position(|row| cell(row, 0) == source_url)
        .ok_or_else(|| PipelineError::Queue(format!("Row not found for backfill: {source_url}")))?;
    let sheet = queue_range
        .split_once('!')
        .map(|(sheet, _)| sheet)
        .filter(|s| !s.is_empty())
        .unwrap_or("Sheet1");
    let row = index + 1;
    Ok(format!("{sheet}!B{row}:B{row}"))
}

// ---------------------------------------------------------------------------
// SheetsQueue
// ---------------------------------------------------------------------------

pub struct SheetsQueue {
    config: SheetsConfig,
    client: reqwest::Client,
}

impl SheetsQueue {
    pub fn new(config: SheetsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn values_url(&self, range: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.config.base_url)
            .map_err(|e| PipelineError::Config(format!("invalid Sheets base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| PipelineError::Config("Sheets base URL cannot be a base".into()))?
            .extend(["spreadsheets", self.config.spreadsheet_id.as_str(), "values", range]);
        Ok(url)
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let resp = self
            .client
            .get(self.values_url(range)?)
            .bearer_auth(&self.config.access_token)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        Ok(parse_values(&read_json(SERVICE, resp).await?))
    }

    async fn put_value(&self, range: &str, value: &str) -> Result<()> {
        let resp = self
            .client
            .put(self.values_url(range)?)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&self.config.access_token)
            .timeout(self.config.timeout)
            .json(&json!({ "values": [[value]] }))
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        read_json(SERVICE, resp).await.map(|_| ())
    }
}

#[async_trait]
impl QueueStore for SheetsQueue {
    async fn read_pending(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let values = self.get_values(&self.config.queue_range).await?;
        Ok(pending_items(queue_rows(&values), limit))
    }

    async fn read_config(&self) -> Result<HashMap<String, String>> {
        let values = self.get_values(&self.config.config_range).await?;
        Ok(config_map(&values))
    }

    async fn backfill(&self, source_url: &str, published_url: &str) -> Result<()> {
        // Re-read so the row index reflects the sheet as it is now.
        let values = self.get_values(&self.config.queue_range).await?;
        let range = backfill_range(&self.config.queue_range, &values, source_url)?;
        self.put_value(&range, published_url).await?;
        tracing::debug!(range = %range, url = %source_url, "Backfilled published URL");
        Ok(())
    }
}

#[async_trait]
impl QueueStatusSource for SheetsQueue {
    async fn queue_status(&self, sample_limit: usize) -> Result<QueueStatus> {
        let values = self.get_values(&self.config.queue_range).await?;
        Ok(queue_status(&values, sample_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn sheet() -> Vec<Vec<String>> {
        grid(&[
            &["url_blog_crawl", "url_blog_shopify"],
            &[" https://src/a ", ""],
            &["https://src/b", "https://shop/b"],
            &["https://src/c"],
            &[],
            &["https://src/d", "  "],
        ])
    }

    #[test]
    fn parse_values_handles_ragged_rows() {
        let body = json!({"values": [["h1", "h2"], ["a"], ["b", 3]]});
        let values = parse_values(&body);
        assert_eq!(values[1], vec!["a".to_string()]);
        assert_eq!(values[2], vec!["b".to_string(), "3".to_string()]);
        assert!(parse_values(&json!({})).is_empty());
    }

    #[test]
    fn pending_rows_skip_header_and_published() {
        let pending = pending_items(queue_rows(&sheet()), 2);
        let urls: Vec<_> = pending.iter().map(|r| r.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://src/a", "https://src/c"]);
    }

    #[test]
    fn status_counts_all_pending_and_samples() {
        let status = queue_status(&sheet(), 2);
        assert_eq!(status.total_pending, 3);
        assert_eq!(status.sample_urls, vec!["https://src/a", "https://src/c"]);
    }

    #[test]
    fn config_map_trims_and_skips_blank_keys() {
        let values = grid(&[
            &["key", "value"],
            &[" BLOG_HANDLE ", " news "],
            &["", "orphan"],
            &["AUTHOR"],
        ]);
        let map = config_map(&values);
        assert_eq!(map.get("BLOG_HANDLE").map(String::as_str), Some("news"));
        assert_eq!(map.get("AUTHOR").map(String::as_str), Some(""));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn backfill_targets_column_b_of_matching_row() {
        assert_eq!(
            backfill_range("Queue!A:B", &sheet(), "https://src/c").unwrap(),
            "Queue!B4:B4"
        );
        assert_eq!(backfill_range("A:B", &sheet(), "https://src/a").unwrap(), "Sheet1!B2:B2");
        let err = backfill_range("Sheet1!A:B", &sheet(), "https://src/zzz").unwrap_err();
        assert_eq!(err.to_string(), "Queue error: Row not found for backfill: https://src/zzz");
    }

    #[test]
    fn config_requires_sheet_id_and_token() {
        let err = SheetsConfig::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains("SHEETS_ID"));

        let config = SheetsConfig::from_lookup(|key| match key {
            "SHEETS_ID" => Some("sheet-1".into()),
            "SHEETS_ACCESS_TOKEN" => Some("tok".into()),
            "SHEETS_TIMEOUT_MS" => Some("0".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.queue_range, DEFAULT_QUEUE_RANGE);
        assert_eq!(config.config_range, DEFAULT_CONFIG_RANGE);
        assert_eq!(config.timeout, DEFAULT_SHEETS_TIMEOUT);
    }

    #[test]
    fn values_url_encodes_range() {
        let queue = SheetsQueue::new(
            SheetsConfig::from_lookup(|key| match key {
                "SHEETS_ID" => Some("abc".into()),
                "SHEETS_ACCESS_TOKEN" => Some("tok".into()),
                _ => None,
            })
            .unwrap(),
        );
        let url = queue.values_url("My Sheet!A:B").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/My%20Sheet!A:B"
        );
    }
}
