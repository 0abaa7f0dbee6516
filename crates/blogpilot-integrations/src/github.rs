//! GitHub Actions and Issues as the supervisor's run history, flag store,
//! dispatcher and incident tracker.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use blogpilot_llm::send_error;
use blogpilot_pipeline::{
    validate_dispatch_reason, FlagStore, IncidentTracker, RunHistory, Severity, WorkflowDispatcher,
};
use blogpilot_types::{PipelineError, Result, RunInfo, RunMode};

use crate::http::{read_body, read_json, require};

const SERVICE: &str = "github";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_WORKFLOW_FILE: &str = "publish.yml";
pub const DEFAULT_DISPATCH_REF: &str = "main";
const USER_AGENT: &str = concat!("blogpilot/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: String,
    /// `owner/name`.
    pub repository: String,
    pub workflow_file: String,
    pub dispatch_ref: String,
    pub api_base: String,
}

impl GitHubConfig {
    /// `GITHUB_REPOSITORY` wins over `GITHUB_OWNER` + `GITHUB_REPO`;
    /// `DISPATCH_REF` wins over `GITHUB_REF`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = require(lookup("GITHUB_TOKEN"), "GITHUB_TOKEN")?;
        let repository = match lookup("GITHUB_REPOSITORY").filter(|v| !v.trim().is_empty()) {
            Some(repo) => repo,
            None => format!(
                "{}/{}",
                require(lookup("GITHUB_OWNER"), "GITHUB_OWNER")?,
                require(lookup("GITHUB_REPO"), "GITHUB_REPO")?
            ),
        };
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            token,
            repository,
            workflow_file: non_empty("WORKFLOW_FILE").unwrap_or_else(|| DEFAULT_WORKFLOW_FILE.to_string()),
            dispatch_ref: non_empty("DISPATCH_REF")
                .or_else(|| non_empty("GITHUB_REF"))
                .unwrap_or_else(|| DEFAULT_DISPATCH_REF.to_string()),
            api_base: DEFAULT_GITHUB_API.to_string(),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.repository, path)
    }

    fn workflow_url(&self, path: &str) -> String {
        self.repo_url(&format!("actions/workflows/{}/{}", self.workflow_file, path))
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRuns {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    html_url: String,
}

/// Runs from a `workflows/{file}/runs` listing, most recent first.
pub fn parse_runs(body: &serde_json::Value) -> Result<Vec<RunInfo>> {
    let listing: WorkflowRuns = serde_json::from_value(body.clone())?;
    Ok(listing
        .workflow_runs
        .into_iter()
        .map(|run| RunInfo {
            id: run.id,
            status: run.status.unwrap_or_default(),
            conclusion: run.conclusion,
            mode: RunMode::from_run_name(run.name.as_deref()),
            url: run.html_url,
        })
        .collect())
}

pub fn incident_issue(severity: Severity, summary: &str, details: &str) -> serde_json::Value {
    let body = if details.trim().is_empty() { summary } else { details };
    json!({
        "title": format!("[{}] {summary}", severity.as_str().to_ascii_uppercase()),
        "body": body,
        "labels": ["incident", severity.as_str()],
    })
}

pub struct GitHubClient {
    config: GitHubConfig,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| send_error(SERVICE, e))
    }
}

#[async_trait]
impl RunHistory for GitHubClient {
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunInfo>> {
        let url = self.config.workflow_url(&format!("runs?per_page={limit}"));
        let resp = self.send(self.request(reqwest::Method::GET, url)).await?;
        parse_runs(&read_json(SERVICE, resp).await?)
    }
}

#[async_trait]
impl FlagStore for GitHubClient {
    async fn read_flag(&self, name: &str) -> Result<Option<String>> {
        let url = self.config.repo_url(&format!("actions/variables/{name}"));
        let resp = self.send(self.request(reqwest::Method::GET, url)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = read_json(SERVICE, resp).await?;
        Ok(body["value"].as_str().map(String::from))
    }

    /// Update the variable, creating it when it does not exist yet.
    async fn write_flag(&self, name: &str, value: &str) -> Result<()> {
        let payload = json!({ "name": name, "value": value });
        let url = self.config.repo_url(&format!("actions/variables/{name}"));
        let resp = self
            .send(self.request(reqwest::Method::PATCH, url).json(&payload))
            .await?;
        if resp.status() != reqwest::StatusCode::NOT_FOUND {
            return read_body(SERVICE, resp).await.map(|_| ());
        }
        tracing::debug!(flag = name, "Variable missing, creating it");
        let url = self.config.repo_url("actions/variables");
        let resp = self
            .send(self.request(reqwest::Method::POST, url).json(&payload))
            .await?;
        read_body(SERVICE, resp).await.map(|_| ())
    }
}

#[async_trait]
impl WorkflowDispatcher for GitHubClient {
    async fn dispatch(&self, mode: RunMode, reason: &str) -> Result<()> {
        validate_dispatch_reason(reason)?;
        let payload = json!({
            "ref": self.config.dispatch_ref,
            "inputs": { "mode": mode.as_str(), "reason": reason },
        });
        let url = self.config.workflow_url("dispatches");
        let resp = self
            .send(self.request(reqwest::Method::POST, url).json(&payload))
            .await?;
        read_body(SERVICE, resp)
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Dispatch(e.to_string()))
    }
}

#[async_trait]
impl IncidentTracker for GitHubClient {
    async fn open_incident(&self, severity: Severity, summary: &str, details: &str) -> Result<()> {
        let url = self.config.repo_url("issues");
        let resp = self
            .send(
                self.request(reqwest::Method::POST, url)
                    .json(&incident_issue(severity, summary, details)),
            )
            .await?;
        read_body(SERVICE, resp).await?;
        tracing::info!(severity = %severity, summary, "Incident opened");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn config_prefers_repository_and_dispatch_ref() {
        let config = GitHubConfig::from_lookup(lookup(&[
            ("GITHUB_TOKEN", "t"),
            ("GITHUB_REPOSITORY", "acme/blog"),
            ("GITHUB_OWNER", "other"),
            ("GITHUB_REPO", "other"),
            ("GITHUB_REF", "refs/heads/dev"),
            ("DISPATCH_REF", "release"),
        ]))
        .unwrap();
        assert_eq!(config.repository, "acme/blog");
        assert_eq!(config.dispatch_ref, "release");
        assert_eq!(config.workflow_file, "publish.yml");
        assert_eq!(
            config.workflow_url("dispatches"),
            "https://api.github.com/repos/acme/blog/actions/workflows/publish.yml/dispatches"
        );
    }

    #[test]
    fn config_builds_repository_from_owner_and_name() {
        let config = GitHubConfig::from_lookup(lookup(&[
            ("GITHUB_TOKEN", "t"),
            ("GITHUB_OWNER", "acme"),
            ("GITHUB_REPO", "blog"),
        ]))
        .unwrap();
        assert_eq!(config.repository, "acme/blog");
        assert_eq!(config.dispatch_ref, "main");

        let err = GitHubConfig::from_lookup(lookup(&[("GITHUB_TOKEN", "t")])).unwrap_err();
        assert!(err.to_string().contains("GITHUB_OWNER"));
    }

    #[test]
    fn runs_parsed_with_mode_from_name() {
        let body = json!({"workflow_runs": [
            {"id": 3, "name": "Publish articles", "status": "completed", "conclusion": "failure", "html_url": "https://gh/3"},
            {"id": 2, "name": "Review drafts", "status": "in_progress", "conclusion": null, "html_url": "https://gh/2"},
            {"id": 1, "status": "completed", "conclusion": "success", "html_url": "https://gh/1"}
        ]});
        let runs = parse_runs(&body).unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].mode, RunMode::Publish);
        assert!(runs[0].is_failure());
        assert_eq!(runs[1].mode, RunMode::Review);
        assert_eq!(runs[1].conclusion, None);
        assert_eq!(runs[2].mode, RunMode::Review);
        assert!(runs[2].is_success());
        assert!(parse_runs(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn incident_title_and_labels() {
        let issue = incident_issue(Severity::High, "Pipeline unstable", "");
        assert_eq!(issue["title"], "[HIGH] Pipeline unstable");
        assert_eq!(issue["body"], "Pipeline unstable");
        assert_eq!(issue["labels"], json!(["incident", "high"]));

        let detailed = incident_issue(Severity::Low, "x", "{\"runs\": []}");
        assert_eq!(detailed["body"], "{\"runs\": []}");
    }
}
