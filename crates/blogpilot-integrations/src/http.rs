use blogpilot_llm::{map_http_error, send_error};
use blogpilot_types::{PipelineError, Result};

/// Body of a successful response; any other status becomes an HTTP error
/// attributed to `service`.
pub(crate) async fn read_body(service: &str, resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.text().await.map_err(|e| send_error(service, e))?;
    if !status.is_success() {
        return Err(map_http_error(service, status, &headers, &body));
    }
    Ok(body)
}

pub(crate) async fn read_json(service: &str, resp: reqwest::Response) -> Result<serde_json::Value> {
    let body = read_body(service, resp).await?;
    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&body).map_err(|_| PipelineError::NonJson {
        provider: service.to_string(),
    })
}

pub(crate) fn require(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PipelineError::Config(format!("Missing required env var {name}")))
}
