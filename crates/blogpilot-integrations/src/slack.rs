use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use blogpilot_llm::send_error;
use blogpilot_pipeline::{Notification, Notifier};
use blogpilot_types::Result;

use crate::http::read_body;

const SERVICE: &str = "slack";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Slack mrkdwn text: bold subject, message, one bullet per link.
pub fn format_message(notification: &Notification) -> String {
    let subject = format!("*{}*", notification.subject);
    std::iter::once(subject.as_str())
        .chain(std::iter::once(notification.message.as_str()))
        .filter(|line| !line.is_empty())
        .map(String::from)
        .chain(notification.links.iter().map(|link| format!("• {link}")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Posts to an incoming webhook. Without one, notifications are only logged.
pub struct SlackNotifier {
    webhook: Option<String>,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook: Option<String>) -> Self {
        Self {
            webhook: webhook.filter(|w| !w.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::new(lookup("SLACK_WEBHOOK"))
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let Some(webhook) = &self.webhook else {
            tracing::info!(
                subject = %notification.subject,
                message = %notification.message,
                "Notification (no webhook configured)"
            );
            return Ok(());
        };
        let resp = self
            .client
            .post(webhook)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "text": format_message(notification) }))
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        read_body(SERVICE, resp).await.map(|_| ())
    }
}
