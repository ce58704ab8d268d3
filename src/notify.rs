//! Operator notifications for blocked, failed, rejected and completed tasks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    ReviewRejected,
    Blocked,
    Failed,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotifyKind,
    pub task_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotifyKind, task_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: task_id.to_string(),
            message: message.into(),
            data: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the tracing log. Used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        match n.kind {
            NotifyKind::Complete => {
                tracing::info!(task_id = %n.task_id, kind = ?n.kind, "{}", n.message)
            }
            _ => tracing::warn!(task_id = %n.task_id, kind = ?n.kind, "{}", n.message),
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        self.client
            .post(&self.url)
            .header("User-Agent", "switchyard")
            .json(n)
            .send()
            .await
            .context("Failed to send notification webhook")?
            .error_for_status()
            .context("Notification webhook returned error status")?;
        Ok(())
    }
}

/// Pick the notifier for a configured webhook URL.
pub fn from_webhook(url: Option<&str>) -> Box<dyn Notifier> {
    match url.filter(|u| !u.trim().is_empty()) {
        Some(url) => Box::new(WebhookNotifier::new(url)),
        None => Box::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_serializes_camel_case() {
        let n = Notification::new(NotifyKind::ReviewRejected, "T-1", "rejected")
            .with_data(json!({ "confidence": 0.4 }));
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["kind"], "review_rejected");
        assert_eq!(value["taskId"], "T-1");
        assert_eq!(value["data"]["confidence"], 0.4);
    }

    #[test]
    fn test_null_data_is_omitted() {
        let n = Notification::new(NotifyKind::Complete, "T-1", "done");
        let value = serde_json::to_value(&n).unwrap();
        assert!(value.get("data").is_none());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let n = Notification::new(NotifyKind::Blocked, "T-2", "blocked");
        LogNotifier.notify(&n).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_webhook_errors() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook");
        let n = Notification::new(NotifyKind::Failed, "T-3", "failed");
        assert!(notifier.notify(&n).await.is_err());
    }
}
