//! Alert delivery

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::health::HealthSnapshot;

/// Sink for unhealthy snapshots
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, snapshot: &HealthSnapshot) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    username: &'a str,
    icon_emoji: &'a str,
}

/// Message body posted to chat webhooks
pub fn format_message(snapshot: &HealthSnapshot) -> String {
    let mut message = format!(
        "{} Email Server Status: {}\n\n",
        snapshot.overall_status.emoji(),
        snapshot.overall_status.as_str().to_uppercase()
    );
    message.push_str(&format!("Server: {}\n", snapshot.hostname));
    message.push_str(&format!("Time: {}\n\n", snapshot.timestamp.to_rfc3339()));

    if !snapshot.alerts.is_empty() {
        message.push_str("Alerts:\n");
        for alert in &snapshot.alerts {
            message.push_str(&format!("• {}\n", alert));
        }
        message.push('\n');
    }

    let figure = |value: Option<String>| value.unwrap_or_else(|| "N/A".to_string());
    let r = &snapshot.resources;
    message.push_str("System Info:\n");
    message.push_str(&format!(
        "• Disk Usage: {}%\n",
        figure(r.disk_usage.map(|v| v.to_string()))
    ));
    message.push_str(&format!(
        "• Memory Usage: {}%\n",
        figure(r.memory_usage.map(|v| v.to_string()))
    ));
    message.push_str(&format!(
        "• Load Average: {}\n",
        figure(r.load_average.map(|v| format!("{:.2}", v)))
    ));
    message.push_str(&format!(
        "• Mail Queue: {} messages\n",
        figure(snapshot.mail_queue.map(|v| v.to_string()))
    ));

    message
}

/// Slack-compatible incoming webhook
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, snapshot: &HealthSnapshot) -> Result<()> {
        let payload = WebhookPayload {
            text: format_message(snapshot),
            username: "Email Monitor",
            icon_emoji: ":email:",
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(MonitorError::Probe(format!(
                "webhook returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// In-memory notifier that records every message, optionally failing
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier whose deliveries always fail (after being recorded)
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, snapshot: &HealthSnapshot) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format_message(snapshot));
        if self.fail {
            return Err(MonitorError::Probe("webhook unreachable".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Severity;
    use crate::probes::{CertificateStatus, ResourceUsage};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot(alerts: &[&str]) -> HealthSnapshot {
        let alerts: Vec<String> = alerts.iter().map(|a| a.to_string()).collect();
        HealthSnapshot {
            timestamp: Utc::now(),
            hostname: "mx1".to_string(),
            services: BTreeMap::new(),
            ports: BTreeMap::new(),
            resources: ResourceUsage::default(),
            mail_queue: None,
            ssl_status: CertificateStatus::invalid("expired"),
            email_tests: BTreeMap::new(),
            overall_status: Severity::from_alert_count(alerts.len()),
            alerts,
        }
    }

    #[test]
    fn test_message_lists_alerts() {
        let message = format_message(&snapshot(&["Port 25 is not accessible"]));
        assert!(message.starts_with("⚠️ Email Server Status: WARNING"));
        assert!(message.contains("Server: mx1"));
        assert!(message.contains("• Port 25 is not accessible"));
    }

    #[test]
    fn test_message_carries_system_figures() {
        let mut snap = snapshot(&["Port 25 is not accessible"]);
        snap.resources = ResourceUsage {
            disk_usage: Some(42),
            memory_usage: Some(33),
            load_average: Some(1.5),
        };
        snap.mail_queue = Some(7);

        let message = format_message(&snap);
        assert!(message.contains("System Info:"));
        assert!(message.contains("• Disk Usage: 42%"));
        assert!(message.contains("• Memory Usage: 33%"));
        assert!(message.contains("• Load Average: 1.50"));
        assert!(message.contains("• Mail Queue: 7 messages"));
    }

    #[test]
    fn test_missing_figures_render_as_na() {
        let message = format_message(&snapshot(&["x"]));
        assert!(message.contains("• Disk Usage: N/A%"));
        assert!(message.contains("• Load Average: N/A"));
        assert!(message.contains("• Mail Queue: N/A messages"));
    }

    #[test]
    fn test_critical_header() {
        let message = format_message(&snapshot(&["a", "b", "c"]));
        assert!(message.starts_with("🚨 Email Server Status: CRITICAL"));
    }

    #[test]
    fn test_payload_shape() {
        let payload = WebhookPayload {
            text: "hi".to_string(),
            username: "Email Monitor",
            icon_emoji: ":email:",
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["username"], "Email Monitor");
        assert_eq!(json["icon_emoji"], ":email:");
        assert_eq!(json["text"], "hi");
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let ok = RecordingNotifier::new();
        ok.notify(&snapshot(&["x"])).await.unwrap();
        assert_eq!(ok.messages().len(), 1);

        let broken = RecordingNotifier::failing();
        assert!(broken.notify(&snapshot(&["x"])).await.is_err());
        assert_eq!(broken.messages().len(), 1);
    }
}
