//! Health monitoring engine
//!
//! One cycle runs every probe, turns negative results and threshold
//! breaches into alert strings, derives a severity from the alert count,
//! persists the snapshot and notifies when the server is not healthy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{MonitorConfig, ThresholdConfig};
use crate::error::Result;
use crate::notify::{Notifier, WebhookNotifier};
use crate::probes::{CertificateStatus, ProbeSet, ResourceUsage};
use crate::store::SnapshotStore;

/// Overall health derived from the number of alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No alert
    Healthy,
    /// One or two alerts
    Warning,
    /// Three alerts or more
    Critical,
}

impl Severity {
    pub fn from_alert_count(alerts: usize) -> Self {
        match alerts {
            0 => Severity::Healthy,
            1 | 2 => Severity::Warning,
            _ => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Healthy => "healthy",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Healthy => "✅",
            Severity::Warning => "⚠️",
            Severity::Critical => "🚨",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SMTP and IMAP login outcome for one test mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResult {
    pub smtp: bool,
    pub imap: bool,
}

/// Point-in-time aggregate of every probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub services: BTreeMap<String, bool>,
    pub ports: BTreeMap<u16, bool>,
    pub resources: ResourceUsage,
    /// `None` when the queue could not be read
    pub mail_queue: Option<u64>,
    pub ssl_status: CertificateStatus,
    pub email_tests: BTreeMap<String, LoginResult>,
    pub overall_status: Severity,
    pub alerts: Vec<String>,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.overall_status == Severity::Healthy
    }
}

/// Alerts for resource figures and queue depth strictly above their ceiling
pub fn evaluate_thresholds(
    resources: &ResourceUsage,
    mail_queue: Option<u64>,
    thresholds: &ThresholdConfig,
) -> Vec<String> {
    let mut alerts = Vec::new();

    if let Some(disk) = resources.disk_usage.filter(|d| *d > thresholds.disk_usage) {
        alerts.push(format!("High disk usage: {}%", disk));
    }
    if let Some(memory) = resources
        .memory_usage
        .filter(|m| *m > thresholds.memory_usage)
    {
        alerts.push(format!("High memory usage: {}%", memory));
    }
    if let Some(load) = resources
        .load_average
        .filter(|l| *l > thresholds.load_average)
    {
        alerts.push(format!("High load average: {:.2}", load));
    }
    if let Some(queue) = mail_queue.filter(|q| *q > thresholds.queue_size) {
        alerts.push(format!("Large mail queue: {} messages", queue));
    }

    alerts
}

/// Human-readable report printed by `--once`
pub fn format_summary(snapshot: &HealthSnapshot) -> String {
    let mark = |ok: bool| if ok { "✅" } else { "❌" };
    let figure = |value: Option<String>| value.unwrap_or_else(|| "N/A".to_string());

    let mut out = String::new();
    out.push_str(&"=".repeat(60));
    out.push_str("\nEMAIL SERVER HEALTH CHECK RESULTS\n");
    out.push_str(&"=".repeat(60));
    out.push('\n');
    out.push_str(&format!(
        "Overall Status: {}\n",
        snapshot.overall_status.as_str().to_uppercase()
    ));
    out.push_str(&format!("Hostname: {}\n", snapshot.hostname));
    out.push_str(&format!("Timestamp: {}\n", snapshot.timestamp.to_rfc3339()));

    out.push_str("\nServices:\n");
    for (service, active) in &snapshot.services {
        out.push_str(&format!("  {} {}\n", mark(*active), service));
    }

    out.push_str("\nPorts:\n");
    for (port, open) in &snapshot.ports {
        out.push_str(&format!("  {} {}\n", mark(*open), port));
    }

    let r = &snapshot.resources;
    out.push_str("\nResources:\n");
    out.push_str(&format!(
        "  Disk Usage: {}%\n",
        figure(r.disk_usage.map(|v| v.to_string()))
    ));
    out.push_str(&format!(
        "  Memory Usage: {}%\n",
        figure(r.memory_usage.map(|v| v.to_string()))
    ));
    out.push_str(&format!(
        "  Load Average: {}\n",
        figure(r.load_average.map(|v| format!("{:.2}", v)))
    ));
    out.push_str(&format!(
        "  Mail Queue: {} messages\n",
        figure(snapshot.mail_queue.map(|v| v.to_string()))
    ));
    out.push_str(&format!(
        "  SSL: {} {}\n",
        mark(snapshot.ssl_status.valid),
        snapshot.ssl_status.detail
    ));

    if !snapshot.email_tests.is_empty() {
        out.push_str("\nMailbox logins:\n");
        for (email, result) in &snapshot.email_tests {
            out.push_str(&format!(
                "  {} SMTP  {} IMAP  {}\n",
                mark(result.smtp),
                mark(result.imap),
                email
            ));
        }
    }

    if !snapshot.alerts.is_empty() {
        out.push_str("\nAlerts:\n");
        for alert in &snapshot.alerts {
            out.push_str(&format!("  ⚠️ {}\n", alert));
        }
    }

    out.push_str(&"=".repeat(60));
    out.push('\n');
    out
}

/// Runs the probe set on a schedule and persists/dispatches the results
pub struct HealthMonitor {
    config: Arc<MonitorConfig>,
    probes: ProbeSet,
    store: SnapshotStore,
    notifier: Option<Arc<dyn Notifier>>,
    hostname: String,
}

impl HealthMonitor {
    /// Monitor persisting to the configured report directory and notifying
    /// the configured webhook, if any
    pub fn new(config: Arc<MonitorConfig>, probes: ProbeSet) -> Self {
        let store = SnapshotStore::new(config.report_dir.clone(), config.retention);
        let notifier = config
            .webhook_url
            .as_ref()
            .map(|url| Arc::new(WebhookNotifier::new(url.clone())) as Arc<dyn Notifier>);
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();

        Self {
            config,
            probes,
            store,
            notifier,
            hostname,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Run every probe once and classify the result
    ///
    /// A probe that errors counts as a negative result; it never aborts the
    /// check.
    pub async fn check(&self) -> HealthSnapshot {
        info!("Starting health check...");
        let mut alerts = Vec::new();

        let mut services = BTreeMap::new();
        for service in &self.config.services {
            let active = match self.probes.services.is_active(service).await {
                Ok(active) => active,
                Err(e) => {
                    error!("Error checking service {}: {}", service, e);
                    false
                }
            };
            if !active {
                alerts.push(format!("Service {} is not running", service));
            }
            services.insert(service.clone(), active);
        }

        let mut ports = BTreeMap::new();
        for port in &self.config.ports {
            let open = match self.probes.ports.is_open(&self.config.host, *port).await {
                Ok(open) => open,
                Err(e) => {
                    error!("Error checking port {}: {}", port, e);
                    false
                }
            };
            if !open {
                alerts.push(format!("Port {} is not accessible", port));
            }
            ports.insert(*port, open);
        }

        let resources = match self.probes.resources.sample().await {
            Ok(resources) => resources,
            Err(e) => {
                error!("Error checking system resources: {}", e);
                alerts.push(format!("System resources unavailable: {}", e));
                ResourceUsage::default()
            }
        };

        let mail_queue = match self.probes.queue.depth().await {
            Ok(depth) => Some(depth),
            Err(e) => {
                error!("Error checking mail queue: {}", e);
                alerts.push(format!("Mail queue unavailable: {}", e));
                None
            }
        };

        alerts.extend(evaluate_thresholds(
            &resources,
            mail_queue,
            &self.config.thresholds,
        ));

        let ssl_status = match self.probes.certificates.check().await {
            Ok(status) => status,
            Err(e) => {
                error!("Error checking SSL certificates: {}", e);
                CertificateStatus::invalid(e.to_string())
            }
        };
        if !ssl_status.valid {
            alerts.push("SSL certificate issues detected".to_string());
        }

        let mut email_tests = BTreeMap::new();
        for account in &self.config.test_accounts {
            let smtp = match self.probes.logins.smtp_login(account).await {
                Ok(()) => true,
                Err(e) => {
                    error!("SMTP test failed for {}: {}", account.email, e);
                    false
                }
            };
            let imap = match self.probes.logins.imap_login(account).await {
                Ok(()) => true,
                Err(e) => {
                    error!("IMAP test failed for {}: {}", account.email, e);
                    false
                }
            };

            if !smtp {
                alerts.push(format!("SMTP test failed for {}", account.email));
            }
            if !imap {
                alerts.push(format!("IMAP test failed for {}", account.email));
            }
            email_tests.insert(account.email.clone(), LoginResult { smtp, imap });
        }

        let overall_status = Severity::from_alert_count(alerts.len());
        info!(
            status = overall_status.as_str(),
            alerts = alerts.len(),
            "Health check completed"
        );

        HealthSnapshot {
            timestamp: Utc::now(),
            hostname: self.hostname.clone(),
            services,
            ports,
            resources,
            mail_queue,
            ssl_status,
            email_tests,
            overall_status,
            alerts,
        }
    }

    /// Deliver a notification; failures are logged and swallowed
    pub async fn notify(&self, snapshot: &HealthSnapshot) {
        let Some(notifier) = &self.notifier else {
            debug!("No webhook configured, skipping notification");
            return;
        };

        match notifier.notify(snapshot).await {
            Ok(()) => info!("Webhook notification sent successfully"),
            Err(e) => error!("Error sending webhook notification: {}", e),
        }
    }

    fn persist(&self, snapshot: &HealthSnapshot) -> Result<()> {
        match self.store.save(snapshot) {
            Ok(path) => {
                info!("Health report saved: {}", path.display());
                Ok(())
            }
            Err(e) => {
                error!("Error saving health report: {}", e);
                Err(e)
            }
        }
    }

    /// One full cycle: check, persist, notify when not healthy
    ///
    /// A persistence failure does not suppress the notification; it is
    /// returned once the notification has been dispatched.
    pub async fn run_cycle(&self) -> Result<HealthSnapshot> {
        let snapshot = self.check().await;
        let saved = self.persist(&snapshot);

        if !snapshot.is_healthy() {
            self.notify(&snapshot).await;
        }

        saved.map(|()| snapshot)
    }

    /// Single check for `--once`: always notifies, and a persistence
    /// failure is only logged
    pub async fn run_once(&self) -> HealthSnapshot {
        let snapshot = self.check().await;
        self.notify(&snapshot).await;
        let _ = self.persist(&snapshot);
        snapshot
    }

    /// Run cycles until `shutdown` resolves
    ///
    /// Cancellation is only observed between cycles. A failed cycle is
    /// followed by the error cooldown instead of the regular interval.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting continuous email server monitoring...");

        loop {
            let pause = match self.run_cycle().await {
                Ok(_) => self.config.check_interval(),
                Err(e) => {
                    error!("Error in monitoring loop: {}", e);
                    warn!(
                        "Retrying in {} seconds",
                        self.config.error_cooldown().as_secs()
                    );
                    self.config.error_cooldown()
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Monitoring stopped");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
