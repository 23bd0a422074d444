//! Configuration for mail-monitor

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, Result};

/// Main monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between two health checks
    pub check_interval_secs: u64,
    /// Seconds to wait after a failed cycle before retrying
    pub error_cooldown_secs: u64,
    /// Per-probe time budget in seconds
    pub probe_timeout_secs: u64,
    /// Webhook receiving notifications (skipped when unset)
    pub webhook_url: Option<String>,
    /// Address that should receive alert mails
    pub alert_email: Option<String>,
    /// Host the port probes connect to
    pub host: String,
    /// systemd units that must be active
    pub services: Vec<String>,
    /// TCP ports that must accept connections
    pub ports: Vec<u16>,
    /// Directory receiving one JSON snapshot per cycle
    pub report_dir: PathBuf,
    /// Number of snapshots kept on disk
    pub retention: usize,
    /// Resource ceilings
    pub thresholds: ThresholdConfig,
    /// Mailboxes used for SMTP/IMAP login tests
    pub test_accounts: Vec<TestAccount>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Numeric ceilings; a value strictly above its ceiling raises an alert
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Root filesystem usage in percent
    pub disk_usage: u8,
    /// Memory usage in percent
    pub memory_usage: u8,
    /// One-minute load average
    pub load_average: f64,
    /// Messages waiting in the mail queue
    pub queue_size: u64,
}

/// Mailbox credentials used by the login probes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestAccount {
    pub email: String,
    pub password: String,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub imap_host: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_imap_port() -> u16 {
    993
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            error_cooldown_secs: 60,
            probe_timeout_secs: 10,
            webhook_url: None,
            alert_email: None,
            host: "localhost".to_string(),
            services: ["postfix", "dovecot", "mysql", "nginx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ports: vec![25, 587, 993, 443, 80],
            thresholds: ThresholdConfig::default(),
            test_accounts: Vec::new(),
            report_dir: PathBuf::from("/var/log/email-monitoring"),
            retention: 100,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            disk_usage: 90,
            memory_usage: 90,
            load_average: 5.0,
            queue_size: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| MonitorError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MonitorError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(MonitorError::Config(
                "check_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.retention == 0 {
            return Err(MonitorError::Config(
                "retention must keep at least one snapshot".to_string(),
            ));
        }
        if let Some(url) = &self.webhook_url {
            reqwest::Url::parse(url).map_err(|e| {
                MonitorError::Config(format!("Invalid webhook URL '{}': {}", url, e))
            })?;
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
