//! mail-monitor: continuous health monitoring for a mail server
//!
//! Periodically checks service liveness, port reachability, host resources,
//! mail queue depth, certificate validity and mailbox logins, then classifies
//! the server as healthy, warning or critical.
//!
//! # Features
//!
//! - Probes behind narrow traits, with real and scripted implementations
//! - Bounded on-disk JSON snapshot history
//! - Webhook notifications for unhealthy cycles
//! - Error cooldown and graceful shutdown between cycles
//!
//! # Example Configuration
//!
//! ```toml
//! check_interval_secs = 300
//! webhook_url = "https://hooks.slack.com/services/XXX"
//! report_dir = "/var/log/email-monitoring"
//!
//! [thresholds]
//! disk_usage = 90
//! memory_usage = 90
//! load_average = 5.0
//! queue_size = 100
//!
//! [[test_accounts]]
//! email = "alex.smith@example.com"
//! password = "secret"
//! smtp_host = "mail.example.com"
//! imap_host = "mail.example.com"
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod notify;
pub mod probes;
pub mod store;

pub use config::{MonitorConfig, TestAccount, ThresholdConfig};
pub use error::{MonitorError, Result};
pub use health::{HealthMonitor, HealthSnapshot, Severity};
pub use notify::{Notifier, WebhookNotifier};
pub use probes::ProbeSet;
pub use store::SnapshotStore;
