//! Health probes
//!
//! Every check kind sits behind its own narrow trait so the monitor's
//! alerting logic runs the same against the real host ([`system`]) and
//! against scripted fakes ([`fake`]).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{MonitorConfig, TestAccount};
use crate::error::Result;

pub mod fake;
pub mod system;

/// OS resource figures; a missing figure could not be read
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Root filesystem usage in percent
    pub disk_usage: Option<u8>,
    /// Memory usage in percent
    pub memory_usage: Option<u8>,
    /// One-minute load average
    pub load_average: Option<f64>,
}

/// Certificate check outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStatus {
    pub valid: bool,
    pub detail: String,
}

impl CertificateStatus {
    pub fn valid(detail: impl Into<String>) -> Self {
        Self {
            valid: true,
            detail: detail.into(),
        }
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self {
            valid: false,
            detail: detail.into(),
        }
    }
}

/// Service liveness (systemd unit state)
#[async_trait::async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn is_active(&self, service: &str) -> Result<bool>;
}

/// TCP reachability
#[async_trait::async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_open(&self, host: &str, port: u16) -> Result<bool>;
}

/// Disk, memory and load sampling
#[async_trait::async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> Result<ResourceUsage>;
}

/// Mail queue depth
#[async_trait::async_trait]
pub trait QueueProbe: Send + Sync {
    async fn depth(&self) -> Result<u64>;
}

/// TLS certificate validity
#[async_trait::async_trait]
pub trait CertificateProbe: Send + Sync {
    async fn check(&self) -> Result<CertificateStatus>;
}

/// Mailbox login tests; `Ok(())` means the login succeeded
#[async_trait::async_trait]
pub trait LoginProbe: Send + Sync {
    async fn smtp_login(&self, account: &TestAccount) -> Result<()>;
    async fn imap_login(&self, account: &TestAccount) -> Result<()>;
}

/// The full set of probes run by one monitoring cycle
#[derive(Clone)]
pub struct ProbeSet {
    pub services: Arc<dyn ServiceProbe>,
    pub ports: Arc<dyn PortProbe>,
    pub resources: Arc<dyn ResourceProbe>,
    pub queue: Arc<dyn QueueProbe>,
    pub certificates: Arc<dyn CertificateProbe>,
    pub logins: Arc<dyn LoginProbe>,
}

impl ProbeSet {
    /// Probes backed by the local host
    pub fn system(config: &MonitorConfig) -> Self {
        let timeout = config.probe_timeout();
        Self {
            services: Arc::new(system::SystemctlProbe::new(timeout)),
            ports: Arc::new(system::TcpPortProbe::new(timeout)),
            resources: Arc::new(system::HostResourceProbe::new("/", timeout)),
            queue: Arc::new(system::PostqueueProbe::new(timeout)),
            certificates: Arc::new(system::CertbotProbe::new(timeout)),
            logins: Arc::new(system::MailLoginProbe::new(timeout)),
        }
    }
}
