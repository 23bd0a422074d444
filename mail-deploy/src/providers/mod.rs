//! External capabilities the pipeline drives
//!
//! Each provider sits behind a narrow trait with one production
//! implementation and an in-memory mock:
//! - [`VpsProvider`]: DigitalOcean
//! - [`DnsProvider`]: Cloudflare
//! - [`RemoteConnector`] / [`RemoteSession`]: OpenSSH

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::config::DeployConfig;
use crate::dns::DnsRecord;
use crate::error::{DeployError, Result};

pub mod cloudflare;
pub mod digitalocean;
pub mod mock;
pub mod ssh;

/// Host creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ssh_keys: Vec<String>,
    /// First-boot script
    pub user_data: String,
    pub tags: Vec<String>,
}

/// Host state as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: String,
    pub status: String,
    pub public_ipv4: Option<Ipv4Addr>,
}

impl HostInfo {
    /// Active with a public address assigned
    pub fn ready_address(&self) -> Option<Ipv4Addr> {
        if self.status == "active" {
            self.public_ipv4
        } else {
            None
        }
    }
}

/// Cloud host provisioning
#[async_trait::async_trait]
pub trait VpsProvider: Send + Sync {
    /// Request a new host; returns its provider id
    async fn create_host(&self, spec: &HostSpec) -> Result<String>;

    async fn get_host(&self, id: &str) -> Result<HostInfo>;
}

/// DNS record management
#[async_trait::async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create one record for `domain` in `zone`
    async fn create_record(&self, zone: &str, domain: &str, record: &DnsRecord) -> Result<()>;
}

/// Outcome of a remote command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Turn a non-zero exit into a [`DeployError::Remote`]
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(DeployError::Remote(format!(
                "{} exited with status {}: {}",
                what,
                self.exit_status,
                self.stderr.trim()
            )))
        }
    }
}

/// Command session on a remote host
///
/// `Err` is reserved for transport failures; a command that ran and failed
/// comes back as a [`CommandOutput`] with a non-zero status.
#[async_trait::async_trait]
pub trait RemoteSession: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    async fn upload(&self, path: &str, content: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Opens [`RemoteSession`]s
#[async_trait::async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, host: Ipv4Addr) -> Result<Box<dyn RemoteSession>>;
}

/// VPS provider named in the configuration
pub fn vps_from_config(config: &DeployConfig) -> Result<Arc<dyn VpsProvider>> {
    match config.vps_provider.name.as_str() {
        "digitalocean" => Ok(Arc::new(digitalocean::DigitalOcean::new(
            config.vps_provider.api_token.clone(),
        ))),
        other => Err(DeployError::Config(format!(
            "Unsupported VPS provider: {}",
            other
        ))),
    }
}

/// DNS provider named in the configuration
pub fn dns_from_config(config: &DeployConfig) -> Result<Arc<dyn DnsProvider>> {
    match config.dns_provider.name.as_str() {
        "cloudflare" => Ok(Arc::new(cloudflare::Cloudflare::new(
            config.dns_provider.api_token.clone(),
        ))),
        other => Err(DeployError::Config(format!(
            "Unsupported DNS provider: {}",
            other
        ))),
    }
}
