//! Live DNS lookups
//!
//! The analyzer only sees the [`DnsLookup`] trait; [`SystemResolver`] answers
//! it from the system's recursive resolver.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::TokioAsyncResolver;

use crate::error::{DeployError, Result};

/// Mail exchanger for a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub priority: u16,
    /// Exchange hostname without the trailing dot
    pub server: String,
}

impl MxRecord {
    pub fn new(priority: u16, server: impl Into<String>) -> Self {
        Self {
            priority,
            server: server.into(),
        }
    }
}

/// Sort MX records ascending by priority, ties by hostname
pub fn sort_mx(records: &mut [MxRecord]) {
    records.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.server.cmp(&b.server))
    });
}

/// Lookups the analyzer and the propagation checks depend on
#[async_trait::async_trait]
pub trait DnsLookup: Send + Sync {
    /// MX records; a domain without any yields an empty list
    async fn mx(&self, domain: &str) -> Result<Vec<MxRecord>>;

    /// Nameserver hostnames without trailing dots
    async fn nameservers(&self, domain: &str) -> Result<Vec<String>>;
}

/// Resolver backed by the system configuration
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(
                ResolverConfig::default(),
                ResolverOpts::default(),
            ),
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_no_records(e: &ResolveError) -> bool {
    matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

#[async_trait::async_trait]
impl DnsLookup for SystemResolver {
    async fn mx(&self, domain: &str) -> Result<Vec<MxRecord>> {
        info!("Looking up MX records for {}", domain);

        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) if is_no_records(&e) => {
                debug!("No MX records for {}", domain);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(DeployError::Dns(format!(
                    "MX lookup failed for {}: {}",
                    domain, e
                )))
            }
        };

        let mut records: Vec<MxRecord> = lookup
            .iter()
            .map(|mx| {
                MxRecord::new(
                    mx.preference(),
                    mx.exchange().to_string().trim_end_matches('.'),
                )
            })
            .collect();
        sort_mx(&mut records);

        debug!("Found {} MX records for {}", records.len(), domain);
        Ok(records)
    }

    async fn nameservers(&self, domain: &str) -> Result<Vec<String>> {
        let lookup = match self.resolver.ns_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) if is_no_records(&e) => return Ok(Vec::new()),
            Err(e) => {
                return Err(DeployError::Dns(format!(
                    "NS lookup failed for {}: {}",
                    domain, e
                )))
            }
        };

        Ok(lookup
            .iter()
            .map(|ns| ns.to_string().trim_end_matches('.').to_string())
            .collect())
    }
}
