//! Mail-routing analysis for a domain
//!
//! Reads the live MX and NS records, names the DNS host from its
//! nameservers and flags MX records that belong to a hosted mail service
//! the new server would compete with. Conflicts are advisory only.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::records::SuggestedRecords;
use super::resolver::{sort_mx, DnsLookup, MxRecord};

/// DNS hosting company, identified from nameserver hostnames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsHost {
    Ovh,
    Cloudflare,
    DigitalOcean,
    Route53,
    Namecheap,
    Unknown,
}

impl DnsHost {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsHost::Ovh => "ovh",
            DnsHost::Cloudflare => "cloudflare",
            DnsHost::DigitalOcean => "digitalocean",
            DnsHost::Route53 => "route53",
            DnsHost::Namecheap => "namecheap",
            DnsHost::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DnsHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const NAMESERVER_SIGNATURES: &[(&str, DnsHost)] = &[
    ("ovh.net", DnsHost::Ovh),
    ("cloudflare.com", DnsHost::Cloudflare),
    ("digitalocean.com", DnsHost::DigitalOcean),
    ("route53", DnsHost::Route53),
    ("amazonaws.com", DnsHost::Route53),
    ("namecheap.com", DnsHost::Namecheap),
];

/// First nameserver matching a known signature decides; otherwise unknown
pub fn fingerprint_provider(nameservers: &[String]) -> DnsHost {
    for ns in nameservers {
        let ns = ns.to_ascii_lowercase();
        if let Some((_, host)) = NAMESERVER_SIGNATURES
            .iter()
            .find(|(signature, _)| ns.contains(signature))
        {
            return *host;
        }
    }
    DnsHost::Unknown
}

/// Hosted mail service found in a domain's MX records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// OVH MX Plan
    CompetingHostedMx,
    /// Google Workspace
    ManagedSuiteA,
    /// Microsoft 365
    ManagedSuiteB,
}

impl ConflictKind {
    pub fn description(&self) -> &'static str {
        match self {
            ConflictKind::CompetingHostedMx => "OVH MX Plan service detected",
            ConflictKind::ManagedSuiteA => "Google Workspace detected",
            ConflictKind::ManagedSuiteB => "Microsoft 365 detected",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            ConflictKind::CompetingHostedMx => "Delete OVH MX records or suspend MX Plan service",
            ConflictKind::ManagedSuiteA => "Disable Google Workspace or use subdomain",
            ConflictKind::ManagedSuiteB => "Disable Microsoft 365 or use subdomain",
        }
    }

    fn signatures(&self) -> &'static [&'static str] {
        match self {
            ConflictKind::CompetingHostedMx => &["mail.ovh.net"],
            ConflictKind::ManagedSuiteA => &["google.com", "googlemail.com"],
            ConflictKind::ManagedSuiteB => &["outlook.com"],
        }
    }

    fn matches(&self, server: &str) -> bool {
        let server = server.to_ascii_lowercase();
        self.signatures().iter().any(|s| server.contains(s))
    }
}

const CONFLICT_RULES: [ConflictKind; 3] = [
    ConflictKind::CompetingHostedMx,
    ConflictKind::ManagedSuiteA,
    ConflictKind::ManagedSuiteB,
];

/// MX record clashing with the new deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConflict {
    pub kind: ConflictKind,
    pub record: MxRecord,
    pub description: String,
    pub remediation: String,
}

/// One conflict per (rule, matching record) pair
///
/// Matching is by hostname substring, so an unrelated exchange whose name
/// happens to contain a signature is flagged too.
pub fn detect_conflicts(records: &[MxRecord]) -> Vec<DnsConflict> {
    CONFLICT_RULES
        .iter()
        .flat_map(|kind| {
            records
                .iter()
                .filter(move |mx| kind.matches(&mx.server))
                .map(move |mx| DnsConflict {
                    kind: *kind,
                    record: mx.clone(),
                    description: kind.description().to_string(),
                    remediation: kind.remediation().to_string(),
                })
        })
        .collect()
}

/// Current mail-routing state of one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAnalysis {
    pub domain: String,
    /// Ascending by priority
    pub mx_records: Vec<MxRecord>,
    pub provider: DnsHost,
    pub conflicts: Vec<DnsConflict>,
    /// Lookups that failed and were treated as empty
    pub lookup_errors: Vec<String>,
}

impl DomainAnalysis {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// No MX yet, or MX owned by a competing service
    pub fn needs_configuration(&self) -> bool {
        self.mx_records.is_empty() || self.has_conflicts()
    }
}

/// Runs lookups and classification for domains
#[derive(Clone)]
pub struct DnsAnalyzer {
    lookup: Arc<dyn DnsLookup>,
}

impl DnsAnalyzer {
    pub fn new(lookup: Arc<dyn DnsLookup>) -> Self {
        Self { lookup }
    }

    /// Analyze a domain; lookup failures degrade to empty results
    pub async fn analyze(&self, domain: &str) -> DomainAnalysis {
        info!("Analyzing DNS configuration for {}", domain);
        let mut lookup_errors = Vec::new();

        let mut mx_records = match self.lookup.mx(domain).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not get MX records for {}: {}", domain, e);
                lookup_errors.push(e.to_string());
                Vec::new()
            }
        };
        sort_mx(&mut mx_records);

        let provider = match self.lookup.nameservers(domain).await {
            Ok(nameservers) => fingerprint_provider(&nameservers),
            Err(e) => {
                warn!("Could not detect DNS provider for {}: {}", domain, e);
                lookup_errors.push(e.to_string());
                DnsHost::Unknown
            }
        };

        let conflicts = detect_conflicts(&mx_records);
        for conflict in &conflicts {
            warn!(
                domain,
                record = %conflict.record.server,
                "{}: {}",
                conflict.description,
                conflict.remediation
            );
        }

        DomainAnalysis {
            domain: domain.to_string(),
            mx_records,
            provider,
            conflicts,
            lookup_errors,
        }
    }

    /// Analyze `domains` one after another
    pub async fn analyze_all(&self, domains: &[String]) -> Vec<DomainAnalysis> {
        let mut results = Vec::with_capacity(domains.len());
        for domain in domains {
            results.push(self.analyze(domain).await);
        }
        results
    }
}

/// Console steps for adding records at a given DNS host
pub fn provider_instructions(domain: &str, provider: DnsHost) -> Vec<String> {
    let steps: Vec<String> = match provider {
        DnsHost::Ovh => vec![
            "Go to https://www.ovh.com/manager/".to_string(),
            format!("Web Cloud -> Domain names -> {}", domain),
            "DNS Zone tab".to_string(),
            "Delete existing MX records (mail.ovh.net entries)".to_string(),
            "Add the required records above".to_string(),
            "Click 'Apply Configuration' if prompted".to_string(),
        ],
        DnsHost::Cloudflare => vec![
            "Go to https://dash.cloudflare.com/".to_string(),
            format!("Select {}", domain),
            "DNS -> Records".to_string(),
            "Add the required records above".to_string(),
            "Set Proxy status to 'DNS only' for mail records".to_string(),
        ],
        DnsHost::DigitalOcean => vec![
            "Go to https://cloud.digitalocean.com/networking/domains".to_string(),
            format!("Select {}", domain),
            "Add the required records above".to_string(),
        ],
        _ => vec![
            "Access your DNS provider's control panel".to_string(),
            format!("Navigate to DNS management for {}", domain),
            "Add the required records listed above".to_string(),
            "Save/Apply changes".to_string(),
        ],
    };

    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect()
}

/// Text block describing one domain's DNS work
pub fn render_instructions(analysis: &DomainAnalysis, records: &SuggestedRecords) -> String {
    let mut out = format!("Domain: {}\n", analysis.domain);
    out.push_str(&format!("DNS Provider: {}\n", analysis.provider));

    if !analysis.mx_records.is_empty() {
        out.push_str("Current MX records:\n");
        for mx in &analysis.mx_records {
            out.push_str(&format!("  {} {}\n", mx.priority, mx.server));
        }
    }

    if analysis.has_conflicts() {
        out.push_str("\nCONFLICTS DETECTED - Resolve these first:\n");
        for conflict in &analysis.conflicts {
            out.push_str(&format!(
                "  - {} ({})\n    Solution: {}\n",
                conflict.description, conflict.record.server, conflict.remediation
            ));
        }
    }

    out.push_str("\nRequired DNS Records:\n");
    for record in &records.required {
        out.push_str(&format!("  {}\n", record.describe()));
    }

    out.push_str("\nOptional DNS Records (recommended):\n");
    for record in &records.optional {
        out.push_str(&format!("  {}\n", record.describe()));
    }

    out.push_str(&format!(
        "\n{} Specific Instructions:\n",
        analysis.provider.as_str().to_uppercase()
    ));
    for step in provider_instructions(&analysis.domain, analysis.provider) {
        out.push_str(&format!("  {}\n", step));
    }
    out.push_str("DNS propagation time: 15 minutes to 24 hours\n");
    out
}
