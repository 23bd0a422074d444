//! DNS records a new mail host needs

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// TTL applied to every suggested record
pub const DEFAULT_TTL: u32 = 3600;

/// Priority of the MX record pointing at the new host
pub const MX_PRIORITY: u16 = 10;

/// DNS record types emitted for a mail domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsRecordType {
    /// A record (IPv4 address)
    A,
    /// MX record (mail exchange)
    MX,
    /// TXT record (SPF, DMARC)
    TXT,
    /// CNAME record
    CNAME,
}

impl std::fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsRecordType::A => write!(f, "A"),
            DnsRecordType::MX => write!(f, "MX"),
            DnsRecordType::TXT => write!(f, "TXT"),
            DnsRecordType::CNAME => write!(f, "CNAME"),
        }
    }
}

/// DNS record relative to its zone
///
/// `name` is `@` for the apex or a label such as `mail` or `_dmarc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Record type
    pub record_type: DnsRecordType,
    /// Zone-relative name
    pub name: String,
    /// Record value
    pub value: String,
    /// TTL in seconds
    pub ttl: u32,
    /// Priority (for MX records)
    pub priority: Option<u16>,
    /// Description/purpose
    pub description: String,
}

impl DnsRecord {
    /// Create new DNS record
    pub fn new(
        record_type: DnsRecordType,
        name: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        DnsRecord {
            record_type,
            name: name.into(),
            value: value.into(),
            ttl: DEFAULT_TTL,
            priority: None,
            description: description.into(),
        }
    }

    /// Create MX record with priority
    pub fn mx(name: impl Into<String>, value: impl Into<String>, priority: u16) -> Self {
        DnsRecord {
            record_type: DnsRecordType::MX,
            name: name.into(),
            value: value.into(),
            ttl: DEFAULT_TTL,
            priority: Some(priority),
            description: "Mail server MX record".to_string(),
        }
    }

    /// Fully qualified owner name within `domain`
    pub fn fqdn(&self, domain: &str) -> String {
        if self.name == "@" {
            domain.to_string()
        } else {
            format!("{}.{}", self.name, domain)
        }
    }

    /// Format as zone file line
    pub fn to_zone_line(&self) -> String {
        match self.record_type {
            DnsRecordType::MX => format!(
                "{}\t{}\tIN\t{}\t{} {}.",
                self.name,
                self.ttl,
                self.record_type,
                self.priority.unwrap_or(MX_PRIORITY),
                self.value
            ),
            DnsRecordType::TXT => format!(
                "{}\t{}\tIN\t{}\t\"{}\"",
                self.name, self.ttl, self.record_type, self.value
            ),
            DnsRecordType::CNAME => format!(
                "{}\t{}\tIN\t{}\t{}.",
                self.name, self.ttl, self.record_type, self.value
            ),
            DnsRecordType::A => format!(
                "{}\t{}\tIN\t{}\t{}",
                self.name, self.ttl, self.record_type, self.value
            ),
        }
    }

    /// One-line human rendering used in instructions
    pub fn describe(&self) -> String {
        match self.priority {
            Some(priority) => format!(
                "{:<5} {:<15} -> {} (priority {})",
                self.record_type.to_string(),
                self.name,
                self.value,
                priority
            ),
            None => format!(
                "{:<5} {:<15} -> {}",
                self.record_type.to_string(),
                self.name,
                self.value
            ),
        }
    }
}

/// Hostname of the mail host serving `domain`
pub fn mail_host(domain: &str) -> String {
    format!("mail.{}", domain)
}

/// Record sets for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedRecords {
    /// Records mail delivery depends on
    pub required: Vec<DnsRecord>,
    /// Recommended extras (DMARC, client autoconfiguration)
    pub optional: Vec<DnsRecord>,
}

impl SuggestedRecords {
    /// Zone file fragment with both sets
    pub fn to_zone_file(&self, domain: &str) -> String {
        let mut zone = format!("; Mail records for {}\n", domain);
        zone.push_str(&format!("$ORIGIN {}.\n\n", domain));
        zone.push_str("; Required\n");
        for record in &self.required {
            zone.push_str(&record.to_zone_line());
            zone.push('\n');
        }
        zone.push_str("\n; Optional\n");
        for record in &self.optional {
            zone.push_str(&record.to_zone_line());
            zone.push('\n');
        }
        zone
    }
}

/// Records pointing `domain`'s mail at `address`
///
/// Deterministic: the same inputs always produce the same sets.
pub fn suggest_records(domain: &str, address: Ipv4Addr) -> SuggestedRecords {
    let host = mail_host(domain);

    let required = vec![
        DnsRecord::new(
            DnsRecordType::A,
            "mail",
            address.to_string(),
            "Mail server address",
        ),
        DnsRecord::mx("@", host.clone(), MX_PRIORITY),
        DnsRecord::new(
            DnsRecordType::TXT,
            "@",
            format!("v=spf1 mx a ip4:{} ~all", address),
            "SPF record - authorizes the mail server to send",
        ),
    ];

    let optional = vec![
        DnsRecord::new(
            DnsRecordType::TXT,
            "_dmarc",
            format!("v=DMARC1; p=quarantine; rua=mailto:dmarc@{}", domain),
            "DMARC policy",
        ),
        DnsRecord::new(
            DnsRecordType::CNAME,
            "autoconfig",
            host.clone(),
            "Thunderbird autoconfiguration",
        ),
        DnsRecord::new(
            DnsRecordType::CNAME,
            "autodiscover",
            host,
            "Outlook autodiscovery",
        ),
    ];

    SuggestedRecords { required, optional }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 10);

    #[test]
    fn test_required_records() {
        let records = suggest_records("example.com", IP);
        assert_eq!(records.required.len(), 3);

        let a = &records.required[0];
        assert_eq!(a.record_type, DnsRecordType::A);
        assert_eq!(a.name, "mail");
        assert_eq!(a.value, "203.0.113.10");

        let mx = &records.required[1];
        assert_eq!(mx.record_type, DnsRecordType::MX);
        assert_eq!(mx.name, "@");
        assert_eq!(mx.value, "mail.example.com");
        assert_eq!(mx.priority, Some(10));

        let spf = &records.required[2];
        assert_eq!(spf.value, "v=spf1 mx a ip4:203.0.113.10 ~all");
        assert!(records
            .required
            .iter()
            .chain(records.optional.iter())
            .all(|r| r.ttl == 3600));
    }

    #[test]
    fn test_optional_records() {
        let records = suggest_records("example.com", IP);
        let values: Vec<_> = records
            .optional
            .iter()
            .map(|r| (r.record_type, r.name.as_str(), r.value.as_str()))
            .collect();
        assert_eq!(
            values,
            vec![
                (
                    DnsRecordType::TXT,
                    "_dmarc",
                    "v=DMARC1; p=quarantine; rua=mailto:dmarc@example.com"
                ),
                (DnsRecordType::CNAME, "autoconfig", "mail.example.com"),
                (DnsRecordType::CNAME, "autodiscover", "mail.example.com"),
            ]
        );
    }

    #[test]
    fn test_suggestions_are_deterministic() {
        let first = suggest_records("a.test", IP);
        let second = suggest_records("a.test", IP);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_fqdn() {
        let records = suggest_records("example.com", IP);
        assert_eq!(records.required[0].fqdn("example.com"), "mail.example.com");
        assert_eq!(records.required[1].fqdn("example.com"), "example.com");
    }

    #[test]
    fn test_zone_lines() {
        let records = suggest_records("example.com", IP);
        assert_eq!(
            records.required[1].to_zone_line(),
            "@\t3600\tIN\tMX\t10 mail.example.com."
        );
        assert_eq!(
            records.required[2].to_zone_line(),
            "@\t3600\tIN\tTXT\t\"v=spf1 mx a ip4:203.0.113.10 ~all\""
        );

        let zone = records.to_zone_file("example.com");
        assert!(zone.contains("$ORIGIN example.com."));
        assert!(zone.contains("mail\t3600\tIN\tA\t203.0.113.10"));
        assert!(zone.contains("autodiscover\t3600\tIN\tCNAME\tmail.example.com."));
    }

    #[test]
    fn test_describe() {
        let records = suggest_records("example.com", IP);
        assert!(records.required[1]
            .describe()
            .ends_with("-> mail.example.com (priority 10)"));
        assert!(records.required[0].describe().starts_with("A     mail"));
    }

    #[test]
    fn test_record_type_display() {
        assert_eq!(DnsRecordType::A.to_string(), "A");
        assert_eq!(DnsRecordType::CNAME.to_string(), "CNAME");
    }
}
