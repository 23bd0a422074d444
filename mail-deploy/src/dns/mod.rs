//! DNS analysis and record suggestions

pub mod analyzer;
pub mod records;
pub mod resolver;

pub use analyzer::{
    detect_conflicts, fingerprint_provider, ConflictKind, DnsAnalyzer, DnsConflict, DnsHost,
    DomainAnalysis,
};
pub use records::{mail_host, suggest_records, DnsRecord, DnsRecordType, SuggestedRecords};
pub use resolver::{DnsLookup, MxRecord, SystemResolver};
