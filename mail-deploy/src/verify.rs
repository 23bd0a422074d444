//! Post-deployment checks
//!
//! Each check reports independently and none of them can fail the job.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::accounts::MailAccount;
use crate::dns::{mail_host, DnsLookup, MxRecord};
use crate::providers::RemoteSession;
use crate::templates::shell_quote;

const IMAPS_PORT: u16 = 993;
const TLS_OK: &str = "Verify return code: 0 (ok)";

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    /// The check itself could not run
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        let result = Self {
            name: name.into(),
            status,
            detail: detail.into(),
        };
        match status {
            CheckStatus::Pass => info!("{}: PASS", result.name),
            _ => warn!("{}: {:?} ({})", result.name, result.status, result.detail),
        }
        result
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// Whether any MX record names `mail.<domain>`
pub fn mx_points_at_host(records: &[MxRecord], domain: &str) -> bool {
    let host = mail_host(domain);
    records
        .iter()
        .any(|mx| mx.server.trim_end_matches('.').eq_ignore_ascii_case(&host))
}

/// Send a message from the host to the admin address
pub async fn check_smtp_send(
    session: &dyn RemoteSession,
    accounts: &[MailAccount],
    admin_email: &str,
) -> CheckResult {
    const NAME: &str = "smtp_send";
    let Some(account) = accounts.first() else {
        return CheckResult::new(NAME, CheckStatus::Fail, "no accounts to send from");
    };

    let command = format!(
        "echo 'Test email' | mail -s {} {}",
        shell_quote(&format!("Test from {}", account.email)),
        shell_quote(admin_email)
    );
    match session.run(&command).await {
        Ok(output) if output.success() && output.stderr.trim().is_empty() => {
            CheckResult::new(NAME, CheckStatus::Pass, format!("sent to {}", admin_email))
        }
        Ok(output) => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            format!("exit {}: {}", output.exit_status, output.stderr.trim()),
        ),
        Err(e) => CheckResult::new(NAME, CheckStatus::Error, e.to_string()),
    }
}

/// Open a TCP connection to the IMAPS port from the host itself
pub async fn check_imap_port(session: &dyn RemoteSession) -> CheckResult {
    const NAME: &str = "imap_port";
    let command = format!("timeout 5 bash -c '</dev/tcp/127.0.0.1/{}'", IMAPS_PORT);
    match session.run(&command).await {
        Ok(output) if output.success() => {
            CheckResult::new(NAME, CheckStatus::Pass, format!("port {} open", IMAPS_PORT))
        }
        Ok(output) => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            format!("port {} closed (exit {})", IMAPS_PORT, output.exit_status),
        ),
        Err(e) => CheckResult::new(NAME, CheckStatus::Error, e.to_string()),
    }
}

/// Verify the certificate served on the IMAPS port
pub async fn check_tls_certificate(session: &dyn RemoteSession, primary_domain: &str) -> CheckResult {
    const NAME: &str = "tls_certificate";
    let host = mail_host(primary_domain);
    let command = format!(
        "openssl s_client -connect {host}:{port} -servername {host} < /dev/null",
        host = shell_quote(&host),
        port = IMAPS_PORT
    );
    match session.run(&command).await {
        Ok(output) if output.stdout.contains(TLS_OK) => {
            CheckResult::new(NAME, CheckStatus::Pass, format!("valid certificate for {}", host))
        }
        Ok(_) => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            format!("certificate for {} did not verify", host),
        ),
        Err(e) => CheckResult::new(NAME, CheckStatus::Error, e.to_string()),
    }
}

/// Single MX lookup; no waiting
pub async fn check_dns_propagation(lookup: &dyn DnsLookup, domain: &str) -> CheckResult {
    let name = format!("dns_propagation:{}", domain);
    match lookup.mx(domain).await {
        Ok(records) if mx_points_at_host(&records, domain) => CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("MX points at {}", mail_host(domain)),
        ),
        Ok(records) => {
            let servers: Vec<_> = records.iter().map(|mx| mx.server.as_str()).collect();
            CheckResult::new(
                name,
                CheckStatus::Fail,
                format!("MX is [{}]", servers.join(", ")),
            )
        }
        Err(e) => CheckResult::new(name, CheckStatus::Error, e.to_string()),
    }
}

/// Every check, in order
pub async fn run_checks(
    session: &dyn RemoteSession,
    lookup: &dyn DnsLookup,
    domains: &[String],
    accounts: &[MailAccount],
    admin_email: &str,
) -> Vec<CheckResult> {
    info!("Running verification checks");
    let primary = domains.first().map(String::as_str).unwrap_or_default();

    let mut results = vec![
        check_smtp_send(session, accounts, admin_email).await,
        check_imap_port(session).await,
        check_tls_certificate(session, primary).await,
    ];
    for domain in domains {
        results.push(check_dns_propagation(lookup, domain).await);
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    info!("Verification: {}/{} checks passed", passed, results.len());
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{MockRemote, StaticDnsLookup};
    use crate::providers::RemoteConnector;
    use std::net::Ipv4Addr;

    fn accounts() -> Vec<MailAccount> {
        vec![MailAccount::new("alex.smith", "a.test", "pw")]
    }

    #[test]
    fn test_mx_points_at_host() {
        let records = vec![MxRecord::new(10, "MAIL.a.test.")];
        assert!(mx_points_at_host(&records, "a.test"));
        assert!(!mx_points_at_host(&records, "b.test"));
        assert!(!mx_points_at_host(&[], "a.test"));
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let remote = MockRemote::new();
        let session = remote.connect(Ipv4Addr::LOCALHOST).await.unwrap();
        let lookup = StaticDnsLookup::new().with_mx("a.test", vec![MxRecord::new(10, "mail.a.test")]);

        let results = run_checks(
            session.as_ref(),
            &lookup,
            &["a.test".to_string()],
            &accounts(),
            "admin@a.test",
        )
        .await;

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["smtp_send", "imap_port", "tls_certificate", "dns_propagation:a.test"]
        );
        assert!(results.iter().all(|r| r.passed()));
        assert!(remote
            .commands()
            .iter()
            .any(|c| c.contains("mail -s 'Test from alex.smith@a.test' 'admin@a.test'")));
    }

    #[tokio::test]
    async fn test_check_statuses_are_independent() {
        let remote = MockRemote::new()
            .fail_command("/dev/tcp/")
            .break_transport("mail -s");
        let session = remote.connect(Ipv4Addr::LOCALHOST).await.unwrap();
        let lookup = StaticDnsLookup::new()
            .with_mx("a.test", vec![MxRecord::new(1, "aspmx.l.google.com")])
            .failing("b.test");

        let results = run_checks(
            session.as_ref(),
            &lookup,
            &["a.test".to_string(), "b.test".to_string()],
            &accounts(),
            "admin@a.test",
        )
        .await;

        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                CheckStatus::Error,
                CheckStatus::Fail,
                CheckStatus::Pass,
                CheckStatus::Fail,
                CheckStatus::Error,
            ]
        );
    }

    #[tokio::test]
    async fn test_smtp_without_accounts_fails() {
        let remote = MockRemote::new();
        let session = remote.connect(Ipv4Addr::LOCALHOST).await.unwrap();
        let result = check_smtp_send(session.as_ref(), &[], "admin@a.test").await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(remote.commands().is_empty());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&CheckStatus::Pass).unwrap(), "\"PASS\"");
        assert_eq!(serde_json::to_string(&CheckStatus::Error).unwrap(), "\"ERROR\"");
    }
}
