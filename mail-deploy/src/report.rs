//! Deployment report files
//!
//! A finished job is written to `deployment_<timestamp>/`:
//! - `deployment_report.json`: job metadata, accounts, secrets, DNS and checks
//! - `email_credentials.csv`: one row per account
//! - `dns_instructions.txt`: what to change at each domain's DNS host
//! - `monitor.toml`: monitor configuration with login tests for the accounts

use chrono::{DateTime, Utc};
use mail_monitor::MonitorConfig;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::accounts::{AccountFailure, MailAccount, ServerSecrets};
use crate::dns::analyzer::render_instructions;
use crate::error::Result;
use crate::pipeline::job::{DeploymentJob, DomainDnsResult, StageTransition};
use crate::verify::CheckResult;

pub const REPORT_FILE: &str = "deployment_report.json";
pub const CREDENTIALS_FILE: &str = "email_credentials.csv";
pub const DNS_INSTRUCTIONS_FILE: &str = "dns_instructions.txt";
pub const MONITOR_CONFIG_FILE: &str = "monitor.toml";

const CSV_HEADER: &str = "Domain,Email,Username,Password,SMTP_Host,SMTP_Port,SMTP_Security,IMAP_Host,IMAP_Port,IMAP_Security";

#[derive(Debug, Serialize)]
struct DeploymentInfo<'a> {
    job_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    generated_at: DateTime<Utc>,
    vps_ip: Option<Ipv4Addr>,
    host_id: Option<&'a str>,
    domains: &'a [String],
    total_accounts: usize,
    failed_accounts: usize,
}

#[derive(Debug, Serialize)]
struct DeploymentReport<'a> {
    deployment_info: DeploymentInfo<'a>,
    email_accounts: &'a [MailAccount],
    account_failures: &'a [AccountFailure],
    server_details: Option<&'a ServerSecrets>,
    dns: &'a [DomainDnsResult],
    test_results: &'a [CheckResult],
    stages: &'a [StageTransition],
}

/// Where the report files were written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub dir: PathBuf,
    pub report: PathBuf,
    pub credentials: PathBuf,
    pub dns_instructions: PathBuf,
    pub monitor_config: PathBuf,
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// CSV export of `accounts`, header included
pub fn credentials_csv(accounts: &[MailAccount]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for account in accounts {
        let fields = [
            account.domain.clone(),
            account.email.clone(),
            account.username.clone(),
            account.password.clone(),
            account.smtp.host.clone(),
            account.smtp.port.to_string(),
            account.smtp.security.clone(),
            account.imap.host.clone(),
            account.imap.port.to_string(),
            account.imap.security.clone(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// DNS work for every domain of the job
pub fn dns_instructions(job: &DeploymentJob) -> String {
    let mut out = String::from("DNS CONFIGURATION INSTRUCTIONS\n");
    out.push_str(&"=".repeat(50));
    out.push('\n');
    if let Some(address) = job.address {
        out.push_str(&format!("Mail server address: {}\n", address));
    }

    for result in &job.dns {
        out.push('\n');
        out.push_str(&render_instructions(&result.analysis, &result.suggestions));
        if !result.failed.is_empty() {
            out.push_str("\nRecords that could not be created automatically:\n");
            for failure in &result.failed {
                out.push_str(&format!(
                    "  {} ({})\n",
                    failure.record.describe(),
                    failure.error
                ));
            }
        }
        out.push_str(&"-".repeat(50));
        out.push('\n');
    }
    out
}

/// `monitoring` plus a login test for the first account of each domain
pub fn monitor_config(monitoring: &MonitorConfig, job: &DeploymentJob) -> MonitorConfig {
    let mut config = monitoring.clone();
    for domain in &job.domains {
        if let Some(account) = job.accounts_for(domain).next() {
            if !config.test_accounts.iter().any(|t| t.email == account.email) {
                config.test_accounts.push(account.to_test_account());
            }
        }
    }
    config
}

fn unique_dir(output_dir: &Path, started_at: DateTime<Utc>) -> PathBuf {
    let base = format!("deployment_{}", started_at.format("%Y%m%d_%H%M%S"));
    let mut dir = output_dir.join(&base);
    let mut n = 2;
    while dir.exists() {
        dir = output_dir.join(format!("{}_{}", base, n));
        n += 1;
    }
    dir
}

/// Write every report file for `job` under `output_dir`
pub fn write_report(
    output_dir: &Path,
    job: &DeploymentJob,
    monitoring: &MonitorConfig,
) -> Result<ReportPaths> {
    std::fs::create_dir_all(output_dir)?;
    let dir = unique_dir(output_dir, job.started_at);
    std::fs::create_dir_all(&dir)?;

    let paths = ReportPaths {
        report: dir.join(REPORT_FILE),
        credentials: dir.join(CREDENTIALS_FILE),
        dns_instructions: dir.join(DNS_INSTRUCTIONS_FILE),
        monitor_config: dir.join(MONITOR_CONFIG_FILE),
        dir,
    };

    let report = DeploymentReport {
        deployment_info: DeploymentInfo {
            job_id: job.id,
            started_at: job.started_at,
            finished_at: job.finished_at,
            generated_at: Utc::now(),
            vps_ip: job.address,
            host_id: job.host_id.as_deref(),
            domains: &job.domains,
            total_accounts: job.accounts.len(),
            failed_accounts: job.account_failures.len(),
        },
        email_accounts: &job.accounts,
        account_failures: &job.account_failures,
        server_details: job.secrets.as_ref(),
        dns: &job.dns,
        test_results: &job.verification,
        stages: &job.history,
    };
    std::fs::write(&paths.report, serde_json::to_string_pretty(&report)?)?;
    std::fs::write(&paths.credentials, credentials_csv(&job.accounts))?;
    std::fs::write(&paths.dns_instructions, dns_instructions(job))?;
    std::fs::write(
        &paths.monitor_config,
        monitor_config(monitoring, job).to_toml()?,
    )?;

    info!("Report written to {}", paths.dir.display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{suggest_records, DnsHost, DomainAnalysis};
    use crate::pipeline::job::RecordFailure;

    fn job() -> DeploymentJob {
        let address = Ipv4Addr::new(203, 0, 113, 10);
        let mut job = DeploymentJob::new(vec!["a.test".to_string(), "b.test".to_string()]);
        job.address = Some(address);
        job.host_id = Some("42".to_string());
        job.accounts = vec![
            MailAccount::new("alex.smith", "a.test", "p,w\"1"),
            MailAccount::new("sage.jones", "a.test", "pw2"),
            MailAccount::new("quinn.brown", "b.test", "pw3"),
        ];
        let suggestions = suggest_records("b.test", address);
        job.dns = vec![DomainDnsResult {
            domain: "b.test".to_string(),
            analysis: DomainAnalysis {
                domain: "b.test".to_string(),
                mx_records: Vec::new(),
                provider: DnsHost::Cloudflare,
                conflicts: Vec::new(),
                lookup_errors: Vec::new(),
            },
            created: suggestions.required[..2].to_vec(),
            failed: vec![RecordFailure {
                record: suggestions.required[2].clone(),
                error: "rejected".to_string(),
            }],
            suggestions,
            propagated: None,
        }];
        job
    }

    #[test]
    fn test_credentials_csv() {
        let csv = credentials_csv(&job().accounts);
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "a.test,alex.smith@a.test,alex.smith,\"p,w\"\"1\",mail.a.test,587,STARTTLS,mail.a.test,993,SSL"
        );
    }

    #[test]
    fn test_monitor_config_gets_first_account_per_domain() {
        let config = monitor_config(&MonitorConfig::default(), &job());
        let emails: Vec<_> = config.test_accounts.iter().map(|t| t.email.as_str()).collect();
        assert_eq!(emails, vec!["alex.smith@a.test", "quinn.brown@b.test"]);
    }

    #[test]
    fn test_dns_instructions_list_failed_records() {
        let text = dns_instructions(&job());
        assert!(text.contains("Mail server address: 203.0.113.10"));
        assert!(text.contains("Domain: b.test"));
        assert!(text.contains("Records that could not be created automatically:"));
        assert!(text.contains("v=spf1 mx a ip4:203.0.113.10 ~all (rejected)"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let job = job();
        let paths = write_report(dir.path(), &job, &MonitorConfig::default()).unwrap();

        assert!(paths
            .dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("deployment_"));

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.report).unwrap()).unwrap();
        assert_eq!(report["deployment_info"]["vps_ip"], "203.0.113.10");
        assert_eq!(report["deployment_info"]["total_accounts"], 3);
        assert_eq!(report["email_accounts"][2]["imap_settings"]["host"], "mail.b.test");

        let monitor = MonitorConfig::from_file(&paths.monitor_config).unwrap();
        assert_eq!(monitor.test_accounts.len(), 2);

        // a second report for the same start time gets its own directory
        let again = write_report(dir.path(), &job, &MonitorConfig::default()).unwrap();
        assert_ne!(again.dir, paths.dir);
    }
}
