//! End-to-end pipeline runs against in-memory providers

use mail_deploy::dns::MxRecord;
use mail_deploy::providers::mock::{
    MockDnsProvider, MockRemote, MockVps, SequentialCredentials, StaticDnsLookup,
};
use mail_deploy::verify::CheckStatus;
use mail_deploy::{Capabilities, DeployConfig, DeploymentJob, Pipeline, Stage};
use std::net::Ipv4Addr;
use std::sync::Arc;

const ADDRESS: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 10);

struct Harness {
    vps: MockVps,
    dns: MockDnsProvider,
    remote: MockRemote,
    lookup: StaticDnsLookup,
}

impl Harness {
    fn new() -> Self {
        Self {
            vps: MockVps::new(ADDRESS),
            dns: MockDnsProvider::new(),
            remote: MockRemote::new(),
            lookup: StaticDnsLookup::new(),
        }
    }

    fn caps(&self) -> Capabilities {
        Capabilities {
            vps: Arc::new(self.vps.clone()),
            dns: Arc::new(self.dns.clone()),
            remote: Arc::new(self.remote.clone()),
            lookup: Arc::new(self.lookup.clone()),
            credentials: Arc::new(SequentialCredentials::new()),
        }
    }

    async fn run(&self, config: DeployConfig) -> DeploymentJob {
        Pipeline::new(Arc::new(config), self.caps()).run().await
    }
}

fn config(domains: &[&str], per_domain: usize) -> DeployConfig {
    let mut config = DeployConfig::default();
    config.domains = domains.iter().map(|d| d.to_string()).collect();
    config.email_settings.emails_per_domain = per_domain;
    config.email_settings.admin_email = "admin@a.test".to_string();
    config
}

fn stages(job: &DeploymentJob) -> Vec<Stage> {
    job.history.iter().map(|t| t.to).collect()
}

#[tokio::test]
async fn test_two_domain_deployment() {
    let harness = Harness::new();
    let job = harness.run(config(&["a.test", "b.test"], 2)).await;

    assert_eq!(job.stage, Stage::Reported);
    assert!(!job.has_failed());
    assert!(job.error.is_none());
    assert_eq!(job.accounts.len(), 4);
    assert!(job.account_failures.is_empty());
    assert_eq!(job.accounts_for("a.test").count(), 2);
    assert_eq!(job.accounts_for("b.test").count(), 2);
    assert_eq!(job.address, Some(ADDRESS));
    assert_eq!(job.host_id.as_deref(), Some("mock-1"));

    assert_eq!(
        stages(&job),
        vec![
            Stage::Provisioning,
            Stage::AwaitingSsh,
            Stage::AwaitingBootstrap,
            Stage::ConfiguringDns,
            Stage::ConfiguringMailServer,
            Stage::CreatingAccounts,
            Stage::Verifying,
            Stage::Reported,
        ]
    );

    // three required records per domain
    assert_eq!(harness.dns.created().len(), 6);
    assert_eq!(harness.vps.created().len(), 1);
    assert_eq!(harness.remote.sessions_opened(), 1);
    assert_eq!(harness.remote.sessions_closed(), 1);
}

#[tokio::test]
async fn test_one_failed_account_out_of_nine() {
    let harness = Harness {
        remote: MockRemote::new().fail_nth_command("INSERT INTO mailserver.users", 5),
        ..Harness::new()
    };
    let job = harness
        .run(config(&["a.test", "b.test", "c.test"], 3))
        .await;

    assert_eq!(job.stage, Stage::Reported);
    assert_eq!(job.accounts.len(), 8);
    assert_eq!(job.account_failures.len(), 1);

    let failure = &job.account_failures[0];
    assert_eq!(failure.domain, "b.test");
    assert_eq!(failure.email.as_deref(), Some("user5@b.test"));
    assert!(job.accounts.iter().all(|a| a.email != "user5@b.test"));
}

#[tokio::test]
async fn test_mail_server_failure_closes_session() {
    let harness = Harness {
        remote: MockRemote::new().fail_command("systemctl restart dovecot"),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 2)).await;

    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(job.failed_stage, Some(Stage::ConfiguringMailServer));
    assert!(job
        .error
        .as_deref()
        .unwrap()
        .contains("mailbox server configuration failed"));
    assert!(job.accounts.is_empty());
    assert_eq!(harness.remote.sessions_opened(), 1);
    assert_eq!(harness.remote.sessions_closed(), 1);
    assert!(!harness
        .remote
        .commands()
        .iter()
        .any(|c| c.contains("INSERT IGNORE INTO mailserver.domains")));
}

#[tokio::test]
async fn test_provider_error_fails_without_retry() {
    let harness = Harness {
        vps: MockVps::new(ADDRESS).reject_create("Unable to authenticate you"),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 1)).await;

    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(job.failed_stage, Some(Stage::Provisioning));
    assert_eq!(
        job.error.as_deref(),
        Some("Provider error: Unable to authenticate you")
    );
    assert_eq!(harness.vps.polls(), 0);
    assert_eq!(harness.remote.connect_attempts(), 0);
}

#[tokio::test]
async fn test_status_lookup_error_is_not_retried() {
    let harness = Harness {
        vps: MockVps::new(ADDRESS).reject_lookup("droplet not found"),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 1)).await;

    assert_eq!(job.failed_stage, Some(Stage::Provisioning));
    assert_eq!(job.host_id.as_deref(), Some("mock-1"));
    assert!(job.address.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_timeout() {
    let harness = Harness {
        vps: MockVps::new(ADDRESS).never_active(),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 1)).await;

    assert_eq!(job.failed_stage, Some(Stage::Provisioning));
    assert!(job
        .error
        .as_deref()
        .unwrap()
        .contains("waiting for host mock-1 to become active"));
    // 600s budget polled every 15s
    assert_eq!(harness.vps.polls(), 41);
}

#[tokio::test(start_paused = true)]
async fn test_ssh_timeout() {
    let harness = Harness {
        remote: MockRemote::new().refuse_connections(usize::MAX),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 1)).await;

    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(job.failed_stage, Some(Stage::AwaitingSsh));
    assert!(job
        .error
        .as_deref()
        .unwrap()
        .contains("waiting for SSH on 203.0.113.10"));
    assert_eq!(harness.remote.connect_attempts(), 31);
    assert_eq!(harness.remote.sessions_closed(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_slow_host() {
    let harness = Harness {
        vps: MockVps::new(ADDRESS).active_after(3),
        remote: MockRemote::new().refuse_connections(2).bootstrap_after(4),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 1)).await;

    assert_eq!(job.stage, Stage::Reported);
    assert_eq!(harness.vps.polls(), 4);
    assert_eq!(harness.remote.connect_attempts(), 3);
    let marker_checks = harness
        .remote
        .commands()
        .iter()
        .filter(|c| c.contains("/tmp/cloud-init-complete"))
        .count();
    assert_eq!(marker_checks, 5);
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_timeout_closes_session() {
    let harness = Harness {
        remote: MockRemote::new().bootstrap_after(usize::MAX),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 1)).await;

    assert_eq!(job.failed_stage, Some(Stage::AwaitingBootstrap));
    assert_eq!(harness.remote.sessions_closed(), 1);
}

#[tokio::test]
async fn test_dns_record_failure_is_not_fatal() {
    let harness = Harness {
        dns: MockDnsProvider::new().reject("b.test", "TXT"),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test", "b.test"], 1)).await;

    assert_eq!(job.stage, Stage::Reported);
    let a = job.dns_result("a.test").unwrap();
    assert!(a.is_complete());
    assert_eq!(a.created.len(), 3);

    let b = job.dns_result("b.test").unwrap();
    assert_eq!(b.created.len(), 2);
    assert_eq!(b.failed.len(), 1);
    assert_eq!(b.failed[0].record.value, "v=spf1 mx a ip4:203.0.113.10 ~all");
    assert_eq!(b.propagated, None);
}

#[tokio::test]
async fn test_conflicts_are_recorded_not_fatal() {
    let harness = Harness {
        lookup: StaticDnsLookup::new()
            .with_mx("a.test", vec![MxRecord::new(1, "aspmx.l.google.com")])
            .with_nameservers("a.test", &["kim.ns.cloudflare.com"]),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 1)).await;

    assert_eq!(job.stage, Stage::Reported);
    let analysis = &job.dns_result("a.test").unwrap().analysis;
    assert_eq!(analysis.conflicts.len(), 1);
    assert_eq!(harness.dns.created().len(), 3);
}

#[tokio::test]
async fn test_verification_failures_do_not_fail_job() {
    let harness = Harness {
        remote: MockRemote::new()
            .fail_command("/dev/tcp/")
            .break_transport("openssl s_client"),
        ..Harness::new()
    };
    let job = harness.run(config(&["a.test"], 1)).await;

    assert_eq!(job.stage, Stage::Reported);
    let status = |name: &str| {
        job.verification
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.status)
    };
    assert_eq!(status("smtp_send"), Some(CheckStatus::Pass));
    assert_eq!(status("imap_port"), Some(CheckStatus::Fail));
    assert_eq!(status("tls_certificate"), Some(CheckStatus::Error));
    // the mock resolver has no MX for the domain
    assert_eq!(status("dns_propagation:a.test"), Some(CheckStatus::Fail));
}

#[tokio::test]
async fn test_report_written_for_finished_job() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let job = Pipeline::new(Arc::new(config(&["a.test", "b.test"], 2)), harness.caps())
        .with_output_dir(dir.path().to_path_buf())
        .run()
        .await;

    assert_eq!(job.stage, Stage::Reported);
    let report_dir = job.report_dir.clone().unwrap();
    assert!(report_dir.starts_with(dir.path()));

    let csv = std::fs::read_to_string(report_dir.join("email_credentials.csv")).unwrap();
    assert_eq!(csv.lines().count(), 5);

    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(report_dir.join("deployment_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["deployment_info"]["total_accounts"], 4);
    assert!(report["deployment_info"]["finished_at"].is_string());
    let stages = report["stages"].as_array().unwrap();
    assert_eq!(stages.last().unwrap()["from"], "verifying");
    assert_eq!(stages.last().unwrap()["to"], "reported");
    assert_eq!(
        report["server_details"]["hostname"],
        serde_json::Value::from("mail.a.test")
    );

    let monitor = std::fs::read_to_string(report_dir.join("monitor.toml")).unwrap();
    assert!(monitor.contains("user1@a.test"));
    assert!(monitor.contains("user3@b.test"));
    assert!(report_dir.join("dns_instructions.txt").exists());
}

#[tokio::test]
async fn test_report_write_failure_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();
    let harness = Harness::new();
    let job = Pipeline::new(Arc::new(config(&["a.test"], 1)), harness.caps())
        .with_output_dir(blocker)
        .run()
        .await;

    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(job.failed_stage, Some(Stage::Verifying));
    assert!(job.error.as_deref().unwrap().starts_with("IO error"));
    assert!(job.report_dir.is_none());
    assert!(!stages(&job).contains(&Stage::Reported));
    assert_eq!(harness.remote.sessions_closed(), 1);
}
