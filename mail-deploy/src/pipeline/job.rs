//! Deployment job state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts::{AccountFailure, MailAccount, ServerSecrets};
use crate::dns::{DnsRecord, DomainAnalysis, SuggestedRecords};
use crate::error::{DeployError, Result};
use crate::verify::CheckResult;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Requested,
    Provisioning,
    AwaitingSsh,
    AwaitingBootstrap,
    ConfiguringDns,
    ConfiguringMailServer,
    CreatingAccounts,
    Verifying,
    Reported,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Requested => "requested",
            Stage::Provisioning => "provisioning",
            Stage::AwaitingSsh => "awaiting_ssh",
            Stage::AwaitingBootstrap => "awaiting_bootstrap",
            Stage::ConfiguringDns => "configuring_dns",
            Stage::ConfiguringMailServer => "configuring_mail_server",
            Stage::CreatingAccounts => "creating_accounts",
            Stage::Verifying => "verifying",
            Stage::Reported => "reported",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Reported | Stage::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded stage change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
}

/// Record the DNS provider refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub record: DnsRecord,
    pub error: String,
}

/// DNS outcome for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDnsResult {
    pub domain: String,
    pub analysis: DomainAnalysis,
    pub suggestions: SuggestedRecords,
    pub created: Vec<DnsRecord>,
    pub failed: Vec<RecordFailure>,
    /// `None` when propagation was not waited for
    pub propagated: Option<bool>,
}

impl DomainDnsResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One pipeline run
///
/// Owned by a single run and never resumed; everything it accumulates ends up
/// in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub id: Uuid,
    pub domains: Vec<String>,
    pub stage: Stage,
    pub history: Vec<StageTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub host_id: Option<String>,
    /// Set once provisioning succeeds
    pub address: Option<Ipv4Addr>,
    pub secrets: Option<ServerSecrets>,
    pub dns: Vec<DomainDnsResult>,
    pub accounts: Vec<MailAccount>,
    pub account_failures: Vec<AccountFailure>,
    pub verification: Vec<CheckResult>,
    /// Stage that was running when the job failed
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub report_dir: Option<PathBuf>,
}

impl DeploymentJob {
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            domains,
            stage: Stage::Requested,
            history: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            host_id: None,
            address: None,
            secrets: None,
            dns: Vec::new(),
            accounts: Vec::new(),
            account_failures: Vec::new(),
            verification: Vec::new(),
            failed_stage: None,
            error: None,
            report_dir: None,
        }
    }

    fn transition(&mut self, to: Stage) {
        self.history.push(StageTransition {
            from: self.stage,
            to,
            at: Utc::now(),
        });
        info!(job = %self.id, "{} -> {}", self.stage, to);
        self.stage = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Move forward to `to`
    ///
    /// Stages only move forward; `Failed` is entered through [`Self::fail`].
    pub fn advance(&mut self, to: Stage) -> Result<()> {
        if self.stage.is_terminal() || to == Stage::Failed || to <= self.stage {
            return Err(DeployError::InvalidTransition {
                from: self.stage.to_string(),
                to: to.to_string(),
            });
        }
        self.transition(to);
        Ok(())
    }

    /// Enter `Failed`, recording `error` and the stage it interrupted
    pub fn fail(&mut self, error: &DeployError) {
        if self.stage.is_terminal() {
            warn!(job = %self.id, "Ignoring failure after {}: {}", self.stage, error);
            return;
        }
        self.failed_stage = Some(self.stage);
        self.error = Some(error.to_string());
        self.transition(Stage::Failed);
    }

    pub fn is_success(&self) -> bool {
        self.stage == Stage::Reported
    }

    /// Whether the job ever entered `Failed`
    pub fn has_failed(&self) -> bool {
        self.history.iter().any(|t| t.to == Stage::Failed)
    }

    pub fn dns_result(&self, domain: &str) -> Option<&DomainDnsResult> {
        self.dns.iter().find(|r| r.domain == domain)
    }

    pub fn accounts_for<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a MailAccount> + 'a {
        self.accounts.iter().filter(move |a| a.domain == domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> DeploymentJob {
        DeploymentJob::new(vec!["a.test".to_string()])
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Requested < Stage::Provisioning);
        assert!(Stage::ConfiguringDns < Stage::ConfiguringMailServer);
        assert!(Stage::Verifying < Stage::Reported);
        assert!(Stage::Reported.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Verifying.is_terminal());
    }

    #[test]
    fn test_advance_forward() {
        let mut job = job();
        job.advance(Stage::Provisioning).unwrap();
        job.advance(Stage::AwaitingSsh).unwrap();
        assert_eq!(job.stage, Stage::AwaitingSsh);
        assert_eq!(job.history.len(), 2);
        assert_eq!(job.history[1].from, Stage::Provisioning);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_advance_rejects_regression() {
        let mut job = job();
        job.advance(Stage::ConfiguringDns).unwrap();
        let err = job.advance(Stage::Provisioning).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid stage transition from configuring_dns to provisioning"
        );
        assert!(job.advance(Stage::ConfiguringDns).is_err());
        assert_eq!(job.stage, Stage::ConfiguringDns);
    }

    #[test]
    fn test_failed_only_through_fail() {
        let mut job = job();
        assert!(job.advance(Stage::Failed).is_err());

        job.advance(Stage::AwaitingBootstrap).unwrap();
        job.fail(&DeployError::Remote("boom".to_string()));
        assert_eq!(job.stage, Stage::Failed);
        assert_eq!(job.failed_stage, Some(Stage::AwaitingBootstrap));
        assert_eq!(job.error.as_deref(), Some("Remote error: boom"));
        assert!(job.has_failed());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_stages_are_final() {
        let mut job = job();
        job.advance(Stage::Reported).unwrap();
        assert!(job.advance(Stage::Failed).is_err());

        job.fail(&DeployError::Config("late".to_string()));
        assert_eq!(job.stage, Stage::Reported);
        assert!(job.error.is_none());
        assert!(!job.has_failed());
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_string(&Stage::ConfiguringMailServer).unwrap();
        assert_eq!(json, "\"configuring_mail_server\"");
    }
}
