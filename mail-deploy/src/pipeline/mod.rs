//! Deployment pipeline
//!
//! Drives one [`DeploymentJob`] through provisioning, DNS, mail-server
//! configuration, account creation, verification and reporting. Every wait
//! is bounded by a [`PollBudget`](crate::poller::PollBudget) from the
//! configuration, and the remote session is closed on every exit path.

pub mod job;
pub mod mail_server;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::accounts::{create_domain_accounts, CredentialGenerator, RandomCredentials, ServerSecrets};
use crate::config::DeployConfig;
use crate::dns::{suggest_records, DnsAnalyzer, DnsLookup, SystemResolver};
use crate::error::{DeployError, Result};
use crate::poller::{wait_for, wait_until, PollOutcome};
use crate::providers::ssh::OpenSshConnector;
use crate::providers::{
    dns_from_config, vps_from_config, DnsProvider, HostSpec, RemoteConnector, RemoteSession,
    VpsProvider,
};
use crate::report::write_report;
use crate::templates::{cloud_init_script, BOOTSTRAP_MARKER};
use crate::verify::{mx_points_at_host, run_checks};

pub use job::{DeploymentJob, DomainDnsResult, RecordFailure, Stage, StageTransition};

/// Everything the pipeline talks to
#[derive(Clone)]
pub struct Capabilities {
    pub vps: Arc<dyn VpsProvider>,
    pub dns: Arc<dyn DnsProvider>,
    pub remote: Arc<dyn RemoteConnector>,
    pub lookup: Arc<dyn DnsLookup>,
    pub credentials: Arc<dyn CredentialGenerator>,
}

impl Capabilities {
    /// Production implementations selected by the configuration
    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        Ok(Self {
            vps: vps_from_config(config)?,
            dns: dns_from_config(config)?,
            remote: Arc::new(OpenSshConnector::new(config.vps_provider.ssh_user.clone())),
            lookup: Arc::new(SystemResolver::new()),
            credentials: Arc::new(RandomCredentials),
        })
    }
}

/// Deployment pipeline
pub struct Pipeline {
    config: Arc<DeployConfig>,
    caps: Capabilities,
    output_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(config: Arc<DeployConfig>, caps: Capabilities) -> Self {
        Self {
            config,
            caps,
            output_dir: None,
        }
    }

    /// Write the report files under `dir` once verification is done
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }

    /// Run a job to `Reported` or `Failed`
    pub async fn run(&self) -> DeploymentJob {
        let mut job = DeploymentJob::new(self.config.domains.clone());
        info!(job = %job.id, "Starting deployment for {}", job.domains.join(", "));

        let mut session: Option<Box<dyn RemoteSession>> = None;
        let outcome = self.drive(&mut job, &mut session).await;

        if let Some(session) = session.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close remote session: {}", e);
            }
        }

        match outcome {
            Ok(()) => info!(
                job = %job.id,
                "Deployment completed: {} accounts, {} failures",
                job.accounts.len(),
                job.account_failures.len()
            ),
            Err(e) => {
                error!(job = %job.id, "Deployment failed during {}: {}", job.stage, e);
                job.fail(&e);
            }
        }
        job
    }

    async fn drive(
        &self,
        job: &mut DeploymentJob,
        slot: &mut Option<Box<dyn RemoteSession>>,
    ) -> Result<()> {
        let config = self.config.as_ref();
        let primary = config.primary_domain();
        let secrets = ServerSecrets::resolve(
            &config.server_settings,
            primary,
            self.caps.credentials.as_ref(),
        );
        job.secrets = Some(secrets.clone());

        job.advance(Stage::Provisioning)?;
        let address = self.provision(job, &secrets).await?;

        job.advance(Stage::AwaitingSsh)?;
        let connected = self.await_ssh(address).await?;
        let session: &dyn RemoteSession = &**slot.insert(connected);

        job.advance(Stage::AwaitingBootstrap)?;
        self.await_bootstrap(session).await?;

        job.advance(Stage::ConfiguringDns)?;
        for domain in &config.domains {
            let result = self.configure_domain_dns(domain, address).await;
            job.dns.push(result);
        }

        job.advance(Stage::ConfiguringMailServer)?;
        mail_server::configure(
            session,
            primary,
            &config.email_settings.admin_email,
            &secrets,
        )
        .await?;

        job.advance(Stage::CreatingAccounts)?;
        for domain in &config.domains {
            let (accounts, failures) = create_domain_accounts(
                session,
                &secrets,
                self.caps.credentials.as_ref(),
                domain,
                config.email_settings.emails_per_domain,
            )
            .await;
            job.accounts.extend(accounts);
            job.account_failures.extend(failures);
        }

        job.advance(Stage::Verifying)?;
        job.verification = run_checks(
            session,
            self.caps.lookup.as_ref(),
            &config.domains,
            &job.accounts,
            &config.email_settings.admin_email,
        )
        .await;

        // report from a copy already in `Reported`; on a write failure the
        // job stays in `Verifying`
        let mut finished = job.clone();
        finished.advance(Stage::Reported)?;
        if let Some(dir) = &self.output_dir {
            let paths = write_report(dir, &finished, &config.monitoring)?;
            finished.report_dir = Some(paths.dir);
        }
        *job = finished;
        Ok(())
    }

    fn host_spec(&self, secrets: &ServerSecrets) -> HostSpec {
        let vps = &self.config.vps_provider;
        HostSpec {
            name: format!("mail-server-{}", chrono::Utc::now().timestamp()),
            region: vps.region.clone(),
            size: vps.size.clone(),
            image: vps.image.clone(),
            ssh_keys: vec![vps.ssh_key_id.clone()],
            user_data: cloud_init_script(secrets),
            tags: vec!["email-server".to_string(), "automated".to_string()],
        }
    }

    async fn provision(&self, job: &mut DeploymentJob, secrets: &ServerSecrets) -> Result<Ipv4Addr> {
        let vps = self.caps.vps.as_ref();
        let host_id = vps.create_host(&self.host_spec(secrets)).await?;
        info!("Host {} requested", host_id);
        job.host_id = Some(host_id.clone());

        let budget = self.config.timeouts.provisioning;
        let id = host_id.as_str();
        let what = format!("host {} to become active", host_id);
        let outcome = wait_until(budget.timeout(), budget.interval(), &what, move || async move {
            vps.get_host(id).await.map(|info| info.ready_address())
        })
        .await?;

        match outcome {
            PollOutcome::Ready(address) => {
                info!("Host {} active at {}", host_id, address);
                job.address = Some(address);
                Ok(address)
            }
            PollOutcome::TimedOut { waited, .. } => Err(DeployError::timeout(what, waited)),
        }
    }

    async fn await_ssh(&self, address: Ipv4Addr) -> Result<Box<dyn RemoteSession>> {
        let remote = self.caps.remote.as_ref();
        let budget = self.config.timeouts.ssh;
        let what = format!("SSH on {}", address);

        let outcome = wait_until(budget.timeout(), budget.interval(), &what, move || async move {
            match remote.connect(address).await {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    debug!("SSH not ready on {}: {}", address, e);
                    Ok::<_, DeployError>(None)
                }
            }
        })
        .await?;

        match outcome {
            PollOutcome::Ready(session) => Ok(session),
            PollOutcome::TimedOut { waited, .. } => Err(DeployError::timeout(what, waited)),
        }
    }

    async fn await_bootstrap(&self, session: &dyn RemoteSession) -> Result<()> {
        let command = format!("test -f {} && echo ready", BOOTSTRAP_MARKER);
        let command = command.as_str();
        let what = "first-boot setup";

        let outcome = wait_for(self.config.timeouts.bootstrap, what, move || async move {
            let output = session.run(command).await?;
            Ok::<_, DeployError>(output.success() && output.stdout.contains("ready"))
        })
        .await?;

        match outcome {
            PollOutcome::Ready(()) => {
                info!("First-boot setup complete");
                Ok(())
            }
            PollOutcome::TimedOut { waited, .. } => Err(DeployError::timeout(what, waited)),
        }
    }

    /// Analyze, submit the required records, optionally wait for the MX
    ///
    /// Nothing here fails the job; problems are recorded in the result.
    async fn configure_domain_dns(&self, domain: &str, address: Ipv4Addr) -> DomainDnsResult {
        let analysis = DnsAnalyzer::new(self.caps.lookup.clone())
            .analyze(domain)
            .await;
        if analysis.has_conflicts() {
            warn!(
                "{} has {} conflicting MX record(s); continuing",
                domain,
                analysis.conflicts.len()
            );
        }

        let suggestions = suggest_records(domain, address);
        let zone = self.config.zone_for(domain);
        let mut created = Vec::new();
        let mut failed = Vec::new();
        for record in &suggestions.required {
            match self.caps.dns.create_record(zone, domain, record).await {
                Ok(()) => created.push(record.clone()),
                Err(e) => {
                    warn!(
                        "Failed to create {} record {}: {}",
                        record.record_type,
                        record.fqdn(domain),
                        e
                    );
                    failed.push(RecordFailure {
                        record: record.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let propagated = if self.config.dns.wait_for_propagation {
            Some(self.await_propagation(domain).await)
        } else {
            None
        };

        DomainDnsResult {
            domain: domain.to_string(),
            analysis,
            suggestions,
            created,
            failed,
            propagated,
        }
    }

    async fn await_propagation(&self, domain: &str) -> bool {
        let lookup = self.caps.lookup.as_ref();
        let what = format!("MX of {} to propagate", domain);

        let outcome = wait_for(self.config.timeouts.propagation, &what, move || async move {
            match lookup.mx(domain).await {
                Ok(records) => Ok::<_, DeployError>(mx_points_at_host(&records, domain)),
                Err(e) => {
                    debug!("MX lookup for {} failed: {}", domain, e);
                    Ok(false)
                }
            }
        })
        .await;

        match outcome {
            Ok(PollOutcome::Ready(())) => {
                info!("MX for {} has propagated", domain);
                true
            }
            Ok(PollOutcome::TimedOut { waited, .. }) => {
                warn!(
                    "MX for {} still not propagated after {}s",
                    domain,
                    waited.as_secs()
                );
                false
            }
            Err(e) => {
                warn!("Propagation check for {} failed: {}", domain, e);
                false
            }
        }
    }
}
