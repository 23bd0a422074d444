//! Probes backed by the local host
//!
//! Service state, queue depth and certificate status come from the usual
//! command line tools (`systemctl`, `postqueue`, `certbot`); resources are
//! read from `df` and `/proc`. Every external call is bounded by the probe
//! timeout.

use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, Tokio1Executor};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::{
    CertificateProbe, CertificateStatus, LoginProbe, PortProbe, QueueProbe, ResourceProbe,
    ResourceUsage, ServiceProbe,
};
use crate::config::TestAccount;
use crate::error::{MonitorError, Result};

/// Run a command, failing if it does not finish within `timeout`
async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(MonitorError::Probe(format!("Could not run {}: {}", program, e))),
        Err(_) => Err(MonitorError::Timeout(format!("{} {}", program, args.join(" ")))),
    }
}

/// `systemctl is-active <unit>`
pub struct SystemctlProbe {
    timeout: Duration,
}

impl SystemctlProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl ServiceProbe for SystemctlProbe {
    async fn is_active(&self, service: &str) -> Result<bool> {
        let output = run_command("systemctl", &["is-active", service], self.timeout).await?;
        let state = String::from_utf8_lossy(&output.stdout);
        debug!("Service {} is {}", service, state.trim());
        Ok(state.trim() == "active")
    }
}

/// Plain TCP connect
pub struct TcpPortProbe {
    timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_open(&self, host: &str, port: u16) -> Result<bool> {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => {
                debug!("Port {}:{} refused: {}", host, port, e);
                Ok(false)
            }
            Err(_) => {
                debug!("Port {}:{} did not answer", host, port);
                Ok(false)
            }
        }
    }
}

/// Disk usage from `df`, memory and load from `/proc`
pub struct HostResourceProbe {
    mount_point: String,
    proc_dir: PathBuf,
    timeout: Duration,
}

impl HostResourceProbe {
    pub fn new(mount_point: &str, timeout: Duration) -> Self {
        Self {
            mount_point: mount_point.to_string(),
            proc_dir: PathBuf::from("/proc"),
            timeout,
        }
    }

    async fn disk_usage(&self) -> Result<u8> {
        let output = run_command("df", &["-P", &self.mount_point], self.timeout).await?;
        parse_df_usage(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| MonitorError::Probe("Could not parse disk usage".to_string()))
    }

    async fn memory_usage(&self) -> Result<u8> {
        let meminfo = tokio::fs::read_to_string(self.proc_dir.join("meminfo")).await?;
        parse_meminfo_usage(&meminfo)
            .ok_or_else(|| MonitorError::Probe("Could not parse /proc/meminfo".to_string()))
    }

    async fn load_average(&self) -> Result<f64> {
        let loadavg = tokio::fs::read_to_string(self.proc_dir.join("loadavg")).await?;
        parse_loadavg(&loadavg)
            .ok_or_else(|| MonitorError::Probe("Could not parse /proc/loadavg".to_string()))
    }
}

#[async_trait::async_trait]
impl ResourceProbe for HostResourceProbe {
    async fn sample(&self) -> Result<ResourceUsage> {
        let disk_usage = self
            .disk_usage()
            .await
            .map_err(|e| warn!("Disk usage unavailable: {}", e))
            .ok();
        let memory_usage = self
            .memory_usage()
            .await
            .map_err(|e| warn!("Memory usage unavailable: {}", e))
            .ok();
        let load_average = self
            .load_average()
            .await
            .map_err(|e| warn!("Load average unavailable: {}", e))
            .ok();

        if disk_usage.is_none() && memory_usage.is_none() && load_average.is_none() {
            return Err(MonitorError::Probe(
                "No resource figure could be read".to_string(),
            ));
        }

        Ok(ResourceUsage {
            disk_usage,
            memory_usage,
            load_average,
        })
    }
}

/// Percentage in the fifth column of the first data row of `df -P`
pub fn parse_df_usage(output: &str) -> Option<u8> {
    let line = output.lines().nth(1)?;
    let usage = line.split_whitespace().nth(4)?;
    usage.trim_end_matches('%').parse().ok()
}

/// Used memory percentage from MemTotal and MemAvailable
pub fn parse_meminfo_usage(meminfo: &str) -> Option<u8> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };

    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some((total.saturating_sub(available) * 100 / total) as u8)
}

/// One-minute load average
pub fn parse_loadavg(loadavg: &str) -> Option<f64> {
    loadavg.split_whitespace().next()?.parse().ok()
}

/// `postqueue -p`
pub struct PostqueueProbe {
    timeout: Duration,
}

impl PostqueueProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl QueueProbe for PostqueueProbe {
    async fn depth(&self) -> Result<u64> {
        let output = run_command("postqueue", &["-p"], self.timeout).await?;
        if !output.status.success() {
            return Err(MonitorError::Probe(format!(
                "postqueue exited with {}",
                output.status
            )));
        }
        parse_postqueue(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            MonitorError::Probe("Unrecognised postqueue output".to_string())
        })
    }
}

/// Message count from the postqueue summary line
///
/// Postfix ends a non-empty listing with `-- 12 Kbytes in 3 Requests.`
pub fn parse_postqueue(output: &str) -> Option<u64> {
    let last = output.lines().rev().find(|line| !line.trim().is_empty())?;

    if last.contains("Mail queue is empty") {
        return Some(0);
    }

    let words: Vec<&str> = last.split_whitespace().collect();
    words
        .iter()
        .position(|w| w.starts_with("Request"))
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| words[i].parse().ok())
}

/// `certbot certificates`
pub struct CertbotProbe {
    timeout: Duration,
}

impl CertbotProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl CertificateProbe for CertbotProbe {
    async fn check(&self) -> Result<CertificateStatus> {
        let output = run_command("certbot", &["certificates"], self.timeout).await?;
        Ok(parse_certbot(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Every certificate listed must carry a VALID expiry annotation
pub fn parse_certbot(output: &str) -> CertificateStatus {
    let expiries: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("Expiry Date:"))
        .collect();

    if expiries.is_empty() {
        return CertificateStatus::invalid("No certificates found");
    }

    if let Some(bad) = expiries
        .iter()
        .find(|line| line.contains("INVALID") || line.contains("EXPIRED"))
    {
        return CertificateStatus::invalid(*bad);
    }

    if expiries.iter().all(|line| line.contains("VALID")) {
        CertificateStatus::valid(expiries[0])
    } else {
        CertificateStatus::invalid("Invalid or Expired")
    }
}

/// SMTP (STARTTLS + AUTH) and IMAP (implicit TLS + LOGIN) login tests
pub struct MailLoginProbe {
    timeout: Duration,
}

impl MailLoginProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn tls_connector() -> Result<TlsConnector> {
        let mut roots = rustls::RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs().map_err(|e| {
            MonitorError::Probe(format!("Failed to load system root certificates: {}", e))
        })?;
        for cert in certs {
            if let Err(e) = roots.add(&rustls::Certificate(cert.0)) {
                debug!("Skipping unusable root certificate: {}", e);
            }
        }

        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }

    async fn imap_session(&self, account: &TestAccount) -> Result<()> {
        let tcp = TcpStream::connect((account.imap_host.as_str(), account.imap_port)).await?;
        let server_name = rustls::ServerName::try_from(account.imap_host.as_str())
            .map_err(|e| MonitorError::Probe(format!("Invalid IMAP host: {}", e)))?;
        let tls = Self::tls_connector()?.connect(server_name, tcp).await?;
        let mut stream = BufReader::new(tls);

        let mut greeting = String::new();
        stream.read_line(&mut greeting).await?;
        if !greeting.starts_with("* OK") {
            return Err(MonitorError::Probe(format!(
                "Unexpected IMAP greeting: {}",
                greeting.trim()
            )));
        }

        let login = format!(
            "a1 LOGIN {} {}\r\n",
            imap_quote(&account.email),
            imap_quote(&account.password)
        );
        let reply = imap_command(&mut stream, "a1", &login).await?;
        if !reply.starts_with("a1 OK") {
            return Err(MonitorError::Probe(format!("IMAP login rejected: {}", reply)));
        }

        imap_command(&mut stream, "a2", "a2 LOGOUT\r\n").await?;
        Ok(())
    }
}

/// Send a tagged command and return its tagged completion line
async fn imap_command<S>(stream: &mut BufReader<S>, tag: &str, line: &str) -> Result<String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await?;

    loop {
        let mut reply = String::new();
        if stream.read_line(&mut reply).await? == 0 {
            return Err(MonitorError::Probe(
                "IMAP server closed the connection".to_string(),
            ));
        }
        if reply.starts_with(tag) {
            return Ok(reply.trim_end().to_string());
        }
    }
}

/// IMAP quoted string
fn imap_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait::async_trait]
impl LoginProbe for MailLoginProbe {
    async fn smtp_login(&self, account: &TestAccount) -> Result<()> {
        let transport: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.smtp_host)
                .map_err(|e| MonitorError::Probe(format!("Invalid SMTP relay: {}", e)))?
                .port(account.smtp_port)
                .credentials(Credentials::new(
                    account.email.clone(),
                    account.password.clone(),
                ))
                .timeout(Some(self.timeout))
                .build();

        match transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MonitorError::Probe(
                "SMTP connection dropped after login".to_string(),
            )),
            Err(e) => Err(MonitorError::Probe(format!("SMTP login failed: {}", e))),
        }
    }

    async fn imap_login(&self, account: &TestAccount) -> Result<()> {
        tokio::time::timeout(self.timeout, self.imap_session(account))
            .await
            .map_err(|_| MonitorError::Timeout(format!("IMAP login for {}", account.email)))?
    }
}
