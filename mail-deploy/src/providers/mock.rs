//! In-memory providers for testing
//!
//! Each mock records what it was asked to do and can be scripted to fail,
//! so pipeline behavior can be checked without any network or host.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{
    CommandOutput, DnsProvider, HostInfo, HostSpec, RemoteConnector, RemoteSession, VpsProvider,
};
use crate::accounts::CredentialGenerator;
use crate::dns::{DnsLookup, DnsRecord, MxRecord};
use crate::error::{DeployError, Result};
use crate::templates::BOOTSTRAP_MARKER;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct VpsState {
    created: Vec<HostSpec>,
    polls: usize,
}

/// VPS provider that turns active after a number of status polls
#[derive(Debug, Clone)]
pub struct MockVps {
    state: Arc<Mutex<VpsState>>,
    address: Ipv4Addr,
    pending_polls: usize,
    create_error: Option<String>,
    lookup_error: Option<String>,
}

impl MockVps {
    /// Active on the first poll
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            state: Arc::new(Mutex::new(VpsState::default())),
            address,
            pending_polls: 0,
            create_error: None,
            lookup_error: None,
        }
    }

    /// Report `new` for this many polls before turning active
    pub fn active_after(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Never turn active
    pub fn never_active(mut self) -> Self {
        self.pending_polls = usize::MAX;
        self
    }

    pub fn reject_create(mut self, message: &str) -> Self {
        self.create_error = Some(message.to_string());
        self
    }

    pub fn reject_lookup(mut self, message: &str) -> Self {
        self.lookup_error = Some(message.to_string());
        self
    }

    pub fn created(&self) -> Vec<HostSpec> {
        lock(&self.state).created.clone()
    }

    pub fn polls(&self) -> usize {
        lock(&self.state).polls
    }
}

#[async_trait::async_trait]
impl VpsProvider for MockVps {
    async fn create_host(&self, spec: &HostSpec) -> Result<String> {
        if let Some(message) = &self.create_error {
            return Err(DeployError::Provider(message.clone()));
        }
        let mut state = lock(&self.state);
        state.created.push(spec.clone());
        Ok(format!("mock-{}", state.created.len()))
    }

    async fn get_host(&self, id: &str) -> Result<HostInfo> {
        if let Some(message) = &self.lookup_error {
            return Err(DeployError::Provider(message.clone()));
        }
        let mut state = lock(&self.state);
        state.polls += 1;
        let active = state.polls > self.pending_polls;
        Ok(HostInfo {
            id: id.to_string(),
            status: if active { "active" } else { "new" }.to_string(),
            public_ipv4: active.then_some(self.address),
        })
    }
}

/// Record accepted by [`MockDnsProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub zone: String,
    pub domain: String,
    pub record: DnsRecord,
}

/// DNS provider storing records in memory
#[derive(Debug, Clone, Default)]
pub struct MockDnsProvider {
    created: Arc<Mutex<Vec<CreatedRecord>>>,
    rejected: HashSet<String>,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject records whose fully qualified name and type match, e.g.
    /// `("b.test", "TXT")`
    pub fn reject(mut self, fqdn: &str, record_type: &str) -> Self {
        self.rejected.insert(format!("{} {}", fqdn, record_type));
        self
    }

    pub fn created(&self) -> Vec<CreatedRecord> {
        lock(&self.created).clone()
    }
}

#[async_trait::async_trait]
impl DnsProvider for MockDnsProvider {
    async fn create_record(&self, zone: &str, domain: &str, record: &DnsRecord) -> Result<()> {
        let key = format!("{} {}", record.fqdn(domain), record.record_type);
        if self.rejected.contains(&key) {
            return Err(DeployError::Provider(format!("record rejected: {}", key)));
        }
        lock(&self.created).push(CreatedRecord {
            zone: zone.to_string(),
            domain: domain.to_string(),
            record: record.clone(),
        });
        Ok(())
    }
}

#[derive(Debug)]
struct FailRule {
    pattern: String,
    /// Only the nth matching command fails (1-based); every match when None
    nth: Option<usize>,
    seen: usize,
    transport: bool,
}

#[derive(Debug, Default)]
struct RemoteState {
    connect_failures: usize,
    connect_attempts: usize,
    bootstrap_checks_left: usize,
    commands: Vec<String>,
    uploads: Vec<(String, String)>,
    rules: Vec<FailRule>,
    failing_uploads: HashSet<String>,
    opened: usize,
    closed: usize,
}

/// Remote host where every command succeeds unless scripted otherwise
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse this many connection attempts first
    pub fn refuse_connections(self, attempts: usize) -> Self {
        lock(&self.state).connect_failures = attempts;
        self
    }

    /// Report the bootstrap marker missing for this many checks
    pub fn bootstrap_after(self, checks: usize) -> Self {
        lock(&self.state).bootstrap_checks_left = checks;
        self
    }

    /// Every command containing `pattern` exits with status 1
    pub fn fail_command(self, pattern: &str) -> Self {
        self.add_rule(pattern, None, false)
    }

    /// Only the nth command containing `pattern` exits with status 1
    pub fn fail_nth_command(self, pattern: &str, nth: usize) -> Self {
        self.add_rule(pattern, Some(nth), false)
    }

    /// Commands containing `pattern` lose the connection
    pub fn break_transport(self, pattern: &str) -> Self {
        self.add_rule(pattern, None, true)
    }

    pub fn fail_upload(self, path: &str) -> Self {
        lock(&self.state).failing_uploads.insert(path.to_string());
        self
    }

    fn add_rule(self, pattern: &str, nth: Option<usize>, transport: bool) -> Self {
        lock(&self.state).rules.push(FailRule {
            pattern: pattern.to_string(),
            nth,
            seen: 0,
            transport,
        });
        self
    }

    /// Commands run so far, in order
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// (path, content) uploads so far, in order
    pub fn uploads(&self) -> Vec<(String, String)> {
        lock(&self.state).uploads.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    pub fn sessions_opened(&self) -> usize {
        lock(&self.state).opened
    }

    pub fn sessions_closed(&self) -> usize {
        lock(&self.state).closed
    }
}

#[async_trait::async_trait]
impl RemoteConnector for MockRemote {
    async fn connect(&self, host: Ipv4Addr) -> Result<Box<dyn RemoteSession>> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(DeployError::Remote(format!(
                "connect to {}:22: connection refused",
                host
            )));
        }
        state.opened += 1;
        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<RemoteState>>,
}

fn output(exit_status: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_status,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait::async_trait]
impl RemoteSession for MockSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let mut state = lock(&self.state);
        state.commands.push(command.to_string());
        debug!("mock $ {}", command);

        for rule in state.rules.iter_mut() {
            if !command.contains(&rule.pattern) {
                continue;
            }
            rule.seen += 1;
            if rule.nth.map_or(true, |nth| nth == rule.seen) {
                if rule.transport {
                    return Err(DeployError::Remote("connection reset by peer".to_string()));
                }
                return Ok(output(1, "", "mock failure"));
            }
        }

        if command.contains(BOOTSTRAP_MARKER) {
            if state.bootstrap_checks_left > 0 {
                state.bootstrap_checks_left -= 1;
                return Ok(output(1, "", ""));
            }
            return Ok(output(0, "ready\n", ""));
        }
        if command.starts_with("doveadm pw") {
            return Ok(output(0, "{SHA512-CRYPT}$6$mocksalt$mockhash\n", ""));
        }
        if command.starts_with("openssl s_client") {
            return Ok(output(0, "Verify return code: 0 (ok)\n", ""));
        }
        Ok(output(0, "", ""))
    }

    async fn upload(&self, path: &str, content: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.failing_uploads.contains(path) {
            return Err(DeployError::Remote(format!("upload of {} failed", path)));
        }
        state.uploads.push((path.to_string(), content.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        lock(&self.state).closed += 1;
        Ok(())
    }
}

/// Fixed answers for MX and NS lookups
#[derive(Debug, Clone, Default)]
pub struct StaticDnsLookup {
    mx: Arc<Mutex<HashMap<String, Vec<MxRecord>>>>,
    ns: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
}

impl StaticDnsLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mx(self, domain: &str, records: Vec<MxRecord>) -> Self {
        self.set_mx(domain, records);
        self
    }

    pub fn with_nameservers(mut self, domain: &str, nameservers: &[&str]) -> Self {
        self.ns.insert(
            domain.to_string(),
            nameservers.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    /// Every lookup for `domain` errors
    pub fn failing(mut self, domain: &str) -> Self {
        self.failing.insert(domain.to_string());
        self
    }

    /// Replace the MX answer, e.g. once records "propagated"
    pub fn set_mx(&self, domain: &str, records: Vec<MxRecord>) {
        lock(&self.mx).insert(domain.to_string(), records);
    }
}

#[async_trait::async_trait]
impl DnsLookup for StaticDnsLookup {
    async fn mx(&self, domain: &str) -> Result<Vec<MxRecord>> {
        if self.failing.contains(domain) {
            return Err(DeployError::Dns(format!("SERVFAIL for {}", domain)));
        }
        Ok(lock(&self.mx).get(domain).cloned().unwrap_or_default())
    }

    async fn nameservers(&self, domain: &str) -> Result<Vec<String>> {
        if self.failing.contains(domain) {
            return Err(DeployError::Dns(format!("SERVFAIL for {}", domain)));
        }
        Ok(self.ns.get(domain).cloned().unwrap_or_default())
    }
}

/// Predictable credentials: `user1`, `user2`, ... with matching passwords
#[derive(Debug, Default)]
pub struct SequentialCredentials {
    next: AtomicUsize,
}

impl SequentialCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialGenerator for SequentialCredentials {
    fn username(&self) -> String {
        format!("user{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn password(&self, length: usize) -> String {
        let seed = "Aa1!".repeat(length / 4 + 1);
        seed[..length.max(4)].to_string()
    }
}
