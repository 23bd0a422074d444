//! Scripted probes for testing
//!
//! A [`FakeHost`] answers every probe trait from in-memory state that tests
//! can flip between cycles.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{
    CertificateProbe, CertificateStatus, LoginProbe, PortProbe, ProbeSet, QueueProbe,
    ResourceProbe, ResourceUsage, ServiceProbe,
};
use crate::config::TestAccount;
use crate::error::{MonitorError, Result};

#[derive(Debug)]
struct HostState {
    inactive_services: HashSet<String>,
    closed_ports: HashSet<u16>,
    resources: Option<ResourceUsage>,
    queue_depth: Option<u64>,
    certificate: Option<CertificateStatus>,
    failing_smtp: HashSet<String>,
    failing_imap: HashSet<String>,
    erroring_services: HashSet<String>,
    calls: HashMap<&'static str, usize>,
}

/// In-memory host; every service active, every port open and every login
/// accepted until told otherwise
#[derive(Debug, Clone)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn healthy() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                inactive_services: HashSet::new(),
                closed_ports: HashSet::new(),
                resources: Some(ResourceUsage {
                    disk_usage: Some(40),
                    memory_usage: Some(50),
                    load_average: Some(0.5),
                }),
                queue_depth: Some(0),
                certificate: Some(CertificateStatus::valid("VALID: 80 days")),
                failing_smtp: HashSet::new(),
                failing_imap: HashSet::new(),
                erroring_services: HashSet::new(),
                calls: HashMap::new(),
            })),
        }
    }

    /// Probe set answering from this host
    pub fn probes(&self) -> ProbeSet {
        let host = Arc::new(self.clone());
        ProbeSet {
            services: host.clone(),
            ports: host.clone(),
            resources: host.clone(),
            queue: host.clone(),
            certificates: host.clone(),
            logins: host,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut HostState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    fn record(&self, probe: &'static str) {
        self.with_state(|s| *s.calls.entry(probe).or_default() += 1);
    }

    /// Number of times a probe kind was invoked
    pub fn calls(&self, probe: &'static str) -> usize {
        self.with_state(|s| s.calls.get(probe).copied().unwrap_or(0))
    }

    pub fn stop_service(&self, service: &str) {
        self.with_state(|s| s.inactive_services.insert(service.to_string()));
    }

    pub fn start_service(&self, service: &str) {
        self.with_state(|s| s.inactive_services.remove(service));
    }

    /// The probe itself fails for this service instead of answering
    pub fn break_service_probe(&self, service: &str) {
        self.with_state(|s| s.erroring_services.insert(service.to_string()));
    }

    pub fn close_port(&self, port: u16) {
        self.with_state(|s| s.closed_ports.insert(port));
    }

    pub fn set_resources(&self, resources: ResourceUsage) {
        self.with_state(|s| s.resources = Some(resources));
    }

    pub fn break_resources(&self) {
        self.with_state(|s| s.resources = None);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.with_state(|s| s.queue_depth = Some(depth));
    }

    pub fn break_queue(&self) {
        self.with_state(|s| s.queue_depth = None);
    }

    pub fn set_certificate(&self, status: CertificateStatus) {
        self.with_state(|s| s.certificate = Some(status));
    }

    pub fn break_certificate(&self) {
        self.with_state(|s| s.certificate = None);
    }

    pub fn reject_smtp(&self, email: &str) {
        self.with_state(|s| s.failing_smtp.insert(email.to_string()));
    }

    pub fn reject_imap(&self, email: &str) {
        self.with_state(|s| s.failing_imap.insert(email.to_string()));
    }
}

#[async_trait::async_trait]
impl ServiceProbe for FakeHost {
    async fn is_active(&self, service: &str) -> Result<bool> {
        self.record("service");
        self.with_state(|s| {
            if s.erroring_services.contains(service) {
                return Err(MonitorError::Timeout(format!("systemctl is-active {}", service)));
            }
            Ok(!s.inactive_services.contains(service))
        })
    }
}

#[async_trait::async_trait]
impl PortProbe for FakeHost {
    async fn is_open(&self, _host: &str, port: u16) -> Result<bool> {
        self.record("port");
        Ok(self.with_state(|s| !s.closed_ports.contains(&port)))
    }
}

#[async_trait::async_trait]
impl ResourceProbe for FakeHost {
    async fn sample(&self) -> Result<ResourceUsage> {
        self.record("resources");
        self.with_state(|s| s.resources)
            .ok_or_else(|| MonitorError::Probe("resource sampling unavailable".to_string()))
    }
}

#[async_trait::async_trait]
impl QueueProbe for FakeHost {
    async fn depth(&self) -> Result<u64> {
        self.record("queue");
        self.with_state(|s| s.queue_depth)
            .ok_or_else(|| MonitorError::Probe("postqueue unavailable".to_string()))
    }
}

#[async_trait::async_trait]
impl CertificateProbe for FakeHost {
    async fn check(&self) -> Result<CertificateStatus> {
        self.record("certificate");
        self.with_state(|s| s.certificate.clone())
            .ok_or_else(|| MonitorError::Probe("certbot unavailable".to_string()))
    }
}

#[async_trait::async_trait]
impl LoginProbe for FakeHost {
    async fn smtp_login(&self, account: &TestAccount) -> Result<()> {
        self.record("smtp");
        if self.with_state(|s| s.failing_smtp.contains(&account.email)) {
            return Err(MonitorError::Probe("535 authentication failed".to_string()));
        }
        Ok(())
    }

    async fn imap_login(&self, account: &TestAccount) -> Result<()> {
        self.record("imap");
        if self.with_state(|s| s.failing_imap.contains(&account.email)) {
            return Err(MonitorError::Probe("a1 NO LOGIN failed".to_string()));
        }
        Ok(())
    }
}
