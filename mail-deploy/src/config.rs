//! Configuration for mail-deploy
//!
//! The deployment document is TOML. Every section falls back to defaults for
//! missing keys, and credentials can be supplied from the environment as
//! `MAIL_DEPLOY__<SECTION>__<KEY>` (for example
//! `MAIL_DEPLOY__VPS_PROVIDER__API_TOKEN`).

use mail_monitor::config::LoggingConfig;
use mail_monitor::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{DeployError, Result};
use crate::poller::PollBudget;

/// VPS providers with an implementation
pub const SUPPORTED_VPS_PROVIDERS: &[&str] = &["digitalocean"];

/// DNS providers with an implementation
pub const SUPPORTED_DNS_PROVIDERS: &[&str] = &["cloudflare"];

const ENV_PREFIX: &str = "MAIL_DEPLOY";

/// Main deployment configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Mail domains to serve; the first one is the primary domain
    pub domains: Vec<String>,
    pub vps_provider: VpsProviderConfig,
    pub dns_provider: DnsProviderConfig,
    pub email_settings: EmailSettings,
    pub server_settings: ServerSettings,
    pub dns: DnsSettings,
    pub timeouts: PollSettings,
    pub logging: LoggingConfig,
    /// Written out as the monitor's configuration after deployment
    pub monitoring: MonitorConfig,
}

/// VPS provider credentials and droplet shape
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VpsProviderConfig {
    pub name: String,
    pub api_token: String,
    pub ssh_key_id: String,
    pub region: String,
    pub size: String,
    pub image: String,
    /// Account used for remote commands
    pub ssh_user: String,
}

/// DNS provider credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsProviderConfig {
    pub name: String,
    pub api_token: String,
    /// Zone used for every domain without an entry in `zones`
    pub zone_id: String,
    /// Per-domain zone identifiers
    pub zones: BTreeMap<String, String>,
}

/// Mailbox creation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailSettings {
    pub emails_per_domain: usize,
    /// Receives the SMTP test mail and the certificate registration
    pub admin_email: String,
}

/// Server secrets; generated during deployment when left empty
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub hostname: Option<String>,
    pub mysql_root_password: Option<String>,
    pub mail_db_password: Option<String>,
}

/// DNS stage behavior
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsSettings {
    /// Wait for each domain's MX to point at the new host before moving on
    pub wait_for_propagation: bool,
}

/// Poll budgets for every bounded wait in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollSettings {
    pub provisioning: PollBudget,
    pub ssh: PollBudget,
    pub bootstrap: PollBudget,
    pub propagation: PollBudget,
}

/// Result of [`DeployConfig::load`]
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Box<DeployConfig>),
    /// No file existed; a default document was written there
    Created(PathBuf),
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            domains: vec!["example.com".to_string(), "test-domain.org".to_string()],
            vps_provider: VpsProviderConfig::default(),
            dns_provider: DnsProviderConfig::default(),
            email_settings: EmailSettings::default(),
            server_settings: ServerSettings::default(),
            dns: DnsSettings::default(),
            timeouts: PollSettings::default(),
            logging: LoggingConfig::default(),
            monitoring: MonitorConfig {
                webhook_url: Some("https://your-monitoring-service.com/webhook".to_string()),
                alert_email: Some("alerts@yourdomain.com".to_string()),
                ..MonitorConfig::default()
            },
        }
    }
}

impl Default for VpsProviderConfig {
    fn default() -> Self {
        Self {
            name: "digitalocean".to_string(),
            api_token: "YOUR_DO_API_TOKEN".to_string(),
            ssh_key_id: "YOUR_SSH_KEY_ID".to_string(),
            region: "fra1".to_string(),
            size: "s-2vcpu-4gb".to_string(),
            image: "ubuntu-22-04-x64".to_string(),
            ssh_user: "root".to_string(),
        }
    }
}

impl Default for DnsProviderConfig {
    fn default() -> Self {
        Self {
            name: "cloudflare".to_string(),
            api_token: "YOUR_CF_API_TOKEN".to_string(),
            zone_id: "YOUR_ZONE_ID".to_string(),
            zones: BTreeMap::new(),
        }
    }
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            emails_per_domain: 3,
            admin_email: "admin@yourdomain.com".to_string(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            provisioning: PollBudget::new(600, 15),
            ssh: PollBudget::new(300, 10),
            bootstrap: PollBudget::new(1800, 30),
            propagation: PollBudget::new(1800, 30),
        }
    }
}

fn is_placeholder(value: &str) -> bool {
    value.trim().is_empty() || value.starts_with("YOUR_")
}

impl DeployConfig {
    /// Load the document at `path`, or write a default one if it is missing
    pub fn load(path: &Path) -> Result<LoadOutcome> {
        if !path.exists() {
            Self::write_default(path)?;
            info!("Default configuration written to {}", path.display());
            return Ok(LoadOutcome::Created(path.to_path_buf()));
        }

        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(None)?;
        config.validate()?;
        Ok(LoadOutcome::Loaded(Box::new(config)))
    }

    /// Parse a TOML file without validating it
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeployError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| DeployError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DeployError::Config(format!("Failed to serialize config: {}", e)))
    }

    fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut document = String::from(
            "# mail-deploy configuration\n\
             # Replace every YOUR_* placeholder, then run mail-deploy again.\n\n",
        );
        document.push_str(&Self::default().to_toml()?);
        std::fs::write(path, document)?;
        Ok(())
    }

    /// Overlay `MAIL_DEPLOY__*` variables; `vars` replaces the process
    /// environment when given
    pub fn apply_env_overrides(&mut self, vars: Option<HashMap<String, String>>) -> Result<()> {
        let env = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .source(vars),
            )
            .build()
            .map_err(|e| DeployError::Config(format!("Failed to read environment: {}", e)))?;

        let overlay = |key: &str, target: &mut String| {
            if let Ok(value) = env.get_string(key) {
                info!("Using {} from environment", key);
                *target = value;
            }
        };
        overlay("vps_provider.name", &mut self.vps_provider.name);
        overlay("vps_provider.api_token", &mut self.vps_provider.api_token);
        overlay("vps_provider.ssh_key_id", &mut self.vps_provider.ssh_key_id);
        overlay("vps_provider.region", &mut self.vps_provider.region);
        overlay("vps_provider.size", &mut self.vps_provider.size);
        overlay("dns_provider.name", &mut self.dns_provider.name);
        overlay("dns_provider.api_token", &mut self.dns_provider.api_token);
        overlay("dns_provider.zone_id", &mut self.dns_provider.zone_id);
        overlay("email_settings.admin_email", &mut self.email_settings.admin_email);

        if let Ok(url) = env.get_string("monitoring.webhook_url") {
            self.monitoring.webhook_url = Some(url);
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(DeployError::Config("No domains configured".to_string()));
        }
        for domain in &self.domains {
            if domain.trim().is_empty() || !domain.contains('.') {
                return Err(DeployError::Config(format!("Invalid domain '{}'", domain)));
            }
        }

        if !SUPPORTED_VPS_PROVIDERS.contains(&self.vps_provider.name.as_str()) {
            return Err(DeployError::Config(format!(
                "Unsupported VPS provider: {}",
                self.vps_provider.name
            )));
        }
        if !SUPPORTED_DNS_PROVIDERS.contains(&self.dns_provider.name.as_str()) {
            return Err(DeployError::Config(format!(
                "Unsupported DNS provider: {}",
                self.dns_provider.name
            )));
        }

        let credentials = [
            ("vps_provider.api_token", &self.vps_provider.api_token),
            ("vps_provider.ssh_key_id", &self.vps_provider.ssh_key_id),
            ("dns_provider.api_token", &self.dns_provider.api_token),
        ];
        for (key, value) in credentials {
            if is_placeholder(value) {
                return Err(DeployError::Config(format!("{} is not set", key)));
            }
        }

        for domain in &self.domains {
            if is_placeholder(self.zone_for(domain)) {
                return Err(DeployError::Config(format!(
                    "No DNS zone configured for {}",
                    domain
                )));
            }
        }

        if self.email_settings.emails_per_domain == 0 {
            return Err(DeployError::Config(
                "emails_per_domain must be at least 1".to_string(),
            ));
        }
        if !self.email_settings.admin_email.contains('@') {
            return Err(DeployError::Config(format!(
                "Invalid admin email '{}'",
                self.email_settings.admin_email
            )));
        }

        self.monitoring.validate()?;
        Ok(())
    }

    /// First configured domain; certificates and the MTA identity use it
    pub fn primary_domain(&self) -> &str {
        self.domains.first().map(String::as_str).unwrap_or_default()
    }

    /// DNS zone holding `domain`'s records
    pub fn zone_for(&self, domain: &str) -> &str {
        self.dns_provider
            .zones
            .get(domain)
            .map(String::as_str)
            .unwrap_or(&self.dns_provider.zone_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> DeployConfig {
        let mut config = DeployConfig::default();
        config.vps_provider.api_token = "do-token".to_string();
        config.vps_provider.ssh_key_id = "1234".to_string();
        config.dns_provider.api_token = "cf-token".to_string();
        config.dns_provider.zone_id = "zone-1".to_string();
        config.email_settings.admin_email = "admin@example.com".to_string();
        config
    }

    #[test]
    fn test_default_config_has_placeholders() {
        let config = DeployConfig::default();
        assert_eq!(config.email_settings.emails_per_domain, 3);
        assert_eq!(config.timeouts.ssh, PollBudget::new(300, 10));
        assert_eq!(config.timeouts.propagation, PollBudget::new(1800, 30));
        assert!(!config.dns.wait_for_propagation);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_unsupported_provider() {
        let mut config = valid();
        config.vps_provider.name = "vultr".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unsupported VPS provider: vultr"));
    }

    #[test]
    fn test_rejects_empty_domains_and_zero_accounts() {
        let mut config = valid();
        config.domains.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.email_settings.emails_per_domain = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zone_override() {
        let mut config = valid();
        config
            .dns_provider
            .zones
            .insert("test-domain.org".to_string(), "zone-2".to_string());
        assert_eq!(config.zone_for("example.com"), "zone-1");
        assert_eq!(config.zone_for("test-domain.org"), "zone-2");
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let toml = r#"
domains = ["a.test"]

[vps_provider]
api_token = "t"

[timeouts.ssh]
timeout_secs = 60
interval_secs = 5

[monitoring.thresholds]
disk_usage = 80
"#;
        let config: DeployConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.domains, vec!["a.test"]);
        assert_eq!(config.vps_provider.region, "fra1");
        assert_eq!(config.timeouts.ssh, PollBudget::new(60, 5));
        assert_eq!(config.timeouts.bootstrap, PollBudget::new(1800, 30));
        assert_eq!(config.monitoring.thresholds.disk_usage, 80);
        assert_eq!(config.monitoring.check_interval_secs, 300);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DeployConfig::default();
        let vars = HashMap::from([
            (
                "MAIL_DEPLOY__VPS_PROVIDER__API_TOKEN".to_string(),
                "from-env".to_string(),
            ),
            (
                "MAIL_DEPLOY__DNS_PROVIDER__ZONE_ID".to_string(),
                "zone-env".to_string(),
            ),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);
        config.apply_env_overrides(Some(vars)).unwrap();
        assert_eq!(config.vps_provider.api_token, "from-env");
        assert_eq!(config.dns_provider.zone_id, "zone-env");
        assert_eq!(config.dns_provider.api_token, "YOUR_CF_API_TOKEN");
    }

    #[test]
    fn test_missing_file_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automation_config.toml");

        match DeployConfig::load(&path).unwrap() {
            LoadOutcome::Created(created) => assert_eq!(created, path),
            LoadOutcome::Loaded(_) => panic!("expected a new document"),
        }

        let written = DeployConfig::from_file(&path).unwrap();
        assert_eq!(written.vps_provider.api_token, "YOUR_DO_API_TOKEN");
        assert_eq!(written.domains.len(), 2);

        // still full of placeholders
        assert!(DeployConfig::load(&path).is_err());
    }
}
