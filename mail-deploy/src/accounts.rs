//! Mailbox accounts and generated secrets

use mail_monitor::TestAccount;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::ServerSettings;
use crate::dns::mail_host;
use crate::error::{DeployError, Result};
use crate::providers::RemoteSession;
use crate::templates::{mysql_exec, shell_quote, sql_quote, MAILBOX_ROOT, MAIL_DATABASE};

const FIRST_NAMES: &[&str] = &[
    "alex", "jordan", "morgan", "casey", "taylor", "riley", "sage", "quinn",
];
const LAST_NAMES: &[&str] = &[
    "smith", "johnson", "williams", "brown", "jones", "garcia", "miller",
];

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*";

/// Length of generated mailbox passwords
pub const ACCOUNT_PASSWORD_LENGTH: usize = 16;

/// Length of generated database passwords
pub const SERVER_PASSWORD_LENGTH: usize = 20;

const SMTP_PORT: u16 = 587;
const IMAP_PORT: u16 = 993;
const MAX_USERNAME_DRAWS: usize = 32;

/// Source of usernames and secrets
pub trait CredentialGenerator: Send + Sync {
    /// Local part such as `alex.smith`
    fn username(&self) -> String;

    /// Secret with at least one lower, upper, digit and symbol
    fn password(&self, length: usize) -> String;
}

/// Generator backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCredentials;

impl CredentialGenerator for RandomCredentials {
    fn username(&self) -> String {
        let mut rng = rand::thread_rng();
        let first = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("user");
        let last = LAST_NAMES.choose(&mut rng).copied().unwrap_or("mail");
        format!("{}.{}", first, last)
    }

    fn password(&self, length: usize) -> String {
        let mut rng = rand::thread_rng();
        let classes = [LOWER, UPPER, DIGITS, SYMBOLS];
        let alphabet: Vec<u8> = classes.concat();

        let mut chars: Vec<u8> = classes
            .iter()
            .map(|class| class[rng.gen_range(0..class.len())])
            .collect();
        while chars.len() < length.max(classes.len()) {
            chars.push(alphabet[rng.gen_range(0..alphabet.len())]);
        }
        chars.shuffle(&mut rng);
        String::from_utf8_lossy(&chars).into_owned()
    }
}

/// Database secrets and host identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSecrets {
    pub hostname: String,
    pub mysql_root_password: String,
    pub mail_db_password: String,
}

impl ServerSecrets {
    /// Take configured values, generating any that are missing
    pub fn resolve(
        settings: &ServerSettings,
        primary_domain: &str,
        generator: &dyn CredentialGenerator,
    ) -> Self {
        let pick = |value: &Option<String>| match value.as_deref() {
            Some(v) if !v.is_empty() && v != "generate_random" => v.to_string(),
            _ => generator.password(SERVER_PASSWORD_LENGTH),
        };

        Self {
            hostname: settings
                .hostname
                .clone()
                .unwrap_or_else(|| mail_host(primary_domain)),
            mysql_root_password: pick(&settings.mysql_root_password),
            mail_db_password: pick(&settings.mail_db_password),
        }
    }
}

/// Client connection settings for one protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    pub host: String,
    pub port: u16,
    pub security: String,
    pub username: String,
    pub password: String,
}

/// Mailbox created on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAccount {
    pub email: String,
    pub username: String,
    pub password: String,
    pub domain: String,
    #[serde(rename = "smtp_settings")]
    pub smtp: ProtocolSettings,
    #[serde(rename = "imap_settings")]
    pub imap: ProtocolSettings,
}

impl MailAccount {
    pub fn new(username: &str, domain: &str, password: &str) -> Self {
        let email = format!("{}@{}", username, domain);
        let settings = |port: u16, security: &str| ProtocolSettings {
            host: mail_host(domain),
            port,
            security: security.to_string(),
            username: email.clone(),
            password: password.to_string(),
        };

        Self {
            smtp: settings(SMTP_PORT, "STARTTLS"),
            imap: settings(IMAP_PORT, "SSL"),
            email: email.clone(),
            username: username.to_string(),
            password: password.to_string(),
            domain: domain.to_string(),
        }
    }

    /// Login test entry for the health monitor
    pub fn to_test_account(&self) -> TestAccount {
        TestAccount {
            email: self.email.clone(),
            password: self.password.clone(),
            smtp_host: self.smtp.host.clone(),
            smtp_port: self.smtp.port,
            imap_host: self.imap.host.clone(),
            imap_port: self.imap.port,
        }
    }
}

/// Account that could not be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFailure {
    pub domain: String,
    /// Address that was being created, if one was drawn
    pub email: Option<String>,
    pub error: String,
}

/// Draw a username not yet used in this domain
fn unique_username(generator: &dyn CredentialGenerator, taken: &mut HashSet<String>) -> String {
    for _ in 0..MAX_USERNAME_DRAWS {
        let candidate = generator.username();
        if taken.insert(candidate.clone()) {
            return candidate;
        }
    }

    // name space exhausted: suffix the last draw
    let base = generator.username();
    let mut n = 2;
    loop {
        let candidate = format!("{}{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

async fn create_mailbox(
    session: &dyn RemoteSession,
    root_secrets: &ServerSecrets,
    domain: &str,
    username: &str,
    password: &str,
) -> Result<MailAccount> {
    let account = MailAccount::new(username, domain, password);

    let hashed = session
        .run(&format!(
            "doveadm pw -s SHA512-CRYPT -p {}",
            shell_quote(password)
        ))
        .await?
        .check("password hashing")?;
    let hashed = hashed.stdout.trim();
    if hashed.is_empty() {
        return Err(DeployError::Remote(
            "password hashing returned no output".to_string(),
        ));
    }

    let insert = format!(
        "INSERT INTO {db}.users (email, password, domain_id) SELECT {email}, {hash}, id FROM {db}.domains WHERE domain={domain};",
        db = MAIL_DATABASE,
        email = sql_quote(&account.email),
        hash = sql_quote(hashed),
        domain = sql_quote(domain),
    );
    session
        .run(&mysql_exec(root_secrets, &insert))
        .await?
        .check("user insert")?;

    let domain_dir = format!("{}/{}", MAILBOX_ROOT, domain);
    session
        .run(&format!(
            "mkdir -p {} && chown -R vmail:vmail {}",
            shell_quote(&format!("{}/{}", domain_dir, username)),
            shell_quote(&domain_dir)
        ))
        .await?
        .check("mailbox directory")?;

    Ok(account)
}

/// Create `count` mailboxes for `domain`
///
/// The domain row is inserted first. Each account is independent: a failure
/// is recorded and the remaining accounts are still attempted.
pub async fn create_domain_accounts(
    session: &dyn RemoteSession,
    secrets: &ServerSecrets,
    generator: &dyn CredentialGenerator,
    domain: &str,
    count: usize,
) -> (Vec<MailAccount>, Vec<AccountFailure>) {
    let mut accounts = Vec::new();
    let mut failures = Vec::new();

    let domain_insert = format!(
        "INSERT IGNORE INTO {}.domains (domain) VALUES ({});",
        MAIL_DATABASE,
        sql_quote(domain)
    );
    let inserted = match session.run(&mysql_exec(secrets, &domain_insert)).await {
        Ok(output) => output.check("domain insert").map(|_| ()),
        Err(e) => Err(e),
    };
    if let Err(e) = inserted {
        warn!("Could not register domain {}: {}", domain, e);
        for _ in 0..count {
            failures.push(AccountFailure {
                domain: domain.to_string(),
                email: None,
                error: format!("domain registration failed: {}", e),
            });
        }
        return (accounts, failures);
    }

    let mut taken = HashSet::new();
    for _ in 0..count {
        let username = unique_username(generator, &mut taken);
        let password = generator.password(ACCOUNT_PASSWORD_LENGTH);

        match create_mailbox(session, secrets, domain, &username, &password).await {
            Ok(account) => {
                debug!("Created {}", account.email);
                accounts.push(account);
            }
            Err(e) => {
                let email = format!("{}@{}", username, domain);
                warn!("Failed to create {}: {}", email, e);
                failures.push(AccountFailure {
                    domain: domain.to_string(),
                    email: Some(email),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        "Created {}/{} accounts for {}",
        accounts.len(),
        count,
        domain
    );
    (accounts, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{MockRemote, SequentialCredentials};
    use crate::providers::RemoteConnector;
    use std::net::Ipv4Addr;

    fn secrets() -> ServerSecrets {
        ServerSecrets {
            hostname: "mail.a.test".to_string(),
            mysql_root_password: "root".to_string(),
            mail_db_password: "db".to_string(),
        }
    }

    #[test]
    fn test_password_classes() {
        let generator = RandomCredentials;
        for _ in 0..50 {
            let pw = generator.password(16);
            assert_eq!(pw.len(), 16);
            assert!(pw.bytes().any(|b| LOWER.contains(&b)));
            assert!(pw.bytes().any(|b| UPPER.contains(&b)));
            assert!(pw.bytes().any(|b| DIGITS.contains(&b)));
            assert!(pw.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn test_username_shape() {
        let name = RandomCredentials.username();
        let (first, last) = name.split_once('.').unwrap();
        assert!(FIRST_NAMES.contains(&first));
        assert!(LAST_NAMES.contains(&last));
    }

    #[test]
    fn test_unique_usernames_within_domain() {
        let mut taken = HashSet::new();
        let names: Vec<_> = (0..80)
            .map(|_| unique_username(&RandomCredentials, &mut taken))
            .collect();
        let distinct: HashSet<_> = names.iter().collect();
        assert_eq!(distinct.len(), 80);
    }

    #[test]
    fn test_account_settings() {
        let account = MailAccount::new("alex.smith", "a.test", "pw");
        assert_eq!(account.email, "alex.smith@a.test");
        assert_eq!(account.smtp.host, "mail.a.test");
        assert_eq!(account.smtp.port, 587);
        assert_eq!(account.smtp.security, "STARTTLS");
        assert_eq!(account.imap.port, 993);
        assert_eq!(account.imap.security, "SSL");
        assert_eq!(account.imap.username, "alex.smith@a.test");

        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["smtp_settings"]["port"], 587);

        let test = account.to_test_account();
        assert_eq!(test.imap_host, "mail.a.test");
    }

    #[test]
    fn test_secrets_resolution() {
        let settings = ServerSettings {
            hostname: None,
            mysql_root_password: Some("kept".to_string()),
            mail_db_password: Some("generate_random".to_string()),
        };
        let secrets = ServerSecrets::resolve(&settings, "a.test", &RandomCredentials);
        assert_eq!(secrets.hostname, "mail.a.test");
        assert_eq!(secrets.mysql_root_password, "kept");
        assert_eq!(secrets.mail_db_password.len(), SERVER_PASSWORD_LENGTH);
    }

    #[tokio::test]
    async fn test_domain_inserted_before_users() {
        let remote = MockRemote::new();
        let session = remote.connect(Ipv4Addr::LOCALHOST).await.unwrap();
        let (accounts, failures) = create_domain_accounts(
            session.as_ref(),
            &secrets(),
            &SequentialCredentials::new(),
            "a.test",
            2,
        )
        .await;

        assert_eq!(accounts.len(), 2);
        assert!(failures.is_empty());

        let commands = remote.commands();
        let domain_at = commands
            .iter()
            .position(|c| c.contains("INSERT IGNORE INTO mailserver.domains"))
            .unwrap();
        let first_user_at = commands
            .iter()
            .position(|c| c.contains("INSERT INTO mailserver.users"))
            .unwrap();
        assert!(domain_at < first_user_at);
    }

    #[tokio::test]
    async fn test_failed_domain_insert_fails_every_account() {
        let remote = MockRemote::new().fail_command("INSERT IGNORE INTO mailserver.domains");
        let session = remote.connect(Ipv4Addr::LOCALHOST).await.unwrap();
        let (accounts, failures) = create_domain_accounts(
            session.as_ref(),
            &secrets(),
            &SequentialCredentials::new(),
            "a.test",
            3,
        )
        .await;

        assert!(accounts.is_empty());
        assert_eq!(failures.len(), 3);
        assert!(!remote
            .commands()
            .iter()
            .any(|c| c.contains("INSERT INTO mailserver.users")));
    }
}
