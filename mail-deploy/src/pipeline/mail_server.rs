//! Remote mail-server configuration
//!
//! Four actions run in a fixed order. The certificate has to exist before the
//! mailbox server is restarted with TLS bound to it, and the schema must be in
//! place before accounts are inserted. Any step exiting non-zero aborts.

use tracing::{debug, info};

use crate::accounts::ServerSecrets;
use crate::error::{DeployError, Result};
use crate::providers::RemoteSession;
use crate::templates::{
    dovecot_conf, dovecot_sql_conf, mysql_exec, postfix_main_cf, postfix_sql_maps, schema_sql,
    shell_quote, MAILBOX_ROOT,
};

/// One remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Upload { path: String, content: String },
    Run { label: String, command: String },
}

impl Step {
    fn run(label: &str, command: impl Into<String>) -> Self {
        Step::Run {
            label: label.to_string(),
            command: command.into(),
        }
    }

    fn upload(path: impl Into<String>, content: impl Into<String>) -> Self {
        Step::Upload {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Mail-server configuration actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailServerAction {
    /// Postfix
    Mta,
    /// Let's Encrypt certificate for the mail host
    Certificate,
    /// Dovecot
    MailboxServer,
    /// Domains, users and aliases tables
    Schema,
}

impl MailServerAction {
    /// Execution order
    pub const ORDER: [MailServerAction; 4] = [
        MailServerAction::Mta,
        MailServerAction::Certificate,
        MailServerAction::MailboxServer,
        MailServerAction::Schema,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MailServerAction::Mta => "mail transfer agent",
            MailServerAction::Certificate => "certificate",
            MailServerAction::MailboxServer => "mailbox server",
            MailServerAction::Schema => "database schema",
        }
    }

    pub fn steps(&self, primary_domain: &str, admin_email: &str, secrets: &ServerSecrets) -> Vec<Step> {
        match self {
            MailServerAction::Mta => {
                let mut steps = vec![Step::upload("/etc/postfix/main.cf", postfix_main_cf(primary_domain))];
                steps.extend(
                    postfix_sql_maps(&secrets.mail_db_password)
                        .into_iter()
                        .map(|(path, content)| Step::upload(path, content)),
                );
                steps.push(Step::run(
                    "restrict SQL map permissions",
                    "chmod 640 /etc/postfix/mysql-*.cf && chown root:postfix /etc/postfix/mysql-*.cf",
                ));
                steps.push(Step::run("restart postfix", "systemctl restart postfix"));
                steps
            }
            MailServerAction::Certificate => {
                let host = format!("mail.{}", primary_domain);
                vec![
                    // standalone mode needs port 80
                    Step::run("stop nginx", "systemctl stop nginx"),
                    Step::run(
                        "issue certificate",
                        format!(
                            "certbot certonly --standalone -d {} --non-interactive --agree-tos --email {}",
                            shell_quote(&host),
                            shell_quote(admin_email)
                        ),
                    ),
                    Step::run("start nginx", "systemctl start nginx"),
                    Step::run("enable renewal", "systemctl enable --now certbot.timer"),
                ]
            }
            MailServerAction::MailboxServer => vec![
                Step::upload("/etc/dovecot/dovecot.conf", dovecot_conf(primary_domain)),
                Step::upload(
                    "/etc/dovecot/dovecot-sql.conf.ext",
                    dovecot_sql_conf(&secrets.mail_db_password),
                ),
                Step::run(
                    "create vmail group",
                    "getent group vmail >/dev/null || groupadd -g 5000 vmail",
                ),
                Step::run(
                    "create vmail user",
                    "id -u vmail >/dev/null 2>&1 || useradd -g vmail -u 5000 vmail -d /var/mail",
                ),
                Step::run(
                    "create mailbox root",
                    format!(
                        "mkdir -p {} && chown -R vmail:vmail /var/mail",
                        shell_quote(MAILBOX_ROOT)
                    ),
                ),
                Step::run(
                    "restrict dovecot configuration",
                    "chown -R vmail:dovecot /etc/dovecot && chmod -R o-rwx /etc/dovecot",
                ),
                Step::run("restart dovecot", "systemctl restart dovecot"),
            ],
            MailServerAction::Schema => vec![Step::run(
                "create tables",
                mysql_exec(secrets, &schema_sql()),
            )],
        }
    }
}

/// Execute one step; a non-zero exit is an error
pub async fn execute(session: &dyn RemoteSession, step: &Step) -> Result<()> {
    match step {
        Step::Upload { path, content } => {
            debug!("Uploading {}", path);
            session.upload(path, content).await
        }
        Step::Run { label, command } => {
            debug!("Running step: {}", label);
            session.run(command).await?.check(label)?;
            Ok(())
        }
    }
}

/// Run every action in [`MailServerAction::ORDER`], stopping at the first
/// failing step
pub async fn configure(
    session: &dyn RemoteSession,
    primary_domain: &str,
    admin_email: &str,
    secrets: &ServerSecrets,
) -> Result<()> {
    for action in MailServerAction::ORDER {
        info!("Configuring {}", action.name());
        for step in action.steps(primary_domain, admin_email, secrets) {
            execute(session, &step).await.map_err(|e| {
                DeployError::Remote(format!("{} configuration failed: {}", action.name(), e))
            })?;
        }
    }
    info!("Mail server configured");
    Ok(())
}
