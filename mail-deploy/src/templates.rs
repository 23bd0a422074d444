//! Static mail-server file templates and quoting helpers

use crate::accounts::ServerSecrets;

/// File touched by the first-boot script once setup is done
pub const BOOTSTRAP_MARKER: &str = "/tmp/cloud-init-complete";

/// Database holding domains, users and aliases
pub const MAIL_DATABASE: &str = "mailserver";

/// Database account used by Postfix and Dovecot
pub const MAIL_DB_USER: &str = "mailuser";

/// Root of the virtual mailboxes
pub const MAILBOX_ROOT: &str = "/var/mail/vhosts";

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Single-quote `value` as a SQL string literal
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', r"\\").replace('\'', "''"))
}

/// `mysql` invocation as root running `sql`
pub fn mysql_exec(secrets: &ServerSecrets, sql: &str) -> String {
    format!(
        "mysql -u root {} -e {}",
        shell_quote(&format!("-p{}", secrets.mysql_root_password)),
        shell_quote(sql)
    )
}

/// First-boot script: packages, database, firewall, then the marker
pub fn cloud_init_script(secrets: &ServerSecrets) -> String {
    let root = shell_quote(&format!("-p{}", secrets.mysql_root_password));
    let root_sql = shell_quote(&format!(
        "ALTER USER 'root'@'localhost' IDENTIFIED WITH mysql_native_password BY {};",
        sql_quote(&secrets.mysql_root_password)
    ));
    let create_user = shell_quote(&format!(
        "CREATE USER IF NOT EXISTS '{}'@'localhost' IDENTIFIED BY {};",
        MAIL_DB_USER,
        sql_quote(&secrets.mail_db_password)
    ));

    format!(
        r#"#!/bin/bash
# Mail server first-boot setup
set -e
export DEBIAN_FRONTEND=noninteractive

apt-get update && apt-get upgrade -y
apt-get install -y \
    postfix postfix-mysql \
    dovecot-core dovecot-imapd dovecot-pop3d dovecot-lmtpd dovecot-mysql \
    mysql-server \
    nginx \
    certbot python3-certbot-nginx \
    mailutils \
    fail2ban \
    ufw \
    curl

mysql -e {root_sql}
mysql -u root {root} -e "CREATE DATABASE IF NOT EXISTS {db};"
mysql -u root {root} -e {create_user}
mysql -u root {root} -e "GRANT ALL ON {db}.* TO '{user}'@'localhost';"
mysql -u root {root} -e "FLUSH PRIVILEGES;"

ufw allow 22,25,53,80,110,143,443,465,587,993,995/tcp
ufw --force enable

touch {marker}
echo "VPS setup completed at $(date)" > /tmp/setup-log.txt
"#,
        root_sql = root_sql,
        root = root,
        db = MAIL_DATABASE,
        create_user = create_user,
        user = MAIL_DB_USER,
        marker = BOOTSTRAP_MARKER,
    )
}

/// Postfix `main.cf` for virtual domains backed by SQL
pub fn postfix_main_cf(primary_domain: &str) -> String {
    format!(
        r#"# Postfix main configuration
myhostname = mail.{domain}
mydomain = {domain}
myorigin = $mydomain
inet_interfaces = all
mydestination = localhost

# Virtual domains
virtual_mailbox_domains = mysql:/etc/postfix/mysql-virtual-mailbox-domains.cf
virtual_mailbox_maps = mysql:/etc/postfix/mysql-virtual-mailbox-maps.cf
virtual_alias_maps = mysql:/etc/postfix/mysql-virtual-alias-maps.cf
virtual_mailbox_base = {mailboxes}
virtual_minimum_uid = 1000
virtual_uid_maps = static:5000
virtual_gid_maps = static:5000

# SMTP-AUTH through Dovecot
smtpd_sasl_type = dovecot
smtpd_sasl_path = private/auth
smtpd_sasl_auth_enable = yes
broken_sasl_auth_clients = yes

# TLS
smtp_tls_security_level = may
smtpd_tls_security_level = may
smtpd_tls_auth_only = yes
smtpd_tls_cert_file = /etc/letsencrypt/live/mail.{domain}/fullchain.pem
smtpd_tls_key_file = /etc/letsencrypt/live/mail.{domain}/privkey.pem
smtpd_tls_received_header = yes

# Restrictions
smtpd_helo_restrictions = permit_mynetworks, permit_sasl_authenticated, reject_invalid_helo_hostname, reject_non_fqdn_helo_hostname
smtpd_recipient_restrictions = permit_mynetworks, permit_sasl_authenticated, reject_unauth_destination
smtpd_sender_restrictions = permit_mynetworks, permit_sasl_authenticated
"#,
        domain = primary_domain,
        mailboxes = MAILBOX_ROOT,
    )
}

/// The three Postfix SQL lookup maps as (path, content)
pub fn postfix_sql_maps(db_password: &str) -> Vec<(String, String)> {
    let maps = [
        (
            "/etc/postfix/mysql-virtual-mailbox-domains.cf",
            "SELECT 1 FROM domains WHERE domain='%s'",
        ),
        (
            "/etc/postfix/mysql-virtual-mailbox-maps.cf",
            "SELECT 1 FROM users WHERE email='%s'",
        ),
        (
            "/etc/postfix/mysql-virtual-alias-maps.cf",
            "SELECT destination FROM aliases WHERE source='%s'",
        ),
    ];

    maps.iter()
        .map(|(path, query)| {
            (
                path.to_string(),
                format!(
                    "user = {}\npassword = {}\nhosts = 127.0.0.1\ndbname = {}\nquery = {}\n",
                    MAIL_DB_USER, db_password, MAIL_DATABASE, query
                ),
            )
        })
        .collect()
}

/// Dovecot main configuration
pub fn dovecot_conf(primary_domain: &str) -> String {
    format!(
        r#"protocols = imap pop3 lmtp
listen = *, ::

mail_location = maildir:{mailboxes}/%d/%n
mail_privileged_group = mail

ssl = required
ssl_cert = </etc/letsencrypt/live/mail.{domain}/fullchain.pem
ssl_key = </etc/letsencrypt/live/mail.{domain}/privkey.pem

auth_mechanisms = plain login
disable_plaintext_auth = yes

passdb {{
  driver = sql
  args = /etc/dovecot/dovecot-sql.conf.ext
}}

userdb {{
  driver = sql
  args = /etc/dovecot/dovecot-sql.conf.ext
}}

service auth {{
  unix_listener /var/spool/postfix/private/auth {{
    mode = 0666
    user = postfix
    group = postfix
  }}

  unix_listener auth-userdb {{
    mode = 0600
    user = vmail
    group = vmail
  }}

  user = dovecot
}}

service auth-worker {{
  user = vmail
}}
"#,
        domain = primary_domain,
        mailboxes = MAILBOX_ROOT,
    )
}

/// Dovecot SQL passdb/userdb configuration
pub fn dovecot_sql_conf(db_password: &str) -> String {
    format!(
        r#"driver = mysql
connect = host=127.0.0.1 dbname={db} user={user} password={password}
default_pass_scheme = SHA512-CRYPT
password_query = SELECT email as user, password FROM users WHERE email='%u' AND enabled=1
user_query = SELECT '{mailboxes}/%d/%n' as home, 'maildir:{mailboxes}/%d/%n' as mail, 5000 AS uid, 5000 AS gid FROM users WHERE email='%u' AND enabled=1
"#,
        db = MAIL_DATABASE,
        user = MAIL_DB_USER,
        password = db_password,
        mailboxes = MAILBOX_ROOT,
    )
}

/// Domains, users and aliases tables
pub fn schema_sql() -> String {
    format!(
        r#"USE {db};

CREATE TABLE IF NOT EXISTS domains (
  id INT AUTO_INCREMENT PRIMARY KEY,
  domain VARCHAR(255) NOT NULL UNIQUE,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS users (
  id INT AUTO_INCREMENT PRIMARY KEY,
  domain_id INT,
  email VARCHAR(255) NOT NULL UNIQUE,
  password VARCHAR(255) NOT NULL,
  quota INT DEFAULT 1024,
  enabled BOOLEAN DEFAULT TRUE,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
  FOREIGN KEY (domain_id) REFERENCES domains(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS aliases (
  id INT AUTO_INCREMENT PRIMARY KEY,
  source VARCHAR(255) NOT NULL,
  destination VARCHAR(255) NOT NULL,
  domain_id INT,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
  FOREIGN KEY (domain_id) REFERENCES domains(id) ON DELETE CASCADE
);
"#,
        db = MAIL_DATABASE
    )
}
