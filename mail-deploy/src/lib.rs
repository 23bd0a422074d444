//! mail-deploy: bring a multi-domain mail server online
//!
//! Provisions a VPS, points each domain's DNS at it, configures Postfix and
//! Dovecot over SSH, creates mailboxes, verifies the result and writes a
//! report together with a ready-to-use health monitor configuration.
//!
//! # Features
//!
//! - Staged deployment job that only moves forward, or fails
//! - Bounded polling for every "wait until ready" step
//! - DNS analysis with hosted-mail conflict detection
//! - Per-record and per-account partial failure
//! - Providers behind traits, with in-memory mocks
//!
//! # Example Configuration
//!
//! ```toml
//! domains = ["example.com", "example.org"]
//!
//! [vps_provider]
//! name = "digitalocean"
//! api_token = "dop_v1_..."
//! ssh_key_id = "1234567"
//!
//! [dns_provider]
//! name = "cloudflare"
//! api_token = "..."
//! zone_id = "..."
//!
//! [email_settings]
//! emails_per_domain = 3
//! admin_email = "admin@example.com"
//! ```

pub mod accounts;
pub mod config;
pub mod dns;
pub mod error;
pub mod pipeline;
pub mod poller;
pub mod providers;
pub mod report;
pub mod templates;
pub mod verify;

pub use config::{DeployConfig, LoadOutcome};
pub use error::{DeployError, Result};
pub use pipeline::{Capabilities, DeploymentJob, Pipeline, Stage};
pub use poller::{wait_for, wait_until, PollBudget, PollOutcome};
