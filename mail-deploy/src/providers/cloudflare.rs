//! Cloudflare DNS records

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::DnsProvider;
use crate::dns::{DnsRecord, DnsRecordType};
use crate::error::{DeployError, Result};

/// Cloudflare API client
pub struct Cloudflare {
    api_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl Cloudflare {
    pub fn new(api_token: String) -> Self {
        Self {
            api_token,
            base_url: "https://api.cloudflare.com/client/v4".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

/// Record creation request
#[derive(Debug, Serialize)]
struct CreateRecordRequest {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    content: String,
    ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<u16>,
    /// Mail records must not go through the proxy
    #[serde(skip_serializing_if = "Option::is_none")]
    proxied: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

fn record_request(domain: &str, record: &DnsRecord) -> CreateRecordRequest {
    let proxiable = matches!(record.record_type, DnsRecordType::A | DnsRecordType::CNAME);
    CreateRecordRequest {
        kind: record.record_type.to_string(),
        name: record.fqdn(domain),
        content: record.value.clone(),
        ttl: record.ttl,
        priority: record.priority,
        proxied: proxiable.then_some(false),
    }
}

#[async_trait::async_trait]
impl DnsProvider for Cloudflare {
    async fn create_record(&self, zone: &str, domain: &str, record: &DnsRecord) -> Result<()> {
        let request = record_request(domain, record);

        let response = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.base_url, zone))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(api) if status.is_success() && api.success => {
                info!("Created {} record for {}", request.kind, request.name);
                Ok(())
            }
            Some(api) => {
                let reasons: Vec<String> = api
                    .errors
                    .iter()
                    .map(|e| format!("{} ({})", e.message, e.code))
                    .collect();
                warn!(
                    "Failed to create {} record {}: {}",
                    request.kind,
                    request.name,
                    reasons.join(", ")
                );
                Err(DeployError::Provider(format!(
                    "Cloudflare rejected {} record {}: {}",
                    request.kind,
                    request.name,
                    reasons.join(", ")
                )))
            }
            None => Err(DeployError::Provider(format!(
                "Cloudflare returned {} for {} record {}: {}",
                status, request.kind, request.name, body
            ))),
        }
    }
}
