//! DigitalOcean droplet provisioning
//!
//! Uses the v2 REST API: `POST /droplets` to create, `GET /droplets/{id}`
//! to poll status and read the public IPv4 address.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

use super::{HostInfo, HostSpec, VpsProvider};
use crate::error::{DeployError, Result};

/// DigitalOcean API client
pub struct DigitalOcean {
    api_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl DigitalOcean {
    pub fn new(api_token: String) -> Self {
        Self {
            api_token,
            base_url: "https://api.digitalocean.com/v2".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

/// Droplet creation request
#[derive(Debug, Serialize)]
struct CreateDropletRequest<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: &'a str,
    ssh_keys: Vec<serde_json::Value>,
    user_data: &'a str,
    monitoring: bool,
    tags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct Droplet {
    id: u64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Debug, Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Debug, Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Numeric key ids go out as numbers, fingerprints as strings
fn ssh_key_value(key: &str) -> serde_json::Value {
    match key.parse::<u64>() {
        Ok(id) => serde_json::Value::from(id),
        Err(_) => serde_json::Value::from(key),
    }
}

fn host_info(droplet: Droplet) -> HostInfo {
    let public_ipv4 = droplet
        .networks
        .v4
        .iter()
        .filter(|n| n.kind == "public")
        .find_map(|n| n.ip_address.parse::<Ipv4Addr>().ok());

    HostInfo {
        id: droplet.id.to_string(),
        status: droplet.status,
        public_ipv4,
    }
}

impl DigitalOcean {
    async fn read_droplet(&self, response: reqwest::Response, what: &str) -> Result<Droplet> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!("DigitalOcean: {} failed with status {}: {}", what, status, error_text);
            return Err(DeployError::Provider(format!(
                "DigitalOcean {} failed: {} - {}",
                what, status, error_text
            )));
        }

        let envelope: DropletEnvelope = response.json().await?;
        Ok(envelope.droplet)
    }
}

#[async_trait::async_trait]
impl VpsProvider for DigitalOcean {
    async fn create_host(&self, spec: &HostSpec) -> Result<String> {
        info!(
            "Creating droplet {} ({} in {})",
            spec.name, spec.size, spec.region
        );

        let request = CreateDropletRequest {
            name: &spec.name,
            region: &spec.region,
            size: &spec.size,
            image: &spec.image,
            ssh_keys: spec.ssh_keys.iter().map(|k| ssh_key_value(k)).collect(),
            user_data: &spec.user_data,
            monitoring: true,
            tags: &spec.tags,
        };

        let response = self
            .client
            .post(format!("{}/droplets", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        let droplet = self.read_droplet(response, "droplet creation").await?;
        info!("Droplet {} created", droplet.id);
        Ok(droplet.id.to_string())
    }

    async fn get_host(&self, id: &str) -> Result<HostInfo> {
        let response = self
            .client
            .get(format!("{}/droplets/{}", self.base_url, id))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let info = host_info(self.read_droplet(response, "droplet lookup").await?);
        debug!("Droplet {} status: {}", info.id, info.status);
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_active_droplet() {
        let body = r#"{
            "droplet": {
                "id": 3164444,
                "status": "active",
                "networks": {
                    "v4": [
                        {"ip_address": "10.128.192.124", "type": "private"},
                        {"ip_address": "192.241.165.154", "type": "public"}
                    ]
                }
            }
        }"#;
        let envelope: DropletEnvelope = serde_json::from_str(body).unwrap();
        let info = host_info(envelope.droplet);

        assert_eq!(info.id, "3164444");
        assert_eq!(info.public_ipv4, Some(Ipv4Addr::new(192, 241, 165, 154)));
        assert_eq!(info.ready_address(), Some(Ipv4Addr::new(192, 241, 165, 154)));
    }

    #[test]
    fn test_parse_new_droplet_without_networks() {
        let body = r#"{"droplet": {"id": 7, "status": "new"}}"#;
        let envelope: DropletEnvelope = serde_json::from_str(body).unwrap();
        let info = host_info(envelope.droplet);

        assert_eq!(info.status, "new");
        assert!(info.public_ipv4.is_none());
        assert!(info.ready_address().is_none());
    }

    #[test]
    fn test_create_request_shape() {
        let tags = vec!["email-server".to_string(), "automated".to_string()];
        let request = CreateDropletRequest {
            name: "mail-server-1",
            region: "fra1",
            size: "s-2vcpu-4gb",
            image: "ubuntu-22-04-x64",
            ssh_keys: vec![ssh_key_value("512189"), ssh_key_value("3b:16:bf:e4")],
            user_data: "#!/bin/bash",
            monitoring: true,
            tags: &tags,
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["ssh_keys"][0], 512189);
        assert_eq!(json["ssh_keys"][1], "3b:16:bf:e4");
        assert_eq!(json["monitoring"], true);
        assert_eq!(json["tags"][1], "automated");
    }
}
