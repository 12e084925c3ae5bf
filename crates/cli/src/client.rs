//! Token-authenticated management API client
//!
//! Data calls use the static API token. The console path never goes
//! through this client.

use pvetui_common::{Config, ConsoleTarget, Error, GuestKind, Result};
use pvetui_console::api::{error_body, network_error, ApiEndpoint, Envelope};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A guest as reported by `/cluster/resources`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub node: String,
    /// `qemu` or `lxc`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl Guest {
    /// Console target for this guest, if its type supports a console
    pub fn target(&self) -> Option<ConsoleTarget> {
        let kind: GuestKind = self.kind.parse().ok()?;
        Some(ConsoleTarget::new(kind, self.node.clone(), self.vmid))
    }
}

/// Client for the management API authenticated with a static token
pub struct ApiClient {
    endpoint: ApiEndpoint,
    http: reqwest::Client,
    authorization: String,
}

impl ApiClient {
    /// Create a client from configuration
    pub fn new(config: &Config) -> Result<Self> {
        config.validate_for_api()?;
        let (Some(token_id), Some(secret)) = (&config.auth.token_id, &config.auth.token_secret)
        else {
            return Err(Error::InvalidConfig(
                "auth.token_id and auth.token_secret are required".to_string(),
            ));
        };

        let endpoint = ApiEndpoint::from_config(config)?;
        let http = endpoint.http_client()?;
        Ok(Self {
            endpoint,
            http,
            authorization: token_header(token_id, secret),
        })
    }

    /// List every VM and container in the cluster
    pub async fn list_guests(&self) -> Result<Vec<Guest>> {
        let url = self.endpoint.api_url("/cluster/resources");
        debug!("Listing guests from {}", url);

        let response = self
            .http
            .get(&url)
            .query(&[("type", "vm")])
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let envelope: Envelope<Vec<Guest>> = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("cluster resources: {}", e)))?;

        let mut guests = envelope.data;
        guests.sort_by_key(|guest| guest.vmid);
        Ok(guests)
    }

    /// Find a guest by id
    pub async fn find_guest(&self, vmid: u32) -> Result<Option<Guest>> {
        Ok(self
            .list_guests()
            .await?
            .into_iter()
            .find(|guest| guest.vmid == vmid))
    }
}

fn token_header(token_id: &str, secret: &str) -> String {
    format!("PVEAPIToken={}={}", token_id, secret)
}
