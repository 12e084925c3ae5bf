//! Password authentication against the ticket endpoint

use pvetui_common::{AuthSession, Error, Result, SessionStore};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::api::{error_body, network_error, ApiEndpoint, Envelope};

/// `/access/ticket` payload
#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_prevention_token: String,
    username: String,
}

/// Exchanges a username and password for a session ticket
pub struct AuthenticationClient {
    endpoint: ApiEndpoint,
    http: reqwest::Client,
    store: SessionStore,
}

impl AuthenticationClient {
    /// Create a new authentication client
    pub fn new(endpoint: ApiEndpoint, store: SessionStore) -> Result<Self> {
        let http = endpoint.http_client()?;
        Ok(Self {
            endpoint,
            http,
            store,
        })
    }

    /// Authenticate and persist the resulting session.
    ///
    /// On success the session is already saved, so a following
    /// `SessionStore::load` returns it.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AuthSession> {
        let url = self.endpoint.api_url("/access/ticket");
        debug!("Requesting ticket for {} from {}", username, url);

        let response = self
            .http
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(Error::AuthenticationFailed {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let envelope: Envelope<Option<TicketData>> = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("ticket response: {}", e)))?;

        // Older servers answer a bad password with 200 and `data: null`
        let data = envelope.data.ok_or(Error::InvalidCredentials)?;

        let session = AuthSession::new(data.ticket, data.csrf_prevention_token, data.username);
        self.store.save(&session)?;

        info!("Authenticated as {}", session.username);
        Ok(session)
    }
}
