//! Console ticket negotiation
//!
//! Console endpoints only accept the session ticket (cookie + CSRF header),
//! never the static API token used for data calls.

use pvetui_common::{
    AuthSession, ConnectionDescriptor, ConsoleTarget, ConsoleTicket, Error, Result, SessionStore,
    CSRF_HEADER_NAME,
};
use reqwest::header::COOKIE;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{error_body, network_error, ApiEndpoint, Envelope};

/// `termproxy` reports the port as a number on some versions and a string
/// on others
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    fn into_port(self) -> Result<u16> {
        match self {
            PortValue::Number(port) => Ok(port),
            PortValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| Error::InvalidResponse(format!("termproxy port is not a number: {}", text))),
        }
    }
}

/// `termproxy` payload
#[derive(Debug, Deserialize)]
struct TermproxyData {
    ticket: String,
    port: PortValue,
    #[serde(default)]
    user: Option<String>,
}

/// Requests per-target console endpoints using the cached session
pub struct ConsoleNegotiator {
    endpoint: ApiEndpoint,
    http: reqwest::Client,
    store: SessionStore,
}

impl ConsoleNegotiator {
    /// Create a new negotiator
    pub fn new(endpoint: ApiEndpoint, store: SessionStore) -> Result<Self> {
        let http = endpoint.http_client()?;
        Ok(Self {
            endpoint,
            http,
            store,
        })
    }

    /// Return the cached session if it is still valid.
    ///
    /// Fails with `AuthenticationRequired` when nothing is cached or the
    /// cached session expired; the caller authenticates and retries.
    pub fn ensure_session(&self) -> Result<AuthSession> {
        match self.store.load() {
            Some(session) if self.store.is_valid(&session) => Ok(session),
            Some(session) => {
                debug!("Cached session for {} has expired", session.username);
                Err(Error::AuthenticationRequired)
            }
            None => Err(Error::AuthenticationRequired),
        }
    }

    /// Obtain a console port and ticket for `target`
    pub async fn open_console_ticket(&self, target: &ConsoleTarget) -> Result<ConsoleTicket> {
        let session = self.ensure_session()?;
        self.request_ticket(target, &session).await
    }

    /// Obtain a console port and ticket for `target` under `session`
    pub async fn request_ticket(
        &self,
        target: &ConsoleTarget,
        session: &AuthSession,
    ) -> Result<ConsoleTicket> {
        let url = self
            .endpoint
            .api_url(&format!("{}/termproxy", target.api_path()));
        debug!("Requesting console ticket for {}", target);

        let response = self
            .http
            .post(&url)
            .header(COOKIE, session.cookie())
            .header(CSRF_HEADER_NAME, &session.csrf_token)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            // The server dropped the ticket before our TTL did
            warn!("Server rejected the cached session; clearing it");
            self.store.clear()?;
            return Err(Error::AuthenticationRequired);
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let envelope: Envelope<TermproxyData> = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("termproxy response: {}", e)))?;

        let data = envelope.data;
        let ticket = ConsoleTicket {
            ws_port: data.port.into_port()?,
            vnc_ticket: data.ticket,
            user: data.user.filter(|user| !user.is_empty()),
        };
        debug!("Console ticket issued on port {}", ticket.ws_port);
        Ok(ticket)
    }

    /// Resolve everything the bridge needs to connect
    pub fn build_connection_descriptor(
        &self,
        target: &ConsoleTarget,
        ticket: &ConsoleTicket,
        session: &AuthSession,
    ) -> ConnectionDescriptor {
        let ws_url = self.endpoint.ws_url(&format!(
            "{}/vncwebsocket?port={}&vncticket={}",
            target.api_path(),
            ticket.ws_port,
            urlencoding::encode(&ticket.vnc_ticket)
        ));

        ConnectionDescriptor {
            ws_url,
            user: ticket
                .user
                .clone()
                .unwrap_or_else(|| session.username.clone()),
            ticket: ticket.vnc_ticket.clone(),
            cookie: session.cookie(),
            origin: self.endpoint.origin(),
            title_hint: target.to_string(),
        }
    }
}
