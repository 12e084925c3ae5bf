//! Management API endpoint helpers

use pvetui_common::{Config, Error, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Prefix of every JSON API path
pub const API_BASE_PATH: &str = "/api2/json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Location of the management API and how to reach it
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    origin: Url,
    insecure: bool,
}

impl ApiEndpoint {
    /// Create an endpoint from the management origin
    pub fn new(origin: Url, insecure: bool) -> Self {
        Self { origin, insecure }
    }

    /// Create an endpoint from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.server_url()?, config.server.insecure))
    }

    /// Management origin, e.g. `https://pve.example:8006`
    pub fn origin(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    /// Full HTTP URL of an API path such as `/access/ticket`
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.origin(), API_BASE_PATH, path)
    }

    /// Full WebSocket URL of an API path, upgrading `http` to `ws` and
    /// `https` to `wss`
    pub fn ws_url(&self, path_and_query: &str) -> String {
        let origin = self.origin();
        let upgraded = if let Some(rest) = origin.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = origin.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            origin
        };
        format!("{}{}{}", upgraded, API_BASE_PATH, path_and_query)
    }

    /// HTTP client honoring the TLS verification setting
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(self.insecure)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pvetui/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(network_error)
    }
}

/// Every API response wraps its payload in `data`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Convert a transport error, keeping the full cause chain so the
/// classifier can see TLS and socket details
pub fn network_error(err: reqwest::Error) -> Error {
    Error::Network(error_chain(&err))
}

/// Render an error and all of its sources as one line
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Read a response body for error reporting
pub async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .map(|body| body.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> ApiEndpoint {
        ApiEndpoint::new(Url::parse(url).unwrap(), false)
    }

    #[test]
    fn test_api_url() {
        let ep = endpoint("https://pve.example:8006");
        assert_eq!(
            ep.api_url("/access/ticket"),
            "https://pve.example:8006/api2/json/access/ticket"
        );
    }

    #[test]
    fn test_origin_ignores_path() {
        let ep = endpoint("https://pve.example:8006/some/where/");
        assert_eq!(ep.origin(), "https://pve.example:8006");
    }

    #[test]
    fn test_ws_url_scheme_upgrade() {
        assert_eq!(
            endpoint("https://pve:8006").ws_url("/nodes/a/qemu/1/vncwebsocket"),
            "wss://pve:8006/api2/json/nodes/a/qemu/1/vncwebsocket"
        );
        assert_eq!(
            endpoint("http://127.0.0.1:9000").ws_url("/x"),
            "ws://127.0.0.1:9000/api2/json/x"
        );
    }

    #[test]
    fn test_error_chain() {
        #[derive(Debug)]
        struct Outer(std::io::Error);
        impl std::fmt::Display for Outer {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "error sending request")
            }
        }
        impl std::error::Error for Outer {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(error_chain(&err), "error sending request: connection refused");
    }
}
