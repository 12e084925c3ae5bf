//! pvetui configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Management API server
    pub server: ServerConfig,

    /// Credentials
    pub auth: AuthConfig,

    /// Session cache
    pub session: SessionConfig,
}

/// Management API server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Management origin, e.g. `https://pve.example:8006`
    pub url: String,

    /// Skip TLS certificate verification (self-signed clusters)
    pub insecure: bool,
}

/// Credential configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// User including realm, e.g. `root@pam`
    pub username: String,

    /// Static API token id (`user@realm!name`), used for data calls
    pub token_id: Option<String>,

    /// Static API token secret
    pub token_secret: Option<String>,

    /// Password for ticket authentication; prompted for when absent
    pub password: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("token_id", &self.token_id)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Session cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session file path
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the session file path
    pub fn session_path(&self) -> PathBuf {
        self.session
            .path
            .clone()
            .unwrap_or_else(crate::default_session_path)
    }

    /// Parsed management origin
    pub fn server_url(&self) -> Result<Url> {
        if self.server.url.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "server.url is not set (e.g. https://pve.example:8006)".to_string(),
            ));
        }
        let url = Url::parse(self.server.url.trim())
            .map_err(|e| Error::InvalidConfig(format!("server.url is invalid: {}", e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "server.url must use http or https, not {}",
                    other
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidConfig("server.url has no host".to_string()));
        }
        Ok(url)
    }

    /// Check everything the console path needs before any network call
    pub fn validate_for_console(&self) -> Result<()> {
        self.server_url()?;
        if self.auth.username.trim().is_empty() {
            return Err(Error::InvalidConfig("auth.username is not set".to_string()));
        }
        if !self.auth.username.contains('@') {
            return Err(Error::InvalidConfig(format!(
                "auth.username must include a realm (e.g. {}@pam)",
                self.auth.username
            )));
        }
        Ok(())
    }

    /// Check everything the static-token API path needs
    pub fn validate_for_api(&self) -> Result<()> {
        self.server_url()?;
        match (&self.auth.token_id, &self.auth.token_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                if !id.contains('!') {
                    return Err(Error::InvalidConfig(format!(
                        "auth.token_id must look like user@realm!name, got {}",
                        id
                    )));
                }
                Ok(())
            }
            _ => Err(Error::InvalidConfig(
                "auth.token_id and auth.token_secret are required".to_string(),
            )),
        }
    }
}
