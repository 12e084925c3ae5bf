//! CLI Commands

pub mod console;
pub mod guests;
pub mod session;

use anyhow::{Context as _, Result};
use pvetui_common::{AuthSession, Config, SessionStore};
use pvetui_console::{ApiEndpoint, AuthenticationClient};
use tracing::debug;

use crate::output::OutputFormat;

/// Resolved configuration shared by every command
pub struct Context {
    pub config: Config,
    pub format: OutputFormat,
}

impl Context {
    pub fn new(config: Config, format: OutputFormat) -> Self {
        Self { config, format }
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(self.config.session_path())
    }

    pub fn endpoint(&self) -> Result<ApiEndpoint> {
        Ok(ApiEndpoint::from_config(&self.config)?)
    }

    /// Obtain a password and exchange it for a cached session
    pub async fn login(&self) -> Result<AuthSession> {
        self.config.validate_for_console()?;
        let username = self.config.auth.username.clone();
        let password = match &self.config.auth.password {
            Some(password) if !password.is_empty() => {
                debug!("Using password from configuration");
                password.clone()
            }
            _ => prompt_password(&username).await?,
        };

        let client = AuthenticationClient::new(self.endpoint()?, self.session_store())?;
        Ok(client.authenticate(&username, &password).await?)
    }
}

/// Read a password from the terminal without echo
async fn prompt_password(username: &str) -> Result<String> {
    let prompt = format!("Password for {}: ", username);
    tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
        .await?
        .context("Failed to read password")
}
