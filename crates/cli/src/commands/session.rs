//! Session Commands

use anyhow::Result;
use chrono::Local;
use pvetui_common::{AuthSession, SessionStore};
use serde::Serialize;

use super::Context;
use crate::output::{print_info, print_item, print_success, TableDisplay};

/// Cached session display wrapper for serialization
#[derive(Serialize)]
pub struct SessionDisplay {
    pub username: String,
    pub issued_at: String,
    pub valid: bool,
    pub remaining_minutes: u64,
    pub path: String,
}

impl SessionDisplay {
    fn new(session: &AuthSession, store: &SessionStore) -> Self {
        let remaining = store.remaining(session);
        Self {
            username: session.username.clone(),
            issued_at: session
                .issued_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            valid: remaining.is_some(),
            remaining_minutes: remaining.map(|d| d.num_minutes().max(0) as u64).unwrap_or(0),
            path: store.path().display().to_string(),
        }
    }
}

impl TableDisplay for SessionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["User", "Issued", "Valid", "Remaining", "Path"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.username.clone(),
            self.issued_at.clone(),
            if self.valid { "yes" } else { "expired" }.to_string(),
            format!("{}m", self.remaining_minutes),
            self.path.clone(),
        ]
    }
}

/// Prompt for a password and cache a new session
pub async fn login(ctx: &Context) -> Result<()> {
    let session = ctx.login().await?;
    print_success(&format!("Logged in as {}", session.username));
    Ok(())
}

/// Remove the cached session
pub async fn logout(ctx: &Context) -> Result<()> {
    ctx.session_store().clear()?;
    print_success("Cached session cleared");
    Ok(())
}

/// Show the cached session
pub async fn show(ctx: &Context) -> Result<()> {
    let store = ctx.session_store();
    match store.load() {
        Some(session) => print_item(&SessionDisplay::new(&session, &store), ctx.format),
        None => print_info("No cached session. Run `pvetui login` to create one."),
    }
    Ok(())
}
