//! Core types for pvetui

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the cookie carrying the session ticket
pub const AUTH_COOKIE_NAME: &str = "PVEAuthCookie";

/// Header carrying the CSRF prevention token on ticket-authenticated writes
pub const CSRF_HEADER_NAME: &str = "CSRFPreventionToken";

/// A password-authenticated session.
///
/// The ticket and CSRF token are credentials; `Debug` redacts them.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub ticket: String,
    pub csrf_token: String,
    pub username: String,
    pub issued_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn new(ticket: String, csrf_token: String, username: String) -> Self {
        Self {
            ticket,
            csrf_token,
            username,
            issued_at: Utc::now(),
        }
    }

    /// `Cookie` header value for ticket-authenticated requests
    pub fn cookie(&self) -> String {
        format!("{}={}", AUTH_COOKIE_NAME, self.ticket)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("ticket", &"<redacted>")
            .field("csrf_token", &"<redacted>")
            .field("username", &self.username)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Guest kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestKind {
    /// QEMU virtual machine
    Vm,
    /// LXC container
    Container,
}

impl GuestKind {
    /// Path segment used by the management API
    pub fn api_segment(&self) -> &'static str {
        match self {
            GuestKind::Vm => "qemu",
            GuestKind::Container => "lxc",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestKind::Vm => write!(f, "vm"),
            GuestKind::Container => write!(f, "ct"),
        }
    }
}

impl FromStr for GuestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vm" | "qemu" => Ok(GuestKind::Vm),
            "ct" | "lxc" | "container" => Ok(GuestKind::Container),
            other => Err(format!("unknown guest kind: {}", other)),
        }
    }
}

/// Identifies the console to open
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsoleTarget {
    pub kind: GuestKind,
    pub node: String,
    pub id: u32,
}

impl ConsoleTarget {
    pub fn new(kind: GuestKind, node: impl Into<String>, id: u32) -> Self {
        Self {
            kind,
            node: node.into(),
            id,
        }
    }

    /// API path of the guest, e.g. `/nodes/pve1/qemu/100`
    pub fn api_path(&self) -> String {
        format!(
            "/nodes/{}/{}/{}",
            urlencode_segment(&self.node),
            self.kind.api_segment(),
            self.id
        )
    }
}

impl fmt::Display for ConsoleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.kind, self.id, self.node)
    }
}

/// Short-lived console port and ticket, scoped to one WebSocket connection
#[derive(Clone, PartialEq, Eq)]
pub struct ConsoleTicket {
    pub ws_port: u16,
    pub vnc_ticket: String,
    /// User the console ticket was issued for, when reported by the server
    pub user: Option<String>,
}

impl fmt::Debug for ConsoleTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleTicket")
            .field("ws_port", &self.ws_port)
            .field("vnc_ticket", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Fully resolved inputs for one console bridge session
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub ws_url: String,
    pub user: String,
    pub ticket: String,
    pub cookie: String,
    pub origin: String,
    pub title_hint: String,
}

impl ConnectionDescriptor {
    /// First outbound message of every console session
    pub fn handshake(&self) -> String {
        format!("{}:{}\n", self.user, self.ticket)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url = self.ws_url.split('?').next().unwrap_or_default();
        f.debug_struct("ConnectionDescriptor")
            .field("ws_url", &url)
            .field("user", &self.user)
            .field("origin", &self.origin)
            .field("title_hint", &self.title_hint)
            .finish_non_exhaustive()
    }
}

fn urlencode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
