//! Connection error classification
//!
//! Maps raw transport error text to a category and a message a user can act
//! on. Patterns are checked in priority order; the first match wins.

use serde::Serialize;
use std::fmt;

/// User-facing error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TlsCertificate,
    ConnectionRefused,
    Timeout,
    AuthenticationFailed,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::TlsCertificate => write!(f, "tls_certificate"),
            ErrorCategory::ConnectionRefused => write!(f, "connection_refused"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::AuthenticationFailed => write!(f, "authentication_failed"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

const TLS_PATTERNS: &[&str] = &[
    "certificate",
    "ssl",
    "tls",
    "self signed",
    "self-signed",
    "unable to verify",
    "unknownissuer",
];
const REFUSED_PATTERNS: &[&str] = &["refused", "unreachable"];
const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout"];
const AUTH_PATTERNS: &[&str] = &["401", "unauthorized", "authentication", "permission denied"];

/// Classify raw error text. Pure and deterministic.
pub fn classify(raw: &str) -> ClassifiedError {
    let haystack = raw.to_ascii_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| haystack.contains(p));

    if matches(TLS_PATTERNS) {
        ClassifiedError {
            category: ErrorCategory::TlsCertificate,
            message: format!(
                "TLS certificate verification failed ({}). If the server uses a self-signed \
                 certificate, set `insecure = true` under [server] in the configuration \
                 or pass --insecure.",
                raw
            ),
        }
    } else if matches(REFUSED_PATTERNS) {
        ClassifiedError {
            category: ErrorCategory::ConnectionRefused,
            message: format!(
                "Could not reach the server ({}). Check that the host and port are correct \
                 and reachable from this machine.",
                raw
            ),
        }
    } else if matches(TIMEOUT_PATTERNS) {
        ClassifiedError {
            category: ErrorCategory::Timeout,
            message: format!(
                "Timed out connecting to the server ({}). Check the network and try again.",
                raw
            ),
        }
    } else if matches(AUTH_PATTERNS) {
        ClassifiedError {
            category: ErrorCategory::AuthenticationFailed,
            message: format!(
                "The server rejected the credentials ({}). Log in again and retry.",
                raw
            ),
        }
    } else {
        ClassifiedError {
            category: ErrorCategory::Unknown,
            message: raw.to_string(),
        }
    }
}
