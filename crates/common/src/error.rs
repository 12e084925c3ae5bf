//! Error types for pvetui

use thiserror::Error;

/// Result type alias using pvetui Error
pub type Result<T> = std::result::Result<T, Error>;

/// pvetui error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Authentication failed (HTTP {status}): {body}")]
    AuthenticationFailed { status: u16, body: String },

    #[error("Authentication required: no valid session is cached")]
    AuthenticationRequired,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API request failed (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected API response: {0}")]
    InvalidResponse(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl Error {
    /// Whether prompting for a password and retrying can resolve this error
    pub fn is_recoverable_by_login(&self) -> bool {
        matches!(self, Error::InvalidCredentials | Error::AuthenticationRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_recoverable() {
        assert!(Error::AuthenticationRequired.is_recoverable_by_login());
        assert!(Error::InvalidCredentials.is_recoverable_by_login());
        assert!(!Error::InvalidConfig("missing url".into()).is_recoverable_by_login());
        assert!(!Error::AuthenticationFailed { status: 500, body: String::new() }
            .is_recoverable_by_login());
    }

    #[test]
    fn test_display_includes_status() {
        let err = Error::AuthenticationFailed {
            status: 503,
            body: "proxy busy".into(),
        };
        assert_eq!(err.to_string(), "Authentication failed (HTTP 503): proxy busy");
    }
}
